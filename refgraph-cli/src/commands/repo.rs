use anyhow::Result;
use colored::Colorize;
use refgraph_core::{Branch, Context, Repository, RepositoryId};
use std::path::Path;

pub fn create(
    ctx: &Context,
    db_path: &Path,
    id: String,
    storage_namespace: String,
    default_branch: String,
) -> Result<()> {
    let manager = super::open_manager(db_path, true)?;
    let repository = Repository::new(storage_namespace, default_branch);

    manager.create_repository(ctx, &RepositoryId::from(id.as_str()), &repository, &Branch::empty())?;

    println!("{}", "✓ Repository created".green().bold());
    println!("  {}: {}", "ID".bold(), id);
    println!("  {}: {}", "Storage".bold(), repository.storage_namespace);
    println!("  {}: {}", "Default branch".bold(), repository.default_branch_id);

    Ok(())
}

pub fn show(ctx: &Context, db_path: &Path, id: String) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    let repository = manager.get_repository(ctx, &RepositoryId::from(id.as_str()))?;

    println!("{} {}", "repository".yellow().bold(), id.yellow());
    println!("{}: {}", "Storage".bold(), repository.storage_namespace);
    println!("{}: {}", "Default branch".bold(), repository.default_branch_id);
    println!(
        "{}: {}",
        "Created".bold(),
        repository.creation_date.format("%Y-%m-%d %H:%M:%S")
    );

    Ok(())
}

pub fn list(ctx: &Context, db_path: &Path, from: String) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;

    let mut count = 0;
    for record in manager.list_repositories(ctx, &RepositoryId::from(from)) {
        let record = record?;
        println!(
            "{}  {}  {}",
            record.id.to_string().cyan(),
            record.repository.default_branch_id,
            record.repository.storage_namespace.dimmed()
        );
        count += 1;
    }

    if count == 0 {
        println!("{}", "No repositories".yellow());
    }

    Ok(())
}

pub fn delete(ctx: &Context, db_path: &Path, id: String) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    manager.delete_repository(ctx, &RepositoryId::from(id.as_str()))?;

    println!("{} {}", "✓ Deleted repository".green().bold(), id);

    Ok(())
}
