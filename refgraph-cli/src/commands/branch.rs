use anyhow::Result;
use colored::Colorize;
use refgraph_core::{Branch, BranchId, Context, Ref, RepositoryId, StagingToken};
use std::path::Path;

pub fn create(
    ctx: &Context,
    db_path: &Path,
    repo: String,
    name: String,
    from: Option<String>,
) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    let repository_id = RepositoryId::from(repo);
    let branch_id = BranchId::from(name.as_str());
    manager.get_repository(ctx, &repository_id)?;

    // set_branch is an upsert, so refuse to clobber an existing branch here.
    match manager.get_branch(ctx, &repository_id, &branch_id) {
        Ok(_) => anyhow::bail!("Branch '{}' already exists", name),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let branch = match from {
        Some(reference) => {
            let resolved = manager.rev_parse(ctx, &repository_id, &Ref::from(reference))?;
            Branch::new(resolved.commit_id, StagingToken::generate())
        }
        None => Branch::empty(),
    };
    manager.set_branch(ctx, &repository_id, &branch_id, &branch)?;

    println!("{}", "✓ Branch created".green().bold());
    println!("  {}: {}", "Name".bold(), name);
    if branch.commit_id.is_empty() {
        println!("  {}: {}", "Commit".bold(), "(none)".dimmed());
    } else {
        println!("  {}: {}", "Commit".bold(), branch.commit_id);
    }

    Ok(())
}

pub fn show(ctx: &Context, db_path: &Path, repo: String, name: String) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    let branch = manager.get_branch(ctx, &RepositoryId::from(repo), &BranchId::from(name.as_str()))?;

    println!("{} {}", "branch".yellow().bold(), name.yellow());
    if branch.commit_id.is_empty() {
        println!("{}: {}", "Commit".bold(), "(none)".dimmed());
    } else {
        println!("{}: {}", "Commit".bold(), branch.commit_id);
    }
    println!("{}: {}", "Staging token".bold(), branch.staging_token);

    Ok(())
}

pub fn list(ctx: &Context, db_path: &Path, repo: String, from: String) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    let repository_id = RepositoryId::from(repo);

    // Surface a missing repository instead of an empty listing.
    let repository = manager.get_repository(ctx, &repository_id)?;

    let mut count = 0;
    for record in manager.list_branches(ctx, &repository_id, &BranchId::from(from)) {
        let record = record?;
        let marker = if record.id == repository.default_branch_id {
            "*".green().bold()
        } else {
            " ".normal()
        };
        let commit = if record.branch.commit_id.is_empty() {
            "(none)".to_string()
        } else {
            record.branch.commit_id.as_str().chars().take(12).collect()
        };
        println!("{} {}  {}", marker, record.id.to_string().cyan(), commit.dimmed());
        count += 1;
    }

    if count == 0 {
        println!("{}", "No branches".yellow());
    }

    Ok(())
}

pub fn delete(ctx: &Context, db_path: &Path, repo: String, name: String) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    manager.delete_branch(ctx, &RepositoryId::from(repo), &BranchId::from(name.as_str()))?;

    println!("{} {}", "✓ Deleted branch".green().bold(), name);

    Ok(())
}
