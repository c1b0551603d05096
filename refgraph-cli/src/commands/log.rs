use anyhow::Result;
use colored::Colorize;
use refgraph_core::{Context, Ref, RepositoryId};
use std::path::Path;

pub fn run(
    ctx: &Context,
    db_path: &Path,
    repo: String,
    reference: String,
    limit: Option<usize>,
) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    let repository_id = RepositoryId::from(repo);
    let start = manager.rev_parse(ctx, &repository_id, &Ref::from(reference.as_str()))?;

    if start.commit_id.is_empty() {
        println!("{}", "No commits yet".yellow());
        return Ok(());
    }

    println!("{} {}", "Commit History".bold().cyan(), reference.dimmed());
    println!();

    let mut log = manager.log(ctx, &repository_id, &start.commit_id);
    let mut shown = 0;
    for record in log.by_ref().take(limit.unwrap_or(usize::MAX)) {
        let record = record?;
        let commit = &record.commit;

        println!(
            "{} {}",
            "commit".yellow().bold(),
            record.id.to_string().yellow()
        );
        if commit.parents.len() > 1 {
            let parents: Vec<String> = commit
                .parents
                .iter()
                .map(|p| p.as_str().chars().take(12).collect())
                .collect();
            println!("{}: {}", "Merge".bold(), parents.join(" "));
        }
        println!("{}: {}", "Committer".bold(), commit.committer);
        println!(
            "{}: {}",
            "Date".bold(),
            commit.creation_date.format("%Y-%m-%d %H:%M:%S")
        );
        for (key, value) in &commit.metadata {
            println!("{}: {}", key.bold(), value);
        }
        println!();
        println!("    {}", commit.message);
        println!();
        shown += 1;
    }

    if limit == Some(shown) && log.next().is_some() {
        println!("{}", "... more commits".dimmed());
        println!("Use {} to see more", "--limit N".cyan());
    }
    log.close();

    Ok(())
}
