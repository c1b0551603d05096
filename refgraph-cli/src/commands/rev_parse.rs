use anyhow::Result;
use colored::Colorize;
use refgraph_core::{Context, Ref, RepositoryId};
use std::path::Path;

pub fn run(ctx: &Context, db_path: &Path, repo: String, reference: String) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    let resolved = manager.rev_parse(ctx, &RepositoryId::from(repo), &Ref::from(reference))?;

    println!("{}", resolved.commit_id);
    if let Some(token) = &resolved.staging_token {
        println!("{}: {}", "Staging token".dimmed(), token.to_string().dimmed());
    }

    Ok(())
}
