use anyhow::Result;
use colored::Colorize;
use refgraph_core::{CommitId, Context, Ref, RepositoryId};
use std::path::Path;

pub fn run(ctx: &Context, db_path: &Path, repo: String, references: Vec<String>) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    let repository_id = RepositoryId::from(repo);

    let commit_ids = references
        .iter()
        .map(|reference| {
            manager
                .rev_parse(ctx, &repository_id, &Ref::from(reference.as_str()))
                .map(|resolved| resolved.commit_id)
        })
        .collect::<refgraph_core::Result<Vec<CommitId>>>()?;

    let base = manager.find_merge_base(ctx, &repository_id, &commit_ids)?;

    println!("{}", base.id);
    println!(
        "{}",
        format!("{} ({})", base.commit.message, base.commit.committer).dimmed()
    );

    Ok(())
}
