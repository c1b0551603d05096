use anyhow::Result;
use colored::Colorize;
use refgraph_core::{Branch, BranchId, Commit, Context, RepositoryId, StagingToken};
use std::path::Path;

pub struct CommitArgs {
    pub repo: String,
    pub branch: String,
    pub message: String,
    pub committer: String,
    pub tree: String,
    pub metadata: Vec<(String, String)>,
}

pub fn run(ctx: &Context, db_path: &Path, args: CommitArgs) -> Result<()> {
    let manager = super::open_manager(db_path, false)?;
    let repository_id = RepositoryId::from(args.repo);
    let branch_id = BranchId::from(args.branch.as_str());

    let branch = manager.get_branch(ctx, &repository_id, &branch_id)?;

    let mut commit = Commit::new(args.committer, args.message, args.tree);
    if !branch.commit_id.is_empty() {
        commit = commit.with_parent(branch.commit_id.clone());
    }
    for (key, value) in args.metadata {
        commit = commit.with_metadata(key, value);
    }

    let commit_id = manager.add_commit(ctx, &repository_id, &commit)?;
    manager.set_branch(
        ctx,
        &repository_id,
        &branch_id,
        &Branch::new(commit_id.clone(), StagingToken::generate()),
    )?;

    println!("{}", "✓ Commit created successfully!".green().bold());
    println!("  {}: {}", "Commit ID".bold(), commit_id);
    println!("  {}: {}", "Branch".bold(), args.branch);
    println!("  {}: {}", "Message".bold(), commit.message);
    println!("  {}: {}", "Committer".bold(), commit.committer);
    if let Some(parent) = commit.parents.first() {
        println!("  {}: {}", "Parent".bold(), parent);
    }

    Ok(())
}
