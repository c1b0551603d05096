use anyhow::Result;
use clap::{Parser, Subcommand};
use refgraph_core::Context;
use std::path::{Path, PathBuf};

mod commands;

use commands::{branch, commit, log, merge_base, repo, rev_parse};

#[derive(Parser)]
#[command(name = "refgraph")]
#[command(version, about = "Repositories, branches and commits in a Git-like ref store", long_about = None)]
struct Cli {
    /// Database path (defaults to .refgraph/refgraph.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },

    /// Add a commit on top of a branch and advance the branch to it
    Commit {
        /// Repository ID
        repo: String,

        /// Branch to commit onto
        branch: String,

        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Committer name
        #[arg(short, long, default_value = "cli-user")]
        committer: String,

        /// Tree ID the commit points at
        #[arg(short, long, default_value = "")]
        tree: String,

        /// Metadata entry, KEY=VALUE (repeatable)
        #[arg(long = "meta", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,
    },

    /// Show first-parent history starting at a ref
    Log {
        /// Repository ID
        repo: String,

        /// Branch, commit ID or ref expression
        reference: String,

        /// Number of commits to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Resolve a ref expression such as main~2^
    RevParse {
        /// Repository ID
        repo: String,

        /// Ref expression
        reference: String,
    },

    /// Find the best common ancestor of two or more refs
    MergeBase {
        /// Repository ID
        repo: String,

        /// Refs to intersect
        #[arg(required = true, num_args = 1..)]
        references: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Create a repository with an empty default branch
    Create {
        /// Repository ID
        id: String,

        /// Storage namespace, e.g. s3://bucket/path
        storage_namespace: String,

        /// Default branch name
        #[arg(short, long, default_value = "main")]
        default_branch: String,
    },

    /// Show one repository
    Show {
        /// Repository ID
        id: String,
    },

    /// List repositories
    List {
        /// Start listing at this ID (inclusive)
        #[arg(long, default_value = "")]
        from: String,
    },

    /// Delete a repository with all of its branches and commits
    Delete {
        /// Repository ID
        id: String,
    },
}

#[derive(Subcommand)]
enum BranchCommands {
    /// Create a branch, empty or pointing at a ref
    Create {
        /// Repository ID
        repo: String,

        /// Branch name
        name: String,

        /// Ref the new branch starts from
        #[arg(long)]
        from: Option<String>,
    },

    /// Show one branch
    Show {
        /// Repository ID
        repo: String,

        /// Branch name
        name: String,
    },

    /// List branches of a repository
    List {
        /// Repository ID
        repo: String,

        /// Start listing at this name (inclusive)
        #[arg(long, default_value = "")]
        from: String,
    },

    /// Delete a branch
    Delete {
        /// Repository ID
        repo: String,

        /// Branch name
        name: String,
    },
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let db_path = commands::get_db_path(cli.db)?;

    let ctx = Context::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            interrupt.cancel();
        }
    });

    // Store calls block, so keep them off the runtime's worker threads.
    let command = cli.command;
    tokio::task::spawn_blocking(move || run(&ctx, &db_path, command)).await?
}

fn run(ctx: &Context, db_path: &Path, command: Commands) -> Result<()> {
    match command {
        Commands::Repo { command } => match command {
            RepoCommands::Create {
                id,
                storage_namespace,
                default_branch,
            } => repo::create(ctx, db_path, id, storage_namespace, default_branch)?,
            RepoCommands::Show { id } => repo::show(ctx, db_path, id)?,
            RepoCommands::List { from } => repo::list(ctx, db_path, from)?,
            RepoCommands::Delete { id } => repo::delete(ctx, db_path, id)?,
        },
        Commands::Branch { command } => match command {
            BranchCommands::Create { repo, name, from } => {
                branch::create(ctx, db_path, repo, name, from)?
            }
            BranchCommands::Show { repo, name } => branch::show(ctx, db_path, repo, name)?,
            BranchCommands::List { repo, from } => branch::list(ctx, db_path, repo, from)?,
            BranchCommands::Delete { repo, name } => branch::delete(ctx, db_path, repo, name)?,
        },
        Commands::Commit {
            repo,
            branch,
            message,
            committer,
            tree,
            metadata,
        } => {
            commit::run(
                ctx,
                db_path,
                commit::CommitArgs {
                    repo,
                    branch,
                    message,
                    committer,
                    tree,
                    metadata,
                },
            )?;
        }
        Commands::Log {
            repo,
            reference,
            limit,
        } => {
            log::run(ctx, db_path, repo, reference, limit)?;
        }
        Commands::RevParse { repo, reference } => {
            rev_parse::run(ctx, db_path, repo, reference)?;
        }
        Commands::MergeBase { repo, references } => {
            merge_base::run(ctx, db_path, repo, references)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            ("team".to_string(), "a=b".to_string()),
            parse_key_val("team=a=b").unwrap()
        );
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn test_cli_parses_nested_commands() {
        let cli = Cli::try_parse_from(["refgraph", "--db", "x.db", "branch", "create", "r", "dev", "--from", "main~1"])
            .unwrap();
        assert_eq!(Some(PathBuf::from("x.db")), cli.db);
        assert!(matches!(
            cli.command,
            Commands::Branch {
                command: BranchCommands::Create { from: Some(_), .. }
            }
        ));

        assert!(Cli::try_parse_from(["refgraph", "merge-base", "r"]).is_err());
    }
}
