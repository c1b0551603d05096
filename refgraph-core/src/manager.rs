use crate::config::{Config, DEFAULT_PREFETCH_SIZE};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::iterator::{Cursor, Page, PageFetcher, PagedIterator};
use crate::merge_base;
use crate::models::{
    format_timestamp, parse_timestamp, Branch, BranchId, BranchRecord, Commit, CommitId,
    CommitRecord, Ref, Reference, Repository, RepositoryId, RepositoryRecord, StagingToken, TreeId,
};
use crate::revparse::{self, RefReader};
use crate::store::{Database, FromRow, Row, Tx, TxMode, Value};
use tracing::{debug, info, warn};

const REPOSITORY_COLUMNS: &str = "id, storage_namespace, creation_date, default_branch";
const BRANCH_COLUMNS: &str = "id, staging_token, commit_id";
const COMMIT_COLUMNS: &str = "id, committer, message, creation_date, parents, tree_id, metadata";

pub type RepositoryIterator<'a, D> = PagedIterator<'a, D, RepositoryPages>;
pub type BranchIterator<'a, D> = PagedIterator<'a, D, BranchPages>;
pub type CommitLog<'a, D> = PagedIterator<'a, D, LogPages>;

/// Repository, branch and commit operations over a transactional store.
///
/// Holds nothing but the store handle and the iterator batch size; every
/// operation runs in exactly one transaction of its own.
pub struct RefManager<D> {
    db: D,
    prefetch_size: usize,
}

impl<D: Database> RefManager<D> {
    pub fn new(db: D) -> Self {
        Self {
            db,
            prefetch_size: DEFAULT_PREFETCH_SIZE,
        }
    }

    pub fn with_config(db: D, config: &Config) -> Self {
        Self::new(db).with_prefetch_size(config.iteration.prefetch_size)
    }

    pub fn with_prefetch_size(mut self, prefetch_size: usize) -> Self {
        self.prefetch_size = prefetch_size.max(1);
        self
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    pub fn prefetch_size(&self) -> usize {
        self.prefetch_size
    }

    // Repository operations

    /// Insert the repository and its default branch in one transaction.
    pub fn create_repository(
        &self,
        ctx: &Context,
        repository_id: &RepositoryId,
        repository: &Repository,
        branch: &Branch,
    ) -> Result<()> {
        debug!(repository = %repository_id, "create repository");
        self.db
            .transact(ctx, TxMode::ReadWrite, |tx| {
                tx.exec(
                    "INSERT INTO repositories (id, storage_namespace, creation_date, default_branch)
                     VALUES (?1, ?2, ?3, ?4)",
                    &[
                        repository_id.as_str().into(),
                        repository.storage_namespace.as_str().into(),
                        format_timestamp(&repository.creation_date).into(),
                        repository.default_branch_id.as_str().into(),
                    ],
                )?;
                tx.exec(
                    "INSERT INTO branches (repository_id, id, staging_token, commit_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    &[
                        repository_id.as_str().into(),
                        repository.default_branch_id.as_str().into(),
                        branch.staging_token.as_str().into(),
                        branch.commit_id.as_str().into(),
                    ],
                )?;
                Ok(())
            })
            .map_err(|e| match e {
                Error::AlreadyExists(_) => {
                    Error::AlreadyExists(format!("repository {}", repository_id))
                }
                other => other,
            })?;
        info!(
            repository = %repository_id,
            default_branch = %repository.default_branch_id,
            "created repository"
        );
        Ok(())
    }

    pub fn get_repository(&self, ctx: &Context, repository_id: &RepositoryId) -> Result<Repository> {
        debug!(repository = %repository_id, "get repository");
        let sql = format!("SELECT {} FROM repositories WHERE id = ?1", REPOSITORY_COLUMNS);
        self.db
            .transact(ctx, TxMode::ReadOnly, |tx| {
                tx.get::<RepositoryRecord>(&sql, &[repository_id.as_str().into()])
            })
            .map(|record| record.repository)
            .map_err(|e| not_found(e, || Error::RepositoryNotFound(repository_id.to_string())))
    }

    /// Remove the repository with all of its branches and commits.
    pub fn delete_repository(&self, ctx: &Context, repository_id: &RepositoryId) -> Result<()> {
        debug!(repository = %repository_id, "delete repository");
        self.db.transact(ctx, TxMode::ReadWrite, |tx| {
            let params: [Value; 1] = [repository_id.as_str().into()];
            tx.exec("DELETE FROM branches WHERE repository_id = ?1", &params)?;
            tx.exec("DELETE FROM commits WHERE repository_id = ?1", &params)?;
            let deleted = tx.exec("DELETE FROM repositories WHERE id = ?1", &params)?;
            if deleted == 0 {
                return Err(Error::RepositoryNotFound(repository_id.to_string()));
            }
            Ok(())
        })?;
        info!(repository = %repository_id, "deleted repository");
        Ok(())
    }

    /// Repositories with id >= `from`, ascending.
    pub fn list_repositories(&self, ctx: &Context, from: &RepositoryId) -> RepositoryIterator<'_, D> {
        debug!(from = %from, "list repositories");
        PagedIterator::new(
            &self.db,
            ctx,
            RepositoryPages,
            Some(Cursor::From(from.to_string())),
            self.prefetch_size,
        )
    }

    // Branch operations

    pub fn get_branch(
        &self,
        ctx: &Context,
        repository_id: &RepositoryId,
        branch_id: &BranchId,
    ) -> Result<Branch> {
        debug!(repository = %repository_id, branch = %branch_id, "get branch");
        let sql = format!(
            "SELECT {} FROM branches WHERE repository_id = ?1 AND id = ?2",
            BRANCH_COLUMNS
        );
        self.db
            .transact(ctx, TxMode::ReadOnly, |tx| {
                tx.get::<BranchRecord>(
                    &sql,
                    &[repository_id.as_str().into(), branch_id.as_str().into()],
                )
            })
            .map(|record| record.branch)
            .map_err(|e| not_found(e, || Error::BranchNotFound(branch_id.to_string())))
    }

    /// Create or replace the branch.
    ///
    /// This is a plain upsert: concurrent writers on one branch are
    /// last-writer-wins and no conflict is reported.
    pub fn set_branch(
        &self,
        ctx: &Context,
        repository_id: &RepositoryId,
        branch_id: &BranchId,
        branch: &Branch,
    ) -> Result<()> {
        debug!(
            repository = %repository_id,
            branch = %branch_id,
            commit = %branch.commit_id,
            "set branch"
        );
        self.db.transact(ctx, TxMode::ReadWrite, |tx| {
            tx.exec(
                "INSERT INTO branches (repository_id, id, staging_token, commit_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (repository_id, id)
                 DO UPDATE SET staging_token = excluded.staging_token, commit_id = excluded.commit_id",
                &[
                    repository_id.as_str().into(),
                    branch_id.as_str().into(),
                    branch.staging_token.as_str().into(),
                    branch.commit_id.as_str().into(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn delete_branch(
        &self,
        ctx: &Context,
        repository_id: &RepositoryId,
        branch_id: &BranchId,
    ) -> Result<()> {
        debug!(repository = %repository_id, branch = %branch_id, "delete branch");
        self.db.transact(ctx, TxMode::ReadWrite, |tx| {
            let deleted = tx.exec(
                "DELETE FROM branches WHERE repository_id = ?1 AND id = ?2",
                &[repository_id.as_str().into(), branch_id.as_str().into()],
            )?;
            if deleted == 0 {
                return Err(Error::BranchNotFound(branch_id.to_string()));
            }
            Ok(())
        })
    }

    /// Branches of one repository with id >= `from`, ascending.
    pub fn list_branches(
        &self,
        ctx: &Context,
        repository_id: &RepositoryId,
        from: &BranchId,
    ) -> BranchIterator<'_, D> {
        debug!(repository = %repository_id, from = %from, "list branches");
        PagedIterator::new(
            &self.db,
            ctx,
            BranchPages {
                repository_id: repository_id.clone(),
            },
            Some(Cursor::From(from.to_string())),
            self.prefetch_size,
        )
    }

    // Commit operations

    /// Store `commit` under its content address. Re-adding identical content is
    /// a no-op that returns the same id.
    pub fn add_commit(
        &self,
        ctx: &Context,
        repository_id: &RepositoryId,
        commit: &Commit,
    ) -> Result<CommitId> {
        let commit_id = commit.id();
        debug!(repository = %repository_id, commit = %commit_id, "add commit");
        let parents = serde_json::to_string(&commit.parents)?;
        let metadata = serde_json::to_string(&commit.metadata)?;

        self.db.transact(ctx, TxMode::ReadWrite, |tx| {
            // Same id means same content, so an existing row is left as is.
            tx.exec(
                "INSERT INTO commits
                 (repository_id, id, committer, message, creation_date, parents, tree_id, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (repository_id, id) DO NOTHING",
                &[
                    repository_id.as_str().into(),
                    commit_id.as_str().into(),
                    commit.committer.as_str().into(),
                    commit.message.as_str().into(),
                    format_timestamp(&commit.creation_date).into(),
                    parents.as_str().into(),
                    commit.tree_id.as_str().into(),
                    metadata.as_str().into(),
                ],
            )?;
            Ok(())
        })?;
        Ok(commit_id)
    }

    /// Look up a commit by full id or by a prefix matching exactly one commit.
    ///
    /// A prefix matching several commits fails with
    /// [`Error::AmbiguousCommitId`], which [`Error::is_not_found`] treats like
    /// an absent commit.
    pub fn get_commit(
        &self,
        ctx: &Context,
        repository_id: &RepositoryId,
        commit_id: &CommitId,
    ) -> Result<CommitRecord> {
        debug!(repository = %repository_id, commit = %commit_id, "get commit");
        if commit_id.is_empty() {
            return Err(Error::CommitNotFound(String::new()));
        }
        let sql = format!(
            "SELECT {} FROM commits WHERE repository_id = ?1 AND id >= ?2 ORDER BY id ASC LIMIT 2",
            COMMIT_COLUMNS
        );
        // Matches are contiguous in id order, so two rows are enough to tell
        // "unique" from "ambiguous".
        let records: Vec<CommitRecord> = self.db.transact(ctx, TxMode::ReadOnly, |tx| {
            tx.select(&sql, &[repository_id.as_str().into(), commit_id.as_str().into()])
        })?;

        let mut matches = records
            .into_iter()
            .filter(|record| record.id.has_prefix(commit_id.as_str()));
        match (matches.next(), matches.next()) {
            (None, _) => Err(Error::CommitNotFound(commit_id.to_string())),
            (Some(record), None) => Ok(record),
            (Some(_), Some(_)) => {
                warn!(repository = %repository_id, prefix = %commit_id, "ambiguous commit prefix");
                Err(Error::AmbiguousCommitId(commit_id.to_string()))
            }
        }
    }

    /// First-parent history starting at `from`, newest first.
    pub fn log(&self, ctx: &Context, repository_id: &RepositoryId, from: &CommitId) -> CommitLog<'_, D> {
        debug!(repository = %repository_id, from = %from, "log");
        let start = if from.is_empty() {
            None
        } else {
            Some(Cursor::From(from.to_string()))
        };
        PagedIterator::new(
            &self.db,
            ctx,
            LogPages {
                repository_id: repository_id.clone(),
            },
            start,
            self.prefetch_size,
        )
    }

    pub fn find_merge_base(
        &self,
        ctx: &Context,
        repository_id: &RepositoryId,
        commit_ids: &[CommitId],
    ) -> Result<CommitRecord> {
        debug!(repository = %repository_id, commits = commit_ids.len(), "find merge base");
        merge_base::find_merge_base(ctx, self, repository_id, commit_ids)
    }

    /// Resolve a ref expression such as `main~2^` to a commit.
    pub fn rev_parse(&self, ctx: &Context, repository_id: &RepositoryId, reference: &Ref) -> Result<Reference> {
        debug!(repository = %repository_id, reference = %reference, "rev-parse");
        revparse::resolve_ref(ctx, self, repository_id, reference)
    }
}

impl<D: Database> RefReader for RefManager<D> {
    fn get_branch(&self, ctx: &Context, repository_id: &RepositoryId, branch_id: &BranchId) -> Result<Branch> {
        RefManager::get_branch(self, ctx, repository_id, branch_id)
    }

    fn get_commit(&self, ctx: &Context, repository_id: &RepositoryId, commit_id: &CommitId) -> Result<CommitRecord> {
        RefManager::get_commit(self, ctx, repository_id, commit_id)
    }
}

/// Replace the store's "row absent" sentinel with a domain error.
fn not_found(err: Error, domain: impl FnOnce() -> Error) -> Error {
    match err {
        Error::RowNotFound => domain(),
        other => other,
    }
}

pub struct RepositoryPages;

impl PageFetcher for RepositoryPages {
    type Item = RepositoryRecord;

    fn fetch(&self, tx: &mut dyn Tx, cursor: &Cursor, limit: usize) -> Result<Page<RepositoryRecord>> {
        let sql = format!(
            "SELECT {} FROM repositories WHERE id {} ?1 ORDER BY id ASC LIMIT ?2",
            REPOSITORY_COLUMNS,
            cursor.operator()
        );
        let items = tx.select(&sql, &[cursor.key().into(), limit.into()])?;
        Ok(Page::ascending(items, limit, |r: &RepositoryRecord| r.id.to_string()))
    }
}

pub struct BranchPages {
    repository_id: RepositoryId,
}

impl PageFetcher for BranchPages {
    type Item = BranchRecord;

    fn fetch(&self, tx: &mut dyn Tx, cursor: &Cursor, limit: usize) -> Result<Page<BranchRecord>> {
        let sql = format!(
            "SELECT {} FROM branches WHERE repository_id = ?1 AND id {} ?2 ORDER BY id ASC LIMIT ?3",
            BRANCH_COLUMNS,
            cursor.operator()
        );
        let items = tx.select(
            &sql,
            &[self.repository_id.as_str().into(), cursor.key().into(), limit.into()],
        )?;
        Ok(Page::ascending(items, limit, |b: &BranchRecord| b.id.to_string()))
    }
}

/// Walks first parents, `limit` commits per transaction.
pub struct LogPages {
    repository_id: RepositoryId,
}

impl LogPages {
    fn commit(&self, tx: &mut dyn Tx, commit_id: &str) -> Result<CommitRecord> {
        let sql = format!(
            "SELECT {} FROM commits WHERE repository_id = ?1 AND id = ?2",
            COMMIT_COLUMNS
        );
        tx.get::<CommitRecord>(&sql, &[self.repository_id.as_str().into(), commit_id.into()])
            .map_err(|e| not_found(e, || Error::CommitNotFound(commit_id.to_string())))
    }
}

impl PageFetcher for LogPages {
    type Item = CommitRecord;

    fn fetch(&self, tx: &mut dyn Tx, cursor: &Cursor, limit: usize) -> Result<Page<CommitRecord>> {
        let mut next = match cursor {
            Cursor::From(id) => Some(CommitId::new(id.as_str())),
            Cursor::After(_) => {
                return Err(Error::InvalidOperation(
                    "log resumes only from a commit id".to_string(),
                ))
            }
        };
        let mut items = Vec::new();
        while items.len() < limit {
            let Some(commit_id) = next.take() else {
                break;
            };
            let record = self.commit(tx, commit_id.as_str())?;
            next = record.parents().first().cloned();
            items.push(record);
        }
        Ok(Page {
            items,
            next: next.map(|id| Cursor::From(id.to_string())),
        })
    }
}

impl FromRow for RepositoryRecord {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(RepositoryRecord {
            id: RepositoryId::from(row.text(0)?),
            repository: Repository {
                storage_namespace: row.text(1)?.to_string(),
                creation_date: parse_timestamp(row.text(2)?)?,
                default_branch_id: BranchId::from(row.text(3)?),
            },
        })
    }
}

impl FromRow for BranchRecord {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(BranchRecord {
            id: BranchId::from(row.text(0)?),
            branch: Branch {
                staging_token: StagingToken::from(row.text(1)?),
                commit_id: CommitId::from(row.text(2)?),
            },
        })
    }
}

impl FromRow for CommitRecord {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(CommitRecord {
            id: CommitId::from(row.text(0)?),
            commit: Commit {
                committer: row.text(1)?.to_string(),
                message: row.text(2)?.to_string(),
                creation_date: parse_timestamp(row.text(3)?)?,
                parents: serde_json::from_str(row.text(4)?)?,
                tree_id: TreeId::from(row.text(5)?),
                metadata: serde_json::from_str(row.text(6)?)?,
            },
        })
    }
}
