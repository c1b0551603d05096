use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Store sentinel for an absent row. The reference manager remaps it to
    /// one of the entity-specific not-found variants.
    #[error("Row not found")]
    RowNotFound,

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    #[error("Ambiguous commit id: {0}")]
    AmbiguousCommitId(String),

    #[error("Invalid ref: {0}")]
    InvalidRef(String),

    #[error("No such parent: commit {commit} has no parent #{parent}")]
    NoSuchParent { commit: String, parent: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// True for every flavor of "nothing resolved": absent repository, branch
    /// or commit, and a commit prefix matching more than one commit.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::RowNotFound
                | Error::RepositoryNotFound(_)
                | Error::BranchNotFound(_)
                | Error::CommitNotFound(_)
                | Error::AmbiguousCommitId(_)
        )
    }

    /// True when the caller's context ended the operation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_counts_as_not_found() {
        assert!(Error::AmbiguousCommitId("ab".to_string()).is_not_found());
        assert!(Error::CommitNotFound("ab".to_string()).is_not_found());
        assert!(!Error::InvalidRef("^".to_string()).is_not_found());
        assert!(!Error::NoSuchParent {
            commit: "ab".to_string(),
            parent: 2
        }
        .is_not_found());
    }

    #[test]
    fn test_cancellation_kinds() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(!Error::RowNotFound.is_cancellation());
    }
}
