use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(RepositoryId);
string_id!(BranchId);
string_id!(
    /// Hex-encoded SHA-256 of a commit's content. The empty id stands for
    /// "no commit yet" on a fresh branch.
    CommitId
);
string_id!(
    /// Names the mutable write buffer layered over a branch's last commit.
    StagingToken
);
string_id!(TreeId);
string_id!(
    /// A textual ref expression such as `main~2^`.
    Ref
);

impl CommitId {
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl StagingToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub storage_namespace: String,
    pub creation_date: DateTime<Utc>,
    pub default_branch_id: BranchId,
}

impl Repository {
    pub fn new(storage_namespace: impl Into<String>, default_branch_id: impl Into<BranchId>) -> Self {
        Self {
            storage_namespace: storage_namespace.into(),
            creation_date: Utc::now(),
            default_branch_id: default_branch_id.into(),
        }
    }

    pub fn with_creation_date(mut self, creation_date: DateTime<Utc>) -> Self {
        self.creation_date = creation_date;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: RepositoryId,
    pub repository: Repository,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub commit_id: CommitId,
    pub staging_token: StagingToken,
}

impl Branch {
    pub fn new(commit_id: CommitId, staging_token: StagingToken) -> Self {
        Self {
            commit_id,
            staging_token,
        }
    }

    /// A branch with no commit yet and a fresh staging token.
    pub fn empty() -> Self {
        Self::new(CommitId::default(), StagingToken::generate())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub id: BranchId,
    pub branch: Branch,
}

/// Commit content. The id is not stored in the struct; it is derived from
/// every field by [`Commit::id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub committer: String,
    pub message: String,
    pub creation_date: DateTime<Utc>,
    pub parents: Vec<CommitId>,
    pub tree_id: TreeId,
    pub metadata: BTreeMap<String, String>,
}

impl Commit {
    pub fn new(committer: impl Into<String>, message: impl Into<String>, tree_id: impl Into<TreeId>) -> Self {
        Self {
            committer: committer.into(),
            message: message.into(),
            creation_date: Utc::now(),
            parents: Vec::new(),
            tree_id: tree_id.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = CommitId>) -> Self {
        self.parents.extend(parents);
        self
    }

    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }

    pub fn with_creation_date(mut self, creation_date: DateTime<Utc>) -> Self {
        self.creation_date = creation_date;
        self
    }

    /// Content address of this commit.
    ///
    /// Every field is fed to SHA-256 with a length prefix so that no two
    /// distinct field layouts hash the same byte stream. Metadata is hashed in
    /// key order and parents in their given order.
    pub fn id(&self) -> CommitId {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, self.committer.as_bytes());
        hash_field(&mut hasher, self.message.as_bytes());
        hash_field(&mut hasher, format_timestamp(&self.creation_date).as_bytes());
        hasher.update((self.parents.len() as u64).to_le_bytes());
        for parent in &self.parents {
            hash_field(&mut hasher, parent.as_str().as_bytes());
        }
        hash_field(&mut hasher, self.tree_id.as_str().as_bytes());
        hasher.update((self.metadata.len() as u64).to_le_bytes());
        for (key, value) in &self.metadata {
            hash_field(&mut hasher, key.as_bytes());
            hash_field(&mut hasher, value.as_bytes());
        }
        CommitId(hex::encode(hasher.finalize()))
    }
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Canonical timestamp text, shared by hashing and storage so a commit read
/// back from the store hashes to the id it was stored under.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidOperation(format!("bad timestamp {:?}: {}", text, e)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub id: CommitId,
    pub commit: Commit,
}

impl CommitRecord {
    pub fn from_commit(commit: Commit) -> Self {
        Self {
            id: commit.id(),
            commit,
        }
    }

    pub fn parents(&self) -> &[CommitId] {
        &self.commit.parents
    }
}

/// Result of resolving a ref expression.
///
/// The staging token is only present when the expression named a branch and
/// applied no ancestry modifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub commit_id: CommitId,
    pub staging_token: Option<StagingToken>,
}

impl Reference {
    pub fn is_branch_tip(&self) -> bool {
        self.staging_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_commit() -> Commit {
        Commit::new("alice", "initial", "tree-1")
            .with_creation_date(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_commit_id_is_deterministic() {
        let a = fixed_commit().with_metadata("k".to_string(), "v".to_string());
        let b = fixed_commit().with_metadata("k".to_string(), "v".to_string());

        assert_eq!(a.id(), b.id());
        assert_eq!(64, a.id().as_str().len());
    }

    #[test]
    fn test_commit_id_changes_with_any_field() {
        let base = fixed_commit();
        let id = base.id();

        let mut other = base.clone();
        other.committer = "bob".to_string();
        assert_ne!(id, other.id());

        let mut other = base.clone();
        other.message = "second".to_string();
        assert_ne!(id, other.id());

        let other = base.clone().with_creation_date(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 1).unwrap());
        assert_ne!(id, other.id());

        let other = base.clone().with_parent(CommitId::from("abc"));
        assert_ne!(id, other.id());

        let mut other = base.clone();
        other.tree_id = TreeId::from("tree-2");
        assert_ne!(id, other.id());

        let other = base.clone().with_metadata("k".to_string(), "v".to_string());
        assert_ne!(id, other.id());
    }

    #[test]
    fn test_parent_order_matters() {
        let ab = fixed_commit().with_parents([CommitId::from("a"), CommitId::from("b")]);
        let ba = fixed_commit().with_parents([CommitId::from("b"), CommitId::from("a")]);

        assert_ne!(ab.id(), ba.id());
    }

    #[test]
    fn test_field_boundaries_are_hashed() {
        let a = Commit::new("ab", "c", "t").with_creation_date(fixed_commit().creation_date);
        let b = Commit::new("a", "bc", "t").with_creation_date(fixed_commit().creation_date);

        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_commit_id_prefix() {
        let id = CommitId::from("abcdef");
        assert!(id.has_prefix("abc"));
        assert!(id.has_prefix(""));
        assert!(!id.has_prefix("abd"));
    }

    #[test]
    fn test_timestamp_text_keeps_nanoseconds() {
        let ts = Utc.timestamp_opt(1_600_000_000, 123_456_789).unwrap();
        assert_eq!(ts, parse_timestamp(&format_timestamp(&ts)).unwrap());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_empty_branch() {
        let branch = Branch::empty();
        assert!(branch.commit_id.is_empty());
        assert!(!branch.staging_token.is_empty());
        assert_ne!(branch.staging_token, Branch::empty().staging_token);
    }
}
