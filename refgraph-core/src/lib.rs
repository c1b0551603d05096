//! # refgraph-core
//!
//! Core library for refgraph - a Git-like commit graph of repositories,
//! branches and content-addressed commits kept in a transactional store.
//!
//! This crate provides the data model, the reference manager over the
//! [`store::Database`] contract, the ref-expression parser and resolver, the
//! merge-base search and the paged iteration used by the list operations.

pub mod config;
pub mod context;
pub mod error;
pub mod iterator;
pub mod manager;
pub mod merge_base;
pub mod models;
pub mod revparse;
pub mod store;

pub use config::Config;
pub use context::Context;
pub use error::{Error, Result};
pub use iterator::{IterStatus, PagedIterator};
pub use manager::{BranchIterator, CommitLog, RefManager, RepositoryIterator};
pub use models::{
    Branch, BranchId, BranchRecord, Commit, CommitId, CommitRecord, Ref, Reference, Repository,
    RepositoryId, RepositoryRecord, StagingToken, TreeId,
};
pub use revparse::{parse_rev, ParsedRev, RefReader, RevModifier};
pub use store::{Database, SqliteDatabase, TxMode};
