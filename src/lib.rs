//! # refgraph
//!
//! Facade over [`refgraph_core`]. See that crate for the reference manager,
//! the ref-expression parser and the merge-base search.

pub use refgraph_core::*;
