//! Ref expressions: `base` followed by any number of `^N` / `~N` ancestry
//! modifiers, e.g. `main~2^`.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::models::{Branch, BranchId, CommitId, CommitRecord, Ref, Reference, RepositoryId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevModifier {
    /// N-th parent, 1-indexed. `^0` is the commit itself.
    Caret(u32),
    /// N generations back along first parents.
    Tilde(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRev {
    pub base_rev: String,
    pub modifiers: Vec<RevModifier>,
}

/// Split a ref into its base and modifiers.
///
/// The base runs up to the first `^` or `~` and must be non-empty. Each
/// modifier may carry a decimal qualifier, 1 when omitted.
pub fn parse_rev(reference: &Ref) -> Result<ParsedRev> {
    let text = reference.as_str();
    let invalid = || Error::InvalidRef(text.to_string());

    let base_len = text.find(['^', '~']).unwrap_or(text.len());
    if base_len == 0 {
        return Err(invalid());
    }
    let (base, mut rest) = text.split_at(base_len);

    let mut modifiers = Vec::new();
    while let Some(kind) = rest.chars().next() {
        rest = &rest[1..];
        let digits_len = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (digits, tail) = rest.split_at(digits_len);
        if !(tail.is_empty() || tail.starts_with(['^', '~'])) {
            return Err(invalid());
        }
        let value = if digits.is_empty() {
            1
        } else {
            digits.parse::<u32>().map_err(|_| invalid())?
        };
        modifiers.push(match kind {
            '^' => RevModifier::Caret(value),
            _ => RevModifier::Tilde(value),
        });
        rest = tail;
    }

    Ok(ParsedRev {
        base_rev: base.to_string(),
        modifiers,
    })
}

/// Point lookups the resolver and the merge-base walk need.
pub trait RefReader {
    fn get_branch(&self, ctx: &Context, repository_id: &RepositoryId, branch_id: &BranchId) -> Result<Branch>;

    fn get_commit(&self, ctx: &Context, repository_id: &RepositoryId, commit_id: &CommitId) -> Result<CommitRecord>;
}

/// Resolve a ref expression to a commit.
///
/// The base is tried as a branch name first, then as a commit id or unique
/// prefix. A bare branch keeps its staging token; any modifier drops it.
pub fn resolve_ref<R: RefReader + ?Sized>(
    ctx: &Context,
    reader: &R,
    repository_id: &RepositoryId,
    reference: &Ref,
) -> Result<Reference> {
    let parsed = parse_rev(reference)?;

    let (mut commit_id, staging_token) =
        match reader.get_branch(ctx, repository_id, &BranchId::new(parsed.base_rev.as_str())) {
            Ok(branch) => (branch.commit_id, Some(branch.staging_token)),
            Err(Error::BranchNotFound(_)) => {
                let record = reader.get_commit(ctx, repository_id, &CommitId::new(parsed.base_rev.as_str()))?;
                (record.id, None)
            }
            Err(e) => return Err(e),
        };

    if parsed.modifiers.is_empty() {
        return Ok(Reference {
            commit_id,
            staging_token,
        });
    }

    // A branch that never received a commit has no history to walk.
    if commit_id.is_empty() {
        return Err(Error::CommitNotFound(parsed.base_rev));
    }

    for modifier in &parsed.modifiers {
        let (parent, hops) = match *modifier {
            RevModifier::Caret(n) => (n, 1),
            RevModifier::Tilde(n) => (1, n),
        };
        for _ in 0..hops {
            if parent == 0 {
                break;
            }
            ctx.check()?;
            let record = reader.get_commit(ctx, repository_id, &commit_id)?;
            commit_id = record
                .parents()
                .get(parent as usize - 1)
                .cloned()
                .ok_or_else(|| Error::NoSuchParent {
                    commit: record.id.to_string(),
                    parent,
                })?;
        }
    }
    debug!(reference = %reference, commit = %commit_id, "resolved ref");

    Ok(Reference {
        commit_id,
        staging_token: None,
    })
}
