use crate::context::Context;
use crate::error::{Error, Result};
use crate::models::{CommitId, CommitRecord, RepositoryId};
use crate::revparse::RefReader;
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Lowest common ancestor of `commit_ids`.
///
/// Every input gets a breadth-first walk recording each ancestor's minimum
/// distance from it. Among the ancestors reachable from all inputs the one
/// with the smallest maximum distance wins; ties go to the newest creation
/// date, then to the smallest id. Inputs may be unique id prefixes.
pub fn find_merge_base<R: RefReader + ?Sized>(
    ctx: &Context,
    reader: &R,
    repository_id: &RepositoryId,
    commit_ids: &[CommitId],
) -> Result<CommitRecord> {
    if commit_ids.is_empty() {
        return Err(Error::InvalidOperation(
            "merge base needs at least one commit".to_string(),
        ));
    }

    // Commits are immutable, so one fetch per id serves every walk.
    let mut cache = HashMap::new();
    let mut walks = Vec::with_capacity(commit_ids.len());
    for commit_id in commit_ids {
        let record = reader.get_commit(ctx, repository_id, commit_id)?;
        let start = record.id.clone();
        cache.entry(start.clone()).or_insert(record);
        walks.push(ancestor_distances(ctx, reader, repository_id, &mut cache, start)?);
    }

    let Some((first, rest)) = walks.split_first() else {
        return Err(Error::CommitNotFound(String::new()));
    };
    let mut best: Option<(u32, &CommitRecord)> = None;
    for (id, &distance) in first {
        let Some(max_distance) = rest.iter().try_fold(distance, |max, walk| {
            walk.get(id).map(|&d| max.max(d))
        }) else {
            continue;
        };
        let Some(candidate) = cache.get(id) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((best_distance, current)) => rank(max_distance, candidate) < rank(best_distance, current),
        };
        if better {
            best = Some((max_distance, candidate));
        }
    }

    match best {
        Some((distance, record)) => {
            debug!(commit = %record.id, distance, "found merge base");
            Ok(record.clone())
        }
        None => Err(Error::CommitNotFound(format!(
            "no common ancestor of {}",
            commit_ids
                .iter()
                .map(CommitId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

fn rank(distance: u32, record: &CommitRecord) -> (u32, Reverse<chrono::DateTime<chrono::Utc>>, &CommitId) {
    (distance, Reverse(record.commit.creation_date), &record.id)
}

/// Every ancestor of `start`, itself included, with its minimum distance.
fn ancestor_distances<R: RefReader + ?Sized>(
    ctx: &Context,
    reader: &R,
    repository_id: &RepositoryId,
    cache: &mut HashMap<CommitId, CommitRecord>,
    start: CommitId,
) -> Result<HashMap<CommitId, u32>> {
    let mut distances = HashMap::new();
    let mut queue = VecDeque::new();
    distances.insert(start.clone(), 0);
    queue.push_back((start, 0u32));

    while let Some((commit_id, distance)) = queue.pop_front() {
        ctx.check()?;
        let record = fetch(ctx, reader, repository_id, cache, &commit_id)?;
        for parent in record.parents() {
            if !distances.contains_key(parent) {
                distances.insert(parent.clone(), distance + 1);
                queue.push_back((parent.clone(), distance + 1));
            }
        }
    }

    Ok(distances)
}

fn fetch<'c, R: RefReader + ?Sized>(
    ctx: &Context,
    reader: &R,
    repository_id: &RepositoryId,
    cache: &'c mut HashMap<CommitId, CommitRecord>,
    commit_id: &CommitId,
) -> Result<&'c CommitRecord> {
    match cache.entry(commit_id.clone()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let record = reader.get_commit(ctx, repository_id, commit_id)?;
            Ok(entry.insert(record))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::RefManager;
    use crate::models::{Branch, Commit, Repository};
    use crate::store::SqliteDatabase;
    use chrono::{TimeZone, Utc};

    struct Fixture {
        mgr: RefManager<SqliteDatabase>,
        repo: RepositoryId,
    }

    impl Fixture {
        fn new() -> Self {
            let mgr = RefManager::new(SqliteDatabase::temporary().unwrap());
            let repo = RepositoryId::from("repo");
            mgr.create_repository(
                &Context::background(),
                &repo,
                &Repository::new("s3://bucket", "main"),
                &Branch::empty(),
            )
            .unwrap();
            Self { mgr, repo }
        }

        /// Commit created `secs` seconds into 2021.
        fn commit(&self, message: &str, parents: &[&CommitId], secs: u32) -> CommitId {
            let commit = Commit::new("tester", message, "tree")
                .with_creation_date(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, secs).unwrap())
                .with_parents(parents.iter().map(|p| (*p).clone()));
            self.mgr.add_commit(&Context::background(), &self.repo, &commit).unwrap()
        }

        fn base(&self, ids: &[&CommitId]) -> Result<CommitId> {
            let ids: Vec<CommitId> = ids.iter().map(|id| (*id).clone()).collect();
            self.mgr
                .find_merge_base(&Context::background(), &self.repo, &ids)
                .map(|record| record.id)
        }
    }

    #[test]
    fn test_commit_is_its_own_base() {
        let f = Fixture::new();
        let c = f.commit("c", &[], 0);

        assert_eq!(c, f.base(&[&c, &c]).unwrap());
        assert_eq!(c, f.base(&[&c]).unwrap());
    }

    #[test]
    fn test_linear_history() {
        let f = Fixture::new();
        let c1 = f.commit("c1", &[], 0);
        let c2 = f.commit("c2", &[&c1], 1);
        let c3 = f.commit("c3", &[&c2], 2);

        assert_eq!(c2, f.base(&[&c3, &c2]).unwrap());
        assert_eq!(c1, f.base(&[&c1, &c3]).unwrap());
    }

    #[test]
    fn test_fork_picks_closest_common_ancestor() {
        let f = Fixture::new();
        let root = f.commit("root", &[], 0);
        let fork = f.commit("fork", &[&root], 1);
        let left = f.commit("left", &[&fork], 2);
        let right1 = f.commit("right1", &[&fork], 3);
        let right2 = f.commit("right2", &[&right1], 4);

        assert_eq!(fork, f.base(&[&left, &right2]).unwrap());
    }

    #[test]
    fn test_criss_cross_prefers_newest() {
        let f = Fixture::new();
        let root = f.commit("root", &[], 0);
        let a1 = f.commit("a1", &[&root], 1);
        let b1 = f.commit("b1", &[&root], 2);
        let a2 = f.commit("a2", &[&a1, &b1], 3);
        let b2 = f.commit("b2", &[&b1, &a1], 4);

        assert_eq!(b1, f.base(&[&a2, &b2]).unwrap());
        assert_eq!(b1, f.base(&[&b2, &a2]).unwrap());
    }

    #[test]
    fn test_criss_cross_same_date_prefers_smallest_id() {
        let f = Fixture::new();
        let root = f.commit("root", &[], 0);
        let a1 = f.commit("a1", &[&root], 1);
        let b1 = f.commit("b1", &[&root], 1);
        let a2 = f.commit("a2", &[&a1, &b1], 2);
        let b2 = f.commit("b2", &[&b1, &a1], 2);

        let expected = a1.clone().min(b1.clone());
        assert_eq!(expected, f.base(&[&a2, &b2]).unwrap());
    }

    #[test]
    fn test_octopus_inputs() {
        let f = Fixture::new();
        let root = f.commit("root", &[], 0);
        let x = f.commit("x", &[&root], 1);
        let y = f.commit("y", &[&root], 2);
        let z = f.commit("z", &[&root], 3);
        let xy = f.commit("xy", &[&x, &y], 4);

        assert_eq!(root, f.base(&[&x, &y, &z]).unwrap());
        assert_eq!(x, f.base(&[&xy, &x]).unwrap());
    }

    #[test]
    fn test_inputs_by_prefix() {
        let f = Fixture::new();
        let c1 = f.commit("c1", &[], 0);
        let c2 = f.commit("c2", &[&c1], 1);
        let short = CommitId::from(&c2.as_str()[..16]);

        assert_eq!(c2, f.base(&[&short, &c2]).unwrap());
    }

    #[test]
    fn test_disjoint_histories() {
        let f = Fixture::new();
        let a = f.commit("a", &[], 0);
        let b = f.commit("b", &[], 1);

        let err = f.base(&[&a, &b]).unwrap_err();
        assert!(matches!(err, Error::CommitNotFound(_)));
    }

    #[test]
    fn test_unknown_input() {
        let f = Fixture::new();
        let a = f.commit("a", &[], 0);

        let err = f.base(&[&a, &CommitId::from("ffff")]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_no_inputs() {
        let f = Fixture::new();
        assert!(matches!(f.base(&[]), Err(Error::InvalidOperation(_))));
    }
}
