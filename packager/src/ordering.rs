//! Dependency-first ordering of a closure.

use crate::closure::{Closure, ClosureMember};
use crate::naming::UNKNOWN_VERSION;
use crate::store_path::StorePath;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// The dependency relation of a closure contains a cycle.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("dependency cycle among {} store paths: {}", .members.len(), join(.members))]
pub struct CycleDetectedError {
    /// Members that could not be placed.
    pub members: Vec<StorePath>,
}

fn join(paths: &[StorePath]) -> String {
    paths
        .iter()
        .map(StorePath::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stable tie-break key: inferred name, then rendered version, then store
/// path. Members without a version sort as [`UNKNOWN_VERSION`].
type SortKey<'a> = (&'a str, &'a str, &'a StorePath);

fn sort_key(member: &ClosureMember) -> SortKey<'_> {
    let parsed = member.parsed_name();
    (
        parsed.name(),
        parsed.version().unwrap_or(UNKNOWN_VERSION),
        member.store_path(),
    )
}

/// Order `closure` so every member follows all of its direct dependencies.
///
/// Uses Kahn's algorithm with an ordered ready set, so members with no
/// constraint between them come out by name, then version, then store path.
///
/// # Errors
///
/// Returns [`CycleDetectedError`] listing the members left unplaced when the
/// dependency relation is cyclic.
pub fn order(closure: &Closure) -> Result<Vec<&ClosureMember>, CycleDetectedError> {
    let mut remaining: BTreeMap<&StorePath, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&StorePath, Vec<&ClosureMember>> = BTreeMap::new();

    for member in closure.members() {
        let deps = member
            .dependencies()
            .iter()
            .filter(|dep| closure.get(dep).is_some());
        let mut count = 0;
        for dep in deps {
            dependents.entry(dep).or_default().push(member);
            count += 1;
        }
        remaining.insert(member.store_path(), count);
    }

    let mut ready: BTreeMap<SortKey<'_>, &ClosureMember> = closure
        .members()
        .filter(|member| remaining.get(member.store_path()) == Some(&0))
        .map(|member| (sort_key(member), member))
        .collect();
    let mut ordered = Vec::with_capacity(closure.len());

    while let Some((_, member)) = ready.pop_first() {
        ordered.push(member);
        for dependent in dependents.get(member.store_path()).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent.store_path()) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(sort_key(dependent), *dependent);
                }
            }
        }
    }

    if ordered.len() != closure.len() {
        let placed: BTreeSet<&StorePath> = ordered.iter().map(|m| m.store_path()).collect();
        let members = closure
            .members()
            .map(ClosureMember::store_path)
            .filter(|path| !placed.contains(path))
            .cloned()
            .collect();
        return Err(CycleDetectedError { members });
    }

    log::debug!("ordered {} closure members", ordered.len());
    Ok(ordered)
}
