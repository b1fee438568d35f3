//! Runtime closure discovery.
//!
//! [`StorePathResolver`] walks the "references" relation of the store from a
//! root path and returns every reachable store path exactly once, each
//! annotated with its inferred name and version.

use crate::exec::{CommandExecutor, failure_detail, tool_path};
use crate::naming::{ParsedName, parse_name};
use crate::store_path::{StorePath, StorePathError};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

/// Errors raised while discovering a closure.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The root store path is not present in the store.
    #[error("store path {path} does not exist")]
    RootMissing {
        /// The missing root.
        path: Utf8PathBuf,
    },

    /// Store metadata for a path could not be read.
    #[error("failed to query references of {path}: {reason}")]
    QueryFailed {
        /// Path whose references were requested.
        path: Utf8PathBuf,
        /// Diagnostic from the store.
        reason: String,
    },

    /// The store reported a reference that is not a store path.
    #[error("{path} references an invalid store path")]
    InvalidReference {
        /// Path whose references were requested.
        path: Utf8PathBuf,
        /// Why the reference was rejected.
        #[source]
        source: StorePathError,
    },
}

/// Store metadata consumed by [`StorePathResolver`].
#[cfg_attr(test, mockall::automock)]
pub trait StoreQuery {
    /// Whether `path` exists in the store.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::QueryFailed`] when the store cannot be
    /// inspected.
    fn contains(&self, path: &StorePath) -> Result<bool, ResolutionError>;

    /// Direct runtime references of `path`. May include `path` itself.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError`] when the metadata cannot be read or names
    /// something outside the store.
    fn references(&self, path: &StorePath) -> Result<Vec<StorePath>, ResolutionError>;
}

/// [`StoreQuery`] backed by the local store and `nix-store`.
pub struct NixStoreQuery<'a> {
    executor: &'a dyn CommandExecutor,
    store_root: Utf8PathBuf,
    nix_store: String,
}

impl<'a> NixStoreQuery<'a> {
    /// Query the store at `store_root`, finding `nix-store` in `bin_dir` or
    /// on `PATH`.
    #[must_use]
    pub fn new(
        executor: &'a dyn CommandExecutor,
        store_root: &Utf8Path,
        bin_dir: Option<&Utf8Path>,
    ) -> Self {
        Self {
            executor,
            store_root: store_root.to_owned(),
            nix_store: tool_path(bin_dir, "nix-store"),
        }
    }

    fn query_failed(path: &StorePath, reason: String) -> ResolutionError {
        ResolutionError::QueryFailed {
            path: path.as_path().to_owned(),
            reason,
        }
    }
}

impl StoreQuery for NixStoreQuery<'_> {
    fn contains(&self, path: &StorePath) -> Result<bool, ResolutionError> {
        Ok(path.as_path().is_dir())
    }

    fn references(&self, path: &StorePath) -> Result<Vec<StorePath>, ResolutionError> {
        let output = self
            .executor
            .run(&self.nix_store, &["--query", "--references", path.as_str()])
            .map_err(|err| Self::query_failed(path, err.to_string()))?;
        if !output.status.success() {
            return Err(Self::query_failed(path, failure_detail(&output)));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                StorePath::parse(Utf8Path::new(line), &self.store_root).map_err(|source| {
                    ResolutionError::InvalidReference {
                        path: path.as_path().to_owned(),
                        source,
                    }
                })
            })
            .collect()
    }
}

/// One store path of a closure with its direct dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureMember {
    store_path: StorePath,
    dependencies: BTreeSet<StorePath>,
    parsed_name: ParsedName,
}

impl ClosureMember {
    /// Annotate `store_path` with its inferred name.
    #[must_use]
    pub fn new(store_path: StorePath, dependencies: BTreeSet<StorePath>) -> Self {
        let parsed_name = parse_name(store_path.raw_name());
        Self {
            store_path,
            dependencies,
            parsed_name,
        }
    }

    /// The member's store path.
    #[must_use]
    pub fn store_path(&self) -> &StorePath {
        &self.store_path
    }

    /// Direct runtime dependencies, excluding the member itself.
    #[must_use]
    pub fn dependencies(&self) -> &BTreeSet<StorePath> {
        &self.dependencies
    }

    /// Inferred name and version.
    #[must_use]
    pub fn parsed_name(&self) -> &ParsedName {
        &self.parsed_name
    }

    /// Where the tree is placed at install time. Store paths are never
    /// relocated, so this is the store path itself.
    #[must_use]
    pub fn install_target(&self) -> &Utf8Path {
        self.store_path.as_path()
    }
}

/// The transitive runtime closure of one root store path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    root: StorePath,
    members: BTreeMap<StorePath, ClosureMember>,
}

impl Closure {
    /// The path the closure was resolved from.
    #[must_use]
    pub fn root(&self) -> &StorePath {
        &self.root
    }

    /// Look up a member by store path.
    #[must_use]
    pub fn get(&self, path: &StorePath) -> Option<&ClosureMember> {
        self.members.get(path)
    }

    /// Members keyed by store path.
    pub fn members(&self) -> impl Iterator<Item = &ClosureMember> {
        self.members.values()
    }

    /// Number of distinct members, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always `false`: a closure contains at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Discovers closures through a [`StoreQuery`].
pub struct StorePathResolver<'a> {
    store: &'a dyn StoreQuery,
}

impl<'a> StorePathResolver<'a> {
    /// Resolver reading from `store`.
    #[must_use]
    pub fn new(store: &'a dyn StoreQuery) -> Self {
        Self { store }
    }

    /// Collect the closure of `root`, visiting each store path once.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::RootMissing`] if `root` is not in the store,
    /// or any error reported while reading references.
    pub fn resolve(&self, root: &StorePath) -> Result<Closure, ResolutionError> {
        if !self.store.contains(root)? {
            return Err(ResolutionError::RootMissing {
                path: root.as_path().to_owned(),
            });
        }

        let mut members = BTreeMap::new();
        let mut pending = VecDeque::from([root.clone()]);

        while let Some(path) = pending.pop_front() {
            if members.contains_key(&path) {
                continue;
            }
            let dependencies: BTreeSet<StorePath> = self
                .store
                .references(&path)?
                .into_iter()
                .filter(|dep| dep != &path)
                .collect();
            log::debug!("{path}: {} direct references", dependencies.len());

            pending.extend(
                dependencies
                    .iter()
                    .filter(|dep| !members.contains_key(*dep))
                    .cloned(),
            );
            members.insert(path.clone(), ClosureMember::new(path, dependencies));
        }

        log::info!("closure of {root} has {} members", members.len());
        Ok(Closure {
            root: root.clone(),
            members,
        })
    }
}
