//! Per-member component packaging with resume support.
//!
//! A component archive is written to a hidden scratch file in the output
//! directory and renamed to its final name only once the backend succeeds.
//! The final file therefore only exists for members that packaged cleanly,
//! and a rerun skips exactly those members: prior failures are always
//! retried.

use crate::backend::{BackendError, ComponentRequest, PackagerBackend, sanitize_file_name};
use crate::closure::ClosureMember;
use crate::naming::PackagingIdentifier;
use crate::store_path::StorePath;
use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// One closure member failed to package.
#[derive(Debug, Error)]
#[error("{identifier} ({store_path}): {source}")]
pub struct ComponentBuildError {
    /// Rendered identifier of the failed member.
    pub identifier: String,
    /// Store path of the failed member.
    pub store_path: Utf8PathBuf,
    /// Backend diagnostic.
    #[source]
    pub source: BackendError,
}

/// How a run reacts to component failures and how many builds run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildPolicy {
    /// Stop scheduling new builds after the first failure.
    pub fail_fast: bool,
    /// Concurrent component builds; `1` builds sequentially.
    pub jobs: usize,
}

impl Default for BuildPolicy {
    fn default() -> Self {
        Self {
            fail_fast: false,
            jobs: 1,
        }
    }
}

/// A packaged closure member on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentArtifact {
    /// Store path the archive was built from.
    pub store_path: StorePath,
    /// Identifier the member was packaged under.
    pub identifier: PackagingIdentifier,
    /// Final archive in the output directory.
    pub path: Utf8PathBuf,
    /// Where the tree is placed at install time.
    pub install_target: Utf8PathBuf,
    /// Whether the archive came from an earlier run.
    pub reused: bool,
}

/// Outcome of packaging a whole ordered closure.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Successful artefacts, in the order the members were given.
    pub artifacts: Vec<ComponentArtifact>,
    /// Failures, in the order the members were given.
    pub failures: Vec<ComponentBuildError>,
}

impl BuildReport {
    /// Whether every scheduled member packaged.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Final file name of a component archive.
///
/// The store hash is part of the name so an archive built from a different
/// store path that happened to receive the same identifier is never reused.
#[must_use]
pub fn artifact_file_name(
    identifier: &PackagingIdentifier,
    store_path: &StorePath,
    extension: &str,
) -> String {
    sanitize_file_name(&format!("{identifier}-{}.{extension}", store_path.hash()))
}

/// Drives a [`PackagerBackend`] once per closure member.
pub struct ComponentBuilder<'a> {
    backend: &'a dyn PackagerBackend,
    output_dir: Utf8PathBuf,
}

impl<'a> ComponentBuilder<'a> {
    /// Builder writing archives into `output_dir`.
    #[must_use]
    pub fn new(backend: &'a dyn PackagerBackend, output_dir: &Utf8Path) -> Self {
        Self {
            backend,
            output_dir: output_dir.to_owned(),
        }
    }

    /// Package `member` under `identifier`, reusing a previous archive when
    /// one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ComponentBuildError`] when the backend fails or the archive
    /// cannot be moved into place. No final archive is left behind.
    pub fn build(
        &self,
        member: &ClosureMember,
        identifier: &PackagingIdentifier,
    ) -> Result<ComponentArtifact, ComponentBuildError> {
        let store_path = member.store_path();
        let file_name = artifact_file_name(
            identifier,
            store_path,
            self.backend.format().component_extension,
        );
        let final_path = self.output_dir.join(&file_name);
        let artifact = |reused| ComponentArtifact {
            store_path: store_path.clone(),
            identifier: identifier.clone(),
            path: final_path.clone(),
            install_target: member.install_target().to_owned(),
            reused,
        };

        if final_path.is_file() {
            log::debug!("reusing {final_path} for {identifier}");
            return Ok(artifact(true));
        }

        let fail = |source: BackendError| ComponentBuildError {
            identifier: identifier.to_string(),
            store_path: store_path.as_path().to_owned(),
            source,
        };
        let scratch = self.output_dir.join(format!(".{file_name}.part"));
        remove_if_present(&scratch).map_err(|err| fail(err.into()))?;

        let request = ComponentRequest {
            store_path: store_path.clone(),
            identifier: identifier.clone(),
            install_target: member.install_target().to_owned(),
            dependencies: member.dependencies().iter().cloned().collect(),
            destination: scratch.clone(),
        };

        log::info!("packaging {identifier}");
        let produced = match self.backend.package_component(&request) {
            Ok(produced) => produced,
            Err(err) => {
                // Best effort: a leftover scratch file is removed on the next try.
                let _ = remove_if_present(&scratch);
                return Err(fail(err));
            }
        };

        if let Err(err) = std::fs::rename(&produced, &final_path) {
            let _ = remove_if_present(&produced);
            return Err(fail(err.into()));
        }
        Ok(artifact(false))
    }

    /// Package every member, honouring `policy`.
    ///
    /// Results keep the order of `members` regardless of how many builds run
    /// concurrently. Under fail-fast, members not yet started when the first
    /// failure occurs are skipped and appear in neither list.
    #[must_use]
    pub fn build_all(
        &self,
        members: &[(&ClosureMember, PackagingIdentifier)],
        policy: BuildPolicy,
    ) -> BuildReport {
        let stop = AtomicBool::new(false);
        let attempt = |(member, identifier): &(&ClosureMember, PackagingIdentifier)| {
            if policy.fail_fast && stop.load(Ordering::SeqCst) {
                return None;
            }
            let outcome = self.build(member, identifier);
            if let Err(err) = &outcome {
                log::warn!("failed to package {err}");
                if policy.fail_fast {
                    stop.store(true, Ordering::SeqCst);
                }
            }
            Some(outcome)
        };

        let outcomes: Vec<Option<Result<ComponentArtifact, ComponentBuildError>>> =
            if policy.jobs > 1 {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(policy.jobs)
                    .build()
                {
                    Ok(pool) => pool.install(|| members.par_iter().map(attempt).collect()),
                    Err(err) => {
                        log::warn!("falling back to sequential builds: {err}");
                        members.iter().map(attempt).collect()
                    }
                }
            } else {
                members.iter().map(attempt).collect()
            };

        let mut report = BuildReport::default();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(artifact) => report.artifacts.push(artifact),
                Err(err) => report.failures.push(err),
            }
        }
        report
    }
}

fn remove_if_present(path: &Utf8Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "component_tests.rs"]
mod tests;
