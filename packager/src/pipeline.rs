//! End-to-end packaging pipeline.
//!
//! Resolve the closure of a root store path, order it dependencies-first,
//! name every member, package each one and bundle the lot into a single
//! distribution. The output directory is created and locked only once the
//! closure has been resolved and ordered, so a failed resolution writes
//! nothing.

use crate::backend::PackagerBackend;
use crate::closure::{ResolutionError, StorePathResolver, StoreQuery};
use crate::component::{BuildPolicy, ComponentBuilder};
use crate::distribution::{DistributionArtifact, DistributionAssembler};
use crate::error::{PackagerError, Result};
use crate::naming::{NamingContext, PackagingIdentifier, name};
use crate::ordering::order;
use crate::output::write_stderr_line;
use crate::store_path::StorePath;
use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use std::fs::File;
use std::io::Write;

/// Name of the lock file taken in the output directory.
pub const LOCK_FILE_NAME: &str = ".nix2pkg.lock";

/// Settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Where component archives and the distribution are written.
    pub output_dir: Utf8PathBuf,
    /// Failure policy and concurrency.
    pub policy: BuildPolicy,
    /// Suppress progress output.
    pub quiet: bool,
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct PipelineReport {
    /// The assembled distribution.
    pub distribution: DistributionArtifact,
    /// Components packaged during this run.
    pub built: usize,
    /// Components reused from an earlier run.
    pub reused: usize,
}

/// One closure member in install order, with the identifier it would get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedComponent {
    /// Member store path.
    pub store_path: StorePath,
    /// Identifier assigned to the member.
    pub identifier: PackagingIdentifier,
}

/// Resolve, order and name the closure of `root` without packaging it.
///
/// # Errors
///
/// Returns [`PackagerError::Resolution`] or [`PackagerError::Cycle`].
pub fn plan(root: &StorePath, store: &dyn StoreQuery) -> Result<Vec<PlannedComponent>> {
    let closure = StorePathResolver::new(store).resolve(root)?;
    let ordered = order(&closure)?;
    let mut context = NamingContext::new();
    Ok(ordered
        .into_iter()
        .map(|member| PlannedComponent {
            store_path: member.store_path().clone(),
            identifier: name(member, &mut context),
        })
        .collect())
}

/// Holds the exclusive lock on an output directory until dropped.
#[derive(Debug)]
pub struct OutputLock {
    file: File,
}

impl OutputLock {
    /// Create `dir` if needed and lock it.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::OutputDirLocked`] when another run holds the
    /// lock, or an I/O error if the directory or lock file cannot be created.
    pub fn acquire(dir: &Utf8Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        let file = File::create(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| PackagerError::OutputDirLocked { path })?;
        Ok(Self { file })
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Run the whole pipeline for `root`.
///
/// Assembly only happens when every component packaged; otherwise the
/// successful archives stay on disk for the next run and every failure is
/// returned in [`PackagerError::ComponentsFailed`].
///
/// # Errors
///
/// Returns [`PackagerError`] for the first stage that fails.
pub fn run_pipeline(
    ctx: &PipelineContext,
    root: &StorePath,
    store: &dyn StoreQuery,
    backend: &dyn PackagerBackend,
    stderr: &mut dyn Write,
) -> Result<PipelineReport> {
    log::info!("resolving closure of {root}");
    let closure = StorePathResolver::new(store).resolve(root)?;
    let ordered = order(&closure)?;

    let mut context = NamingContext::new();
    let members: Vec<_> = ordered
        .into_iter()
        .map(|member| (member, name(member, &mut context)))
        .collect();
    let root_identifier = members
        .iter()
        .find(|(member, _)| member.store_path() == root)
        .map(|(_, identifier)| identifier.clone())
        .ok_or_else(|| ResolutionError::RootMissing {
            path: root.as_path().to_owned(),
        })?;

    // Nothing touches the output directory until the closure is known.
    let _lock = OutputLock::acquire(&ctx.output_dir)?;
    let format = backend.format();
    if !ctx.quiet {
        write_stderr_line(
            stderr,
            format!(
                "Packaging {} ({} closure members) as {}...",
                root_identifier,
                members.len(),
                format.display_name
            ),
        );
    }

    let report = ComponentBuilder::new(backend, &ctx.output_dir).build_all(&members, ctx.policy);
    if !report.is_success() {
        return Err(PackagerError::ComponentsFailed {
            failures: report.failures,
        });
    }

    let reused = report.artifacts.iter().filter(|a| a.reused).count();
    let built = report.artifacts.len() - reused;
    if !ctx.quiet {
        write_stderr_line(
            stderr,
            format!("  {built} component(s) built, {reused} reused"),
        );
    }

    let distribution =
        DistributionAssembler::new(backend, &ctx.output_dir).assemble(&report.artifacts, &root_identifier)?;
    log::info!("wrote {}", distribution.path);

    Ok(PipelineReport {
        distribution,
        built,
        reused,
    })
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
