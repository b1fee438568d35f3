//! Native packaging backends.
//!
//! A [`PackagerBackend`] turns one store tree into one component archive and
//! a list of component archives into one distribution archive. Backends only
//! ever write the destination path they are handed; placing the result in the
//! output directory is the caller's job.

pub mod apple;
pub mod rpm;

pub use apple::ApplePkgBackend;
pub use rpm::RpmBackend;

use crate::exec::{CommandExecutor, failure_detail};
use crate::naming::PackagingIdentifier;
use crate::store_path::StorePath;
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Errors reported by a packaging backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The packaging tool could not be started.
    #[error("failed to run {tool}: {reason}")]
    Spawn {
        /// Tool that could not be run.
        tool: &'static str,
        /// Why it could not be run.
        reason: String,
    },

    /// The packaging tool exited unsuccessfully.
    #[error("{tool} failed: {detail}")]
    ToolFailed {
        /// Tool that failed.
        tool: &'static str,
        /// Diagnostic output from the tool.
        detail: String,
    },

    /// The tool reported success but left no artefact behind.
    #[error("expected artefact {path} was not produced")]
    MissingOutput {
        /// Where the artefact should have been.
        path: Utf8PathBuf,
    },

    /// A path handed to the backend is not valid UTF-8.
    #[error("path is not valid UTF-8: {path}")]
    NonUtf8Path {
        /// Lossy rendering of the path.
        path: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// File extension and display name of a backend's archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageFormat {
    /// Extension of component archives, without the dot.
    pub component_extension: &'static str,
    /// Extension of distribution archives, without the dot.
    pub distribution_extension: &'static str,
    /// Human-readable format name.
    pub display_name: &'static str,
}

/// Everything a backend needs to package one closure member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRequest {
    /// Store tree to package.
    pub store_path: StorePath,
    /// Unique identifier for the member within this run.
    pub identifier: PackagingIdentifier,
    /// Where the tree lands when the package is installed.
    pub install_target: Utf8PathBuf,
    /// Direct runtime dependencies of the member.
    pub dependencies: Vec<StorePath>,
    /// Scratch path the archive must be written to.
    pub destination: Utf8PathBuf,
}

/// One component archive included in a distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionComponent {
    /// Rendered packaging identifier.
    pub identifier: String,
    /// Component archive on disk.
    pub path: Utf8PathBuf,
}

/// Everything a backend needs to bundle component archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRequest {
    /// Rendered identifier of the root member.
    pub root_identifier: String,
    /// Components in install order, each exactly once.
    pub components: Vec<DistributionComponent>,
    /// Scratch path the bundle must be written to.
    pub destination: Utf8PathBuf,
}

/// A native packaging tool.
#[cfg_attr(test, mockall::automock)]
pub trait PackagerBackend: Send + Sync {
    /// Archive format produced by this backend.
    fn format(&self) -> PackageFormat;

    /// Package one store tree, writing the archive to
    /// `request.destination`, and return the path written.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when the packaging tool fails.
    fn package_component(&self, request: &ComponentRequest) -> Result<Utf8PathBuf, BackendError>;

    /// Bundle component archives into `request.destination` and return the
    /// path written.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] when bundling fails.
    fn package_distribution(
        &self,
        request: &DistributionRequest,
    ) -> Result<Utf8PathBuf, BackendError>;
}

/// Make a string safe for use in artefact file names.
///
/// Some hosting services reject `+`, which is common in store names
/// (`gtk+`, `libstdc++`).
///
/// # Examples
///
/// ```
/// use nix2pkg_packager::backend::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("libstdc++-12.2.0"), "libstdcplusplus-12.2.0");
/// ```
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.replace('+', "plus")
}

/// Run a packaging tool and map failures onto [`BackendError`].
pub(crate) fn run_tool(
    executor: &dyn CommandExecutor,
    tool: &'static str,
    program: &str,
    args: &[&str],
) -> Result<(), BackendError> {
    log::debug!("running {program} {}", args.join(" "));
    let output = executor
        .run(program, args)
        .map_err(|err| BackendError::Spawn {
            tool,
            reason: err.to_string(),
        })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(BackendError::ToolFailed {
            tool,
            detail: failure_detail(&output),
        })
    }
}

/// Confirm the tool left an artefact at `path`.
pub(crate) fn ensure_produced(path: &Utf8Path) -> Result<Utf8PathBuf, BackendError> {
    if path.is_file() {
        Ok(path.to_owned())
    } else {
        Err(BackendError::MissingOutput {
            path: path.to_owned(),
        })
    }
}

/// View a temporary directory as a UTF-8 path.
pub(crate) fn utf8_dir(dir: &tempfile::TempDir) -> Result<&Utf8Path, BackendError> {
    Utf8Path::from_path(dir.path()).ok_or_else(|| BackendError::NonUtf8Path {
        path: dir.path().display().to_string(),
    })
}
