//! Error types for the `nix2pkg` packager.
//!
//! Each pipeline stage owns its own error enum; [`PackagerError`] gathers them
//! for the command-line layer and carries the aggregate failure report when
//! one or more component builds failed.

use crate::builder::BuildError;
use crate::closure::ResolutionError;
use crate::component::ComponentBuildError;
use crate::distribution::AssemblyError;
use crate::ordering::CycleDetectedError;
use crate::repo::RepoError;
use crate::store_path::StorePathError;
use camino::Utf8PathBuf;
use nix2pkg::ConfigError;
use thiserror::Error;

/// Errors that can abort a packaging run.
#[derive(Debug, Error)]
pub enum PackagerError {
    /// The closure of the root store path could not be discovered.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The dependency graph is not a DAG.
    #[error(transparent)]
    Cycle(#[from] CycleDetectedError),

    /// One or more closure members failed to package.
    #[error("{}", describe_failures(.failures))]
    ComponentsFailed {
        /// Every failed component, in closure order.
        failures: Vec<ComponentBuildError>,
    },

    /// The distribution artefact could not be assembled.
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// `nix build` did not produce a store path.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The package repository could not be fetched or patched.
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// `nix2pkg.toml` could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A path supplied on the command line is not a store path.
    #[error(transparent)]
    StorePath(#[from] StorePathError),

    /// Another run holds the output directory lock.
    #[error("output directory {path} is in use by another nix2pkg run")]
    OutputDirLocked {
        /// The lock file that could not be acquired.
        path: Utf8PathBuf,
    },

    /// An external command ran past its time limit and was killed.
    #[error("{command} timed out after {seconds} seconds")]
    CommandTimedOut {
        /// The command that was killed.
        command: String,
        /// The limit that elapsed.
        seconds: u64,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stub executor received an unexpected command (test-only).
    #[cfg(any(test, feature = "test-support"))]
    #[error("stub executor mismatch: {message}")]
    StubMismatch {
        /// Description of the mismatch.
        message: String,
    },
}

fn describe_failures(failures: &[ComponentBuildError]) -> String {
    let mut message = format!("{} component(s) failed to package", failures.len());
    for failure in failures {
        message.push_str("\n  ");
        message.push_str(&failure.to_string());
    }
    message
}

/// Result type for packager operations.
pub type Result<T> = std::result::Result<T, PackagerError>;
