//! `nix build` orchestration.
//!
//! [`NixBuilder`] evaluates an attribute from an unpacked package repository,
//! waits for the build (optionally under a timeout) and turns the `result*`
//! links `nix build` leaves behind into [`StorePath`]s. The first link is the
//! primary output; extra outputs (`result-dev`, `result-man`, ...) follow in
//! name order.

use crate::error::PackagerError;
use crate::exec::{CommandExecutor, tool_path};
use crate::store_path::{StorePath, StorePathError};
use camino::{Utf8Path, Utf8PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default base name of the result links `nix build` writes.
pub const RESULT_LINK: &str = "nix2pkg-result";

/// Errors raised while building an attribute.
#[derive(Debug, Error)]
pub enum BuildError {
    /// `nix` could not be started.
    #[error("failed to run nix build for {attr}: {reason}")]
    Spawn {
        /// Attribute being built.
        attr: String,
        /// Spawn diagnostic.
        reason: String,
    },

    /// The build outlived its time limit and was killed.
    #[error("nix build for {attr} timed out after {seconds} seconds")]
    TimedOut {
        /// Attribute being built.
        attr: String,
        /// The limit that elapsed.
        seconds: u64,
    },

    /// `nix build` exited unsuccessfully.
    #[error("nix build for {attr} failed with {status}")]
    Failed {
        /// Attribute being built.
        attr: String,
        /// Exit status description.
        status: String,
    },

    /// The build succeeded but left no result links.
    #[error("nix build for {attr} produced no result links")]
    NoResults {
        /// Attribute being built.
        attr: String,
    },

    /// A result link does not point into the store.
    #[error("build result {path} is not a store path")]
    InvalidResult {
        /// The result link.
        path: Utf8PathBuf,
        /// Why its target was rejected.
        #[source]
        source: StorePathError,
    },

    /// Result links could not be listed or read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds attributes into store paths.
#[cfg_attr(test, mockall::automock)]
pub trait Builder {
    /// Build `attr` and return its outputs, primary first.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when the build fails or its results cannot be
    /// read back.
    fn build(&self, attr: &str) -> Result<Vec<StorePath>, BuildError>;
}

/// Knobs passed through to `nix build`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NixBuildOptions {
    /// `-j` value.
    pub jobs: usize,
    /// Stream full build logs (`-L`).
    pub build_logs: bool,
    /// Allow insecure, unsupported and broken packages.
    pub force: bool,
    /// Kill the build after this long.
    pub timeout: Option<Duration>,
}

impl Default for NixBuildOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            build_logs: false,
            force: false,
            timeout: None,
        }
    }
}

/// [`Builder`] that shells out to `nix build`.
pub struct NixBuilder<'a> {
    executor: &'a dyn CommandExecutor,
    nix: String,
    expression: Utf8PathBuf,
    result_link: Utf8PathBuf,
    store_root: Utf8PathBuf,
    options: NixBuildOptions,
}

impl<'a> NixBuilder<'a> {
    /// Builder evaluating `<repo_root>/default.nix` and linking results at
    /// `result_link`.
    #[must_use]
    pub fn new(
        executor: &'a dyn CommandExecutor,
        bin_dir: Option<&Utf8Path>,
        repo_root: &Utf8Path,
        result_link: &Utf8Path,
        store_root: &Utf8Path,
        options: NixBuildOptions,
    ) -> Self {
        Self {
            executor,
            nix: tool_path(bin_dir, "nix"),
            expression: repo_root.join("default.nix"),
            result_link: result_link.to_owned(),
            store_root: store_root.to_owned(),
            options,
        }
    }

    fn environment(&self) -> Vec<(&'static str, &'static str)> {
        let mut env = vec![("NIXPKGS_ALLOW_UNFREE", "1")];
        if self.options.force {
            env.extend([
                ("NIXPKGS_ALLOW_INSECURE", "1"),
                ("NIXPKGS_ALLOW_UNSUPPORTED_SYSTEM", "1"),
                ("NIXPKGS_ALLOW_BROKEN", "1"),
            ]);
        }
        env
    }

    /// Every `<result_link>*` entry in its directory, sorted by name.
    fn result_links(&self) -> Result<Vec<Utf8PathBuf>, BuildError> {
        let Some(prefix) = self.result_link.file_name() else {
            return Ok(Vec::new());
        };
        let dir = match self.result_link.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut links = Vec::new();
        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            if entry.file_name().starts_with(prefix) {
                links.push(entry.into_path());
            }
        }
        links.sort();
        Ok(links)
    }

    fn remove_stale_links(&self) -> Result<(), BuildError> {
        for link in self.result_links()? {
            log::debug!("removing stale result link {link}");
            std::fs::remove_file(&link)?;
        }
        Ok(())
    }
}

impl Builder for NixBuilder<'_> {
    fn build(&self, attr: &str) -> Result<Vec<StorePath>, BuildError> {
        self.remove_stale_links()?;

        let jobs = self.options.jobs.max(1).to_string();
        let mut args = vec![
            "build",
            "-f",
            self.expression.as_str(),
            "-o",
            self.result_link.as_str(),
            "-j",
            jobs.as_str(),
        ];
        if self.options.build_logs {
            args.push("-L");
        }
        args.push(attr);

        log::info!("building {attr}: {} {}", self.nix, args.join(" "));
        let output = self
            .executor
            .run_attached(&self.nix, &args, &self.environment(), self.options.timeout)
            .map_err(|err| match err {
                PackagerError::CommandTimedOut { seconds, .. } => BuildError::TimedOut {
                    attr: attr.to_owned(),
                    seconds,
                },
                other => BuildError::Spawn {
                    attr: attr.to_owned(),
                    reason: other.to_string(),
                },
            })?;
        if !output.status.success() {
            return Err(BuildError::Failed {
                attr: attr.to_owned(),
                status: output.status.to_string(),
            });
        }

        let links = self.result_links()?;
        if links.is_empty() {
            return Err(BuildError::NoResults {
                attr: attr.to_owned(),
            });
        }
        links
            .into_iter()
            .map(|link| {
                let target = link.read_link_utf8()?;
                StorePath::parse(&target, &self.store_root)
                    .map_err(|source| BuildError::InvalidResult { path: link, source })
            })
            .collect()
    }
}

/// Rewrite attributes for cross compilation relative to the host.
///
/// Without either flag the attributes pass through unchanged. With flags,
/// each attribute is kept for the host's own architecture and wrapped in
/// `pkgsCross.<system>` for the other one; attributes already naming a
/// `pkgsCross` set are kept as they are.
///
/// # Examples
///
/// ```
/// use nix2pkg_packager::builder::cross_compile_attrs;
///
/// let attrs = vec!["hello".to_owned()];
/// assert_eq!(
///     cross_compile_attrs(&attrs, true, false, false),
///     ["pkgsCross.aarch64-darwin.hello"],
/// );
/// ```
#[must_use]
pub fn cross_compile_attrs(attrs: &[String], arm: bool, x86: bool, host_is_arm: bool) -> Vec<String> {
    if !arm && !x86 {
        return attrs.to_vec();
    }

    let mut mapped = Vec::new();
    for attr in attrs {
        if attr.contains("pkgsCross") {
            mapped.push(attr.clone());
            continue;
        }
        if host_is_arm {
            if arm {
                mapped.push(attr.clone());
            }
            if x86 {
                mapped.push(format!("pkgsCross.x86_64-darwin.{attr}"));
            }
        } else {
            if x86 {
                mapped.push(attr.clone());
            }
            if arm {
                mapped.push(format!("pkgsCross.aarch64-darwin.{attr}"));
            }
        }
    }
    mapped
}
