//! Package repository retrieval.
//!
//! Resolves a repository revision to a tarball URL, downloads and unpacks
//! it, locates the expression root and applies the darwin bootstrap patch
//! that lets binary patching failures pass during stdenv bootstrap.

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use regex::Regex;
use std::path::{Component, Path};
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;
use thiserror::Error;

const NIXPKGS_ARCHIVE: &str = "https://github.com/NixOS/nixpkgs/archive";
const BOOTSTRAP_SCRIPT: &str = "pkgs/stdenv/darwin/unpack-bootstrap-tools.sh";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// `install_name_tool` invocations that must not abort the bootstrap.
const NON_FATAL_LINES: [&str; 2] = [
    r#"install_name_tool -id "$(dirname $i)/$(basename $id)" $i"#,
    "install_name_tool -add_rpath $out/lib $i",
];

static CHANNEL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d\d\.\d\d(-pre|-beta)?$").ok());

/// Errors raised while preparing a repository checkout.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The HTTP request failed.
    #[error("download failed for {url}: {reason}")]
    Download {
        /// Requested URL.
        url: String,
        /// Description of the failure.
        reason: String,
    },

    /// The tarball does not exist (HTTP 404).
    #[error("repository tarball not found: {url}")]
    NotFound {
        /// Requested URL.
        url: String,
    },

    /// A tarball entry tries to escape the extraction directory.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// Offending entry path.
        path: String,
    },

    /// No `default.nix` at the top level or one directory down.
    #[error("cannot find a default.nix under {dir}")]
    RootNotFound {
        /// Extraction directory that was searched.
        dir: Utf8PathBuf,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where package expressions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSource {
    /// A release channel such as `21.11`, `22.05-beta` or `unstable`.
    Channel(String),
    /// The tip of the master branch.
    Master,
    /// Any other tarball URL.
    Url(String),
}

impl RepoSource {
    /// Interpret a `--repo` value.
    ///
    /// # Examples
    ///
    /// ```
    /// use nix2pkg_packager::repo::RepoSource;
    ///
    /// assert_eq!(
    ///     RepoSource::parse("21.11").url(),
    ///     "https://github.com/NixOS/nixpkgs/archive/nixos-21.11.tar.gz",
    /// );
    /// assert_eq!(
    ///     RepoSource::parse("https://example.com/pkgs.tar.gz"),
    ///     RepoSource::Url("https://example.com/pkgs.tar.gz".into()),
    /// );
    /// ```
    #[must_use]
    pub fn parse(repo: &str) -> Self {
        let lowered = repo.trim().to_lowercase();
        let is_channel = lowered == "unstable"
            || CHANNEL
                .as_ref()
                .is_some_and(|channel| channel.is_match(&lowered));
        if is_channel {
            Self::Channel(lowered)
        } else if lowered == "master" {
            Self::Master
        } else {
            Self::Url(repo.trim().to_owned())
        }
    }

    /// Tarball URL for this source.
    #[must_use]
    pub fn url(&self) -> String {
        match self {
            Self::Channel(channel) => format!("{NIXPKGS_ARCHIVE}/nixos-{channel}.tar.gz"),
            Self::Master => format!("{NIXPKGS_ARCHIVE}/master.tar.gz"),
            Self::Url(url) => url.clone(),
        }
    }
}

/// Downloads repository tarballs.
#[cfg_attr(test, mockall::automock)]
pub trait RepoFetcher {
    /// Download `url` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] if the request or the file write fails.
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), RepoError>;
}

/// [`RepoFetcher`] over HTTPS using `ureq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFetcher;

impl RepoFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), RepoError> {
        log::info!("downloading {url}");
        let response = http_agent()
            .get(url)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;
        let mut file = std::fs::File::create(dest)?;
        std::io::copy(&mut response.into_body().as_reader(), &mut file)?;
        Ok(())
    }
}

/// Shared `ureq` agent with request timeout configuration.
fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(DOWNLOAD_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

fn map_ureq_error(url: &str, err: &ureq::Error) -> RepoError {
    match err {
        ureq::Error::StatusCode(404) => RepoError::NotFound {
            url: url.to_owned(),
        },
        other => RepoError::Download {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

/// Unpack a `.tar.gz` into `dest`, rejecting entries that escape it.
///
/// Escapes are caught both in entry names and through symlinks unpacked
/// earlier from the same archive.
///
/// # Errors
///
/// Returns [`RepoError::PathTraversal`] for absolute or `..` entries and for
/// entries that would land outside `dest` through a link, and
/// [`RepoError::Io`] on read or write failures.
pub fn extract_tarball(archive: &Utf8Path, dest: &Utf8Path) -> Result<(), RepoError> {
    let file = std::fs::File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    std::fs::create_dir_all(dest)?;
    let root = dest.as_std_path().canonicalize()?;

    for entry in tarball.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        validate_entry_path(&entry_path)?;
        ensure_inside(&root, &entry_path)?;

        if !entry.unpack_in(&root)? {
            return Err(traversal(&entry_path));
        }
    }
    Ok(())
}

fn traversal(path: &Path) -> RepoError {
    RepoError::PathTraversal {
        path: path.display().to_string(),
    }
}

fn validate_entry_path(path: &Path) -> Result<(), RepoError> {
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir));
    if escapes {
        return Err(traversal(path));
    }
    Ok(())
}

/// Check that the parent of `entry` resolves inside `root`.
///
/// The deepest ancestor already on disk is canonicalised, so a symlink
/// unpacked earlier cannot redirect later entries elsewhere.
fn ensure_inside(root: &Path, entry: &Path) -> Result<(), RepoError> {
    let target = root.join(entry);
    let mut ancestor = target.parent();
    while let Some(dir) = ancestor {
        if std::fs::symlink_metadata(dir).is_ok() {
            let resolved = dir.canonicalize().map_err(|_| traversal(entry))?;
            return if resolved.starts_with(root) {
                Ok(())
            } else {
                Err(traversal(entry))
            };
        }
        ancestor = dir.parent();
    }
    Err(traversal(entry))
}

/// Find the directory holding the top-level `default.nix`.
///
/// GitHub archives wrap the tree in one directory (`nixpkgs-<rev>/`), so the
/// top level and its immediate subdirectories are searched, in name order.
///
/// # Errors
///
/// Returns [`RepoError::RootNotFound`] when no candidate holds `default.nix`.
pub fn locate_root(dir: &Utf8Path) -> Result<Utf8PathBuf, RepoError> {
    if dir.join("default.nix").is_file() {
        return Ok(dir.to_owned());
    }

    let mut candidates = Vec::new();
    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.path().join("default.nix").is_file() {
            candidates.push(entry.path().to_owned());
        }
    }
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| RepoError::RootNotFound {
            dir: dir.to_owned(),
        })
}

/// Make the bootstrap's `install_name_tool` calls non-fatal.
///
/// Appends `|| true` to each matching line that does not already carry it,
/// so applying the patch twice changes nothing. Returns whether the script
/// changed; a checkout without the script is left alone.
///
/// # Errors
///
/// Returns [`RepoError::Io`] if the script cannot be read or rewritten.
pub fn patch_bootstrap(root: &Utf8Path) -> Result<bool, RepoError> {
    let script = root.join(BOOTSTRAP_SCRIPT);
    if !script.is_file() {
        log::warn!("{script} not found; skipping bootstrap patch");
        return Ok(false);
    }

    let original = std::fs::read_to_string(&script)?;
    let mut patched = String::with_capacity(original.len() + 32);
    let mut changed = false;
    for line in original.split_inclusive('\n') {
        let needs_patch = NON_FATAL_LINES.iter().any(|target| line.contains(target))
            && !line.contains("|| true");
        if needs_patch {
            let body = line.trim_end();
            log::debug!("patching bootstrap line: {body}");
            patched.push_str(body);
            patched.push_str(" || true\n");
            changed = true;
        } else {
            patched.push_str(line);
        }
    }

    if changed {
        std::fs::write(&script, patched)?;
    }
    Ok(changed)
}

/// Download, unpack and patch `source` below `work_dir`, returning the
/// expression root.
///
/// # Errors
///
/// Propagates any download, extraction or patching failure.
pub fn prepare_repository(
    source: &RepoSource,
    fetcher: &dyn RepoFetcher,
    work_dir: &Utf8Path,
) -> Result<Utf8PathBuf, RepoError> {
    std::fs::create_dir_all(work_dir)?;
    let tarball = work_dir.join("repo.tar.gz");
    let checkout = work_dir.join("nix_repo");

    fetcher.fetch(&source.url(), tarball.as_std_path())?;
    if checkout.exists() {
        std::fs::remove_dir_all(&checkout)?;
    }
    extract_tarball(&tarball, &checkout)?;

    let root = locate_root(&checkout)?;
    if patch_bootstrap(&root)? {
        log::info!("patched darwin bootstrap tools in {root}");
    }
    Ok(root)
}
