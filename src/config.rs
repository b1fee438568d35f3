//! Workspace-wide configuration loader for `nix2pkg`.
//!
//! Settings live in `nix2pkg.toml`. Every key is optional: values are
//! deserialised when present and fall back to defaults that match a stock
//! single-user store mounted at `/nix/store`. Command-line flags layered on
//! top by the packager always win over the file.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// File name searched for by [`PackagerConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "nix2pkg.toml";

/// Errors raised while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the file that failed to load.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`PackagerConfig`].
    #[error("invalid configuration in {path}: {reason}")]
    Parse {
        /// Path of the offending file.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        reason: String,
    },
}

/// Native package format produced by a run.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Apple flat installer packages (`pkgbuild` / `productbuild`).
    #[default]
    Pkg,
    /// RPM packages (`rpmbuild`).
    Rpm,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pkg => f.write_str("pkg"),
            Self::Rpm => f.write_str("rpm"),
        }
    }
}

/// Shared configuration for the packager.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PackagerConfig {
    /// Directory holding store paths.
    pub store_root: Utf8PathBuf,
    /// Directory containing the `nix` and `nix-store` binaries. When unset the
    /// binaries are looked up on `PATH`.
    pub nix_bin_dir: Option<Utf8PathBuf>,
    /// Reverse-DNS prefix used for Apple package identifiers.
    pub identifier_prefix: String,
    /// Package format produced when the command line does not choose one.
    pub format: OutputFormat,
    /// Stop scheduling component builds after the first failure.
    pub fail_fast: bool,
    /// Worker count for component builds. `None` builds sequentially.
    pub jobs: Option<usize>,
    /// Repository revision handed to the builder (`unstable`, `master`, a
    /// channel such as `21.11`, or a tarball URL).
    pub repo: String,
    /// Upper bound on a single `nix build` invocation, in seconds.
    pub build_timeout_secs: Option<u64>,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            store_root: Utf8PathBuf::from(Self::DEFAULT_STORE_ROOT),
            nix_bin_dir: None,
            identifier_prefix: Self::DEFAULT_IDENTIFIER_PREFIX.to_owned(),
            format: OutputFormat::default(),
            fail_fast: false,
            jobs: None,
            repo: Self::DEFAULT_REPO.to_owned(),
            build_timeout_secs: None,
        }
    }
}

impl PackagerConfig {
    /// Store root used when the file does not override it.
    pub const DEFAULT_STORE_ROOT: &'static str = "/nix/store";
    /// Identifier prefix used when the file does not override it.
    pub const DEFAULT_IDENTIFIER_PREFIX: &'static str = "org.nix2pkg";
    /// Repository revision used when the file does not override it.
    pub const DEFAULT_REPO: &'static str = "21.11";

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not valid TOML or names
    /// keys this type does not know.
    ///
    /// # Examples
    ///
    /// ```
    /// use nix2pkg::PackagerConfig;
    ///
    /// let config = PackagerConfig::from_toml_str("fail_fast = true\n", "inline".into())
    ///     .expect("valid configuration");
    /// assert!(config.fail_fast);
    /// assert_eq!(config.store_root.as_str(), "/nix/store");
    /// ```
    pub fn from_toml_str(source: &str, origin: Utf8PathBuf) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|err| ConfigError::Parse {
            path: origin,
            reason: err.to_string(),
        })
    }

    /// Loads configuration from an explicit file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is malformed.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&source, path.to_owned())
    }

    /// Loads `nix2pkg.toml` from `dir` when it exists, otherwise returns the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`Self::load`] for a file that exists but
    /// cannot be read or parsed.
    pub fn discover(dir: &Utf8Path) -> Result<Self, ConfigError> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration using the supplied loader.
    ///
    /// Exists so tests can simulate the file system without touching it.
    ///
    /// # Examples
    ///
    /// ```
    /// use nix2pkg::PackagerConfig;
    ///
    /// let config = PackagerConfig::load_with("nix2pkg.toml".into(), |_| Ok(PackagerConfig::default()))
    ///     .expect("stub loader succeeds");
    /// assert_eq!(config.repo, "21.11");
    /// ```
    pub fn load_with<F>(path: Utf8PathBuf, loader: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&Utf8Path) -> Result<Self, ConfigError>,
    {
        loader(&path)
    }
}
