//! Store path parsing.
//!
//! A store path is an absolute directory of the fixed shape
//! `<store-root>/<content-hash>-<raw-name>`. The content hash is 32 characters
//! drawn from `[a-z0-9]`; it identifies the contents, so two store paths with
//! equal strings are the same artefact.

use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use thiserror::Error;

/// Length of the content-hash prefix of a store directory name.
pub const HASH_LEN: usize = 32;

/// Errors raised when a path does not have store-path shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorePathError {
    /// The path does not live directly under the store root.
    #[error("{path} is not a direct child of {store_root}")]
    OutsideStore {
        /// Offending path.
        path: Utf8PathBuf,
        /// Store root the path was checked against.
        store_root: Utf8PathBuf,
    },

    /// The directory name does not start with a hash and separator.
    #[error("{path} is not a store path: {reason}")]
    Malformed {
        /// Offending path.
        path: Utf8PathBuf,
        /// What is wrong with the directory name.
        reason: &'static str,
    },
}

/// A validated store path.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use nix2pkg_packager::store_path::StorePath;
///
/// let path = StorePath::parse(
///     Utf8Path::new("/nix/store/0123456789abcdfghijklmnpqrsvwxyz-hello-2.12"),
///     Utf8Path::new("/nix/store"),
/// )
/// .expect("valid store path");
///
/// assert_eq!(path.hash(), "0123456789abcdfghijklmnpqrsvwxyz");
/// assert_eq!(path.raw_name(), "hello-2.12");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath {
    path: Utf8PathBuf,
}

impl StorePath {
    /// Validate `path` as a direct child of `store_root`.
    ///
    /// Trailing slashes are tolerated; anything below the store directory
    /// (for example `/nix/store/<hash>-foo/bin`) is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`StorePathError`] when the path is outside the store or its
    /// directory name is not `<hash>-<name>`.
    pub fn parse(path: &Utf8Path, store_root: &Utf8Path) -> Result<Self, StorePathError> {
        let parent = path.parent();
        let dir_name = path.file_name();
        let (Some(parent), Some(dir_name)) = (parent, dir_name) else {
            return Err(StorePathError::OutsideStore {
                path: path.to_owned(),
                store_root: store_root.to_owned(),
            });
        };
        if parent != store_root {
            return Err(StorePathError::OutsideStore {
                path: path.to_owned(),
                store_root: store_root.to_owned(),
            });
        }

        validate_dir_name(dir_name).map_err(|reason| StorePathError::Malformed {
            path: path.to_owned(),
            reason,
        })?;

        Ok(Self {
            path: store_root.join(dir_name),
        })
    }

    /// Full path of the store directory.
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        &self.path
    }

    /// Full path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.path.as_str()
    }

    /// The `<hash>-<raw-name>` directory name.
    #[must_use]
    pub fn dir_name(&self) -> &str {
        self.path.file_name().unwrap_or_default()
    }

    /// The content-hash prefix.
    #[must_use]
    pub fn hash(&self) -> &str {
        self.dir_name().get(..HASH_LEN).unwrap_or_default()
    }

    /// Everything after the hash and its `-` separator.
    #[must_use]
    pub fn raw_name(&self) -> &str {
        self.dir_name().get(HASH_LEN + 1..).unwrap_or_default()
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

impl AsRef<Utf8Path> for StorePath {
    fn as_ref(&self) -> &Utf8Path {
        &self.path
    }
}

fn validate_dir_name(dir_name: &str) -> Result<(), &'static str> {
    let Some(hash) = dir_name.get(..HASH_LEN) else {
        return Err("directory name is shorter than the content hash");
    };
    if !hash
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err("content hash must be lowercase alphanumeric");
    }
    match dir_name.get(HASH_LEN..) {
        Some(rest) if rest.starts_with('-') && rest.len() > 1 => Ok(()),
        Some(rest) if rest.starts_with('-') => Err("name after the content hash is empty"),
        _ => Err("content hash must be followed by '-'"),
    }
}
