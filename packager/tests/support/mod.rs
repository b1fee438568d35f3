//! Shared fakes for packager behaviour tests.
//!
//! [`FakeStore`] serves closure metadata from an in-memory graph and
//! [`FakeBackend`] writes placeholder archives while recording every call,
//! so pipeline scenarios run without a store or packaging tools.

use camino::{Utf8Path, Utf8PathBuf};
use nix2pkg_packager::backend::{
    BackendError, ComponentRequest, DistributionRequest, PackageFormat, PackagerBackend,
};
use nix2pkg_packager::closure::{ResolutionError, StoreQuery};
use nix2pkg_packager::store_path::StorePath;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tempfile::TempDir;

/// Store root used by every fake store path.
pub const STORE_ROOT: &str = "/nix/store";

/// Store path `/nix/store/<32 x hash_char>-<name>`.
pub fn store_path(hash_char: char, name: &str) -> StorePath {
    let hash: String = std::iter::repeat_n(hash_char, 32).collect();
    StorePath::parse(
        Utf8Path::new(&format!("{STORE_ROOT}/{hash}-{name}")),
        Utf8Path::new(STORE_ROOT),
    )
    .expect("valid store path")
}

/// Temporary directory with a UTF-8 path.
pub fn utf8_tempdir() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 temp dir");
    (dir, path)
}

/// File names in `dir`, excluding the run lock.
pub fn entries(dir: &Utf8Path) -> BTreeSet<String> {
    dir.read_dir_utf8()
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().to_owned())
        .filter(|name| name != ".nix2pkg.lock")
        .collect()
}

/// In-memory reference graph.
#[derive(Debug, Default)]
pub struct FakeStore {
    references: BTreeMap<StorePath, Vec<StorePath>>,
}

impl FakeStore {
    /// Record that `from` references each of `to`.
    pub fn add(&mut self, from: &StorePath, to: &[&StorePath]) {
        let refs = self.references.entry(from.clone()).or_default();
        refs.extend(to.iter().map(|path| (*path).clone()));
        for path in to {
            self.references.entry((*path).clone()).or_default();
        }
    }
}

impl StoreQuery for FakeStore {
    fn contains(&self, path: &StorePath) -> Result<bool, ResolutionError> {
        Ok(self.references.contains_key(path))
    }

    fn references(&self, path: &StorePath) -> Result<Vec<StorePath>, ResolutionError> {
        Ok(self.references.get(path).cloned().unwrap_or_default())
    }
}

/// Backend writing placeholder archives and recording its calls.
#[derive(Debug, Default)]
pub struct FakeBackend {
    failing: BTreeSet<String>,
    fail_distribution: bool,
    components: Mutex<Vec<String>>,
    distributions: Mutex<Vec<Vec<String>>>,
}

impl FakeBackend {
    /// Fail every component whose rendered identifier is `identifier`.
    pub fn fail_component(&mut self, identifier: &str) {
        self.failing.insert(identifier.to_owned());
    }

    /// Fail distribution assembly after writing a partial file.
    pub fn fail_distribution(&mut self) {
        self.fail_distribution = true;
    }

    /// Identifiers passed to `package_component`, in call order.
    pub fn component_calls(&self) -> Vec<String> {
        self.components.lock().expect("lock").clone()
    }

    /// Component lists passed to `package_distribution`.
    pub fn distribution_calls(&self) -> Vec<Vec<String>> {
        self.distributions.lock().expect("lock").clone()
    }
}

impl PackagerBackend for FakeBackend {
    fn format(&self) -> PackageFormat {
        PackageFormat {
            component_extension: "pkg",
            distribution_extension: "pkg",
            display_name: "fake",
        }
    }

    fn package_component(&self, request: &ComponentRequest) -> Result<Utf8PathBuf, BackendError> {
        let identifier = request.identifier.to_string();
        self.components.lock().expect("lock").push(identifier.clone());
        if self.failing.contains(&identifier) {
            return Err(BackendError::ToolFailed {
                tool: "pkgbuild",
                detail: format!("{identifier} refused"),
            });
        }
        std::fs::write(&request.destination, identifier)?;
        Ok(request.destination.clone())
    }

    fn package_distribution(
        &self,
        request: &DistributionRequest,
    ) -> Result<Utf8PathBuf, BackendError> {
        let identifiers: Vec<String> = request
            .components
            .iter()
            .map(|component| component.identifier.clone())
            .collect();
        self.distributions
            .lock()
            .expect("lock")
            .push(identifiers.clone());
        std::fs::write(&request.destination, identifiers.join("\n"))?;
        if self.fail_distribution {
            return Err(BackendError::ToolFailed {
                tool: "productbuild",
                detail: "signing identity not found".to_owned(),
            });
        }
        Ok(request.destination.clone())
    }
}
