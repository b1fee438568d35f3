//! Distribution assembly.
//!
//! Bundles the ordered component archives into one installer whose file name
//! is derived from the root identifier and a fingerprint of the member set.
//! The bundle is written to a temporary file inside the output directory and
//! renamed into place, so the directory never holds a partial distribution.

use crate::backend::{
    BackendError, DistributionComponent, DistributionRequest, PackagerBackend, sanitize_file_name,
};
use crate::component::ComponentArtifact;
use crate::naming::PackagingIdentifier;
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use thiserror::Error;

/// Hex characters of the fingerprint kept in the file name.
pub const FINGERPRINT_LEN: usize = 12;

/// Errors raised while assembling a distribution.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// There is nothing to bundle.
    #[error("no component artefacts to assemble")]
    Empty,

    /// The backend failed to bundle the components.
    #[error("failed to assemble distribution: {0}")]
    Backend(#[from] BackendError),

    /// The finished bundle could not be moved into the output directory.
    #[error("failed to move distribution into {path}: {source}")]
    Persist {
        /// Intended final path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The output directory could not be used for scratch files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The installer bundle produced by a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionArtifact {
    /// Components in install order, each exactly once.
    pub components: Vec<ComponentArtifact>,
    /// Final bundle in the output directory.
    pub path: Utf8PathBuf,
    /// Identifier of the requested package.
    pub root_identifier: PackagingIdentifier,
    /// Fingerprint of the member set embedded in the file name.
    pub fingerprint: String,
}

/// Keep the first occurrence of each identifier, preserving order.
#[must_use]
pub fn dedupe(artifacts: &[ComponentArtifact]) -> Vec<ComponentArtifact> {
    let mut seen = BTreeSet::new();
    artifacts
        .iter()
        .filter(|artifact| seen.insert(&artifact.identifier))
        .cloned()
        .collect()
}

/// Fingerprint of an ordered, deduplicated component set.
///
/// SHA-256 over every `(identifier, store path)` pair, truncated to
/// [`FINGERPRINT_LEN`] hex characters.
#[must_use]
pub fn fingerprint(artifacts: &[ComponentArtifact]) -> String {
    let mut hasher = Sha256::new();
    for artifact in artifacts {
        hasher.update(artifact.identifier.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(artifact.store_path.as_str().as_bytes());
        hasher.update(b"\n");
    }
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// File name of a distribution bundle.
///
/// # Examples
///
/// ```
/// use nix2pkg_packager::distribution::distribution_file_name;
///
/// assert_eq!(
///     distribution_file_name("gtk+-2.24", "0a1b2c3d4e5f", "pkg"),
///     "nix2pkg-gtkplus-2.24-0a1b2c3d4e5f.pkg",
/// );
/// ```
#[must_use]
pub fn distribution_file_name(root: &str, fingerprint: &str, extension: &str) -> String {
    sanitize_file_name(&format!("nix2pkg-{root}-{fingerprint}.{extension}"))
}

/// Bundles component archives through a [`PackagerBackend`].
pub struct DistributionAssembler<'a> {
    backend: &'a dyn PackagerBackend,
    output_dir: Utf8PathBuf,
}

impl<'a> DistributionAssembler<'a> {
    /// Assembler writing into `output_dir`.
    #[must_use]
    pub fn new(backend: &'a dyn PackagerBackend, output_dir: &Utf8Path) -> Self {
        Self {
            backend,
            output_dir: output_dir.to_owned(),
        }
    }

    /// Bundle `artifacts` (in install order) under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError`] when there is nothing to bundle or bundling
    /// fails. On failure the output directory is left as it was.
    pub fn assemble(
        &self,
        artifacts: &[ComponentArtifact],
        root: &PackagingIdentifier,
    ) -> Result<DistributionArtifact, AssemblyError> {
        let components = dedupe(artifacts);
        if components.is_empty() {
            return Err(AssemblyError::Empty);
        }

        let fingerprint = fingerprint(&components);
        let format = self.backend.format();
        let final_path = self.output_dir.join(distribution_file_name(
            &root.to_string(),
            &fingerprint,
            format.distribution_extension,
        ));

        let scratch = tempfile::Builder::new()
            .prefix(".nix2pkg-")
            .suffix(".part")
            .tempfile_in(&self.output_dir)?;
        let scratch_path = Utf8Path::from_path(scratch.path())
            .ok_or_else(|| BackendError::NonUtf8Path {
                path: scratch.path().display().to_string(),
            })?
            .to_owned();

        let request = DistributionRequest {
            root_identifier: root.to_string(),
            components: components
                .iter()
                .map(|artifact| DistributionComponent {
                    identifier: artifact.identifier.to_string(),
                    path: artifact.path.clone(),
                })
                .collect(),
            destination: scratch_path.clone(),
        };

        log::info!(
            "assembling {} from {} components",
            final_path,
            components.len()
        );
        // `scratch` is removed on drop if the backend fails.
        let produced = self.backend.package_distribution(&request)?;

        if produced == scratch_path {
            scratch
                .persist(&final_path)
                .map_err(|err| AssemblyError::Persist {
                    path: final_path.clone(),
                    source: err.error,
                })?;
        } else {
            std::fs::rename(&produced, &final_path).map_err(|source| AssemblyError::Persist {
                path: final_path.clone(),
                source,
            })?;
        }

        Ok(DistributionArtifact {
            components,
            path: final_path,
            root_identifier: root.clone(),
            fingerprint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockPackagerBackend, PackageFormat};
    use crate::naming::{NamingContext, parse_name};
    use crate::store_path::StorePath;
    use rstest::rstest;

    const FORMAT: PackageFormat = PackageFormat {
        component_extension: "pkg",
        distribution_extension: "pkg",
        display_name: "test",
    };

    fn artifacts(names: &[&str]) -> Vec<ComponentArtifact> {
        let mut ctx = NamingContext::new();
        names
            .iter()
            .zip('a'..)
            .map(|(name, hash_char)| {
                let hash: String = std::iter::repeat_n(hash_char, 32).collect();
                let store_path = StorePath::parse(
                    Utf8Path::new(&format!("/nix/store/{hash}-{name}")),
                    Utf8Path::new("/nix/store"),
                )
                .expect("valid store path");
                ComponentArtifact {
                    identifier: ctx.assign(&parse_name(name)),
                    path: Utf8PathBuf::from(format!("/out/{name}.pkg")),
                    install_target: store_path.as_path().to_owned(),
                    store_path,
                    reused: false,
                }
            })
            .collect()
    }

    fn scratch_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 temp dir");
        (dir, path)
    }

    fn entries(dir: &Utf8Path) -> BTreeSet<String> {
        dir.read_dir_utf8()
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_owned())
            .collect()
    }

    #[rstest]
    fn fingerprint_is_stable_and_order_sensitive() {
        let set = artifacts(&["zlib-1.2.13", "hello-2.12"]);
        let reversed: Vec<ComponentArtifact> = set.iter().rev().cloned().collect();

        assert_eq!(fingerprint(&set), fingerprint(&set.clone()));
        assert_eq!(fingerprint(&set).len(), FINGERPRINT_LEN);
        assert_ne!(fingerprint(&set), fingerprint(&reversed));
    }

    #[rstest]
    fn dedupe_keeps_first_occurrence() {
        let set = artifacts(&["zlib-1.2.13", "hello-2.12"]);
        let doubled = vec![set[0].clone(), set[1].clone(), set[0].clone()];

        assert_eq!(dedupe(&doubled), set);
    }

    #[rstest]
    fn assemble_renames_into_place() {
        let (_dir, out) = scratch_dir();
        let set = artifacts(&["zlib-1.2.13", "hello-2.12"]);
        let root = set[1].identifier.clone();
        let mut backend = MockPackagerBackend::new();
        backend.expect_format().return_const(FORMAT);
        backend
            .expect_package_distribution()
            .withf(|request| {
                request.root_identifier == "hello-2.12"
                    && request
                        .components
                        .iter()
                        .map(|c| c.identifier.as_str())
                        .eq(["zlib-1.2.13", "hello-2.12"])
            })
            .times(1)
            .returning(|request| {
                std::fs::write(&request.destination, b"bundle")?;
                Ok(request.destination.clone())
            });

        let dist = DistributionAssembler::new(&backend, &out)
            .assemble(&set, &root)
            .expect("assembles");

        let expected = distribution_file_name("hello-2.12", &fingerprint(&set), "pkg");
        assert_eq!(dist.path, out.join(&expected));
        assert_eq!(entries(&out), BTreeSet::from([expected]));
        assert_eq!(std::fs::read(&dist.path).expect("read"), b"bundle");
    }

    #[rstest]
    fn failed_assembly_leaves_directory_untouched() {
        let (_dir, out) = scratch_dir();
        std::fs::write(out.join("nix2pkg-old-000000000000.pkg"), b"old").expect("seed");
        let before = entries(&out);
        let set = artifacts(&["hello-2.12"]);
        let mut backend = MockPackagerBackend::new();
        backend.expect_format().return_const(FORMAT);
        backend.expect_package_distribution().returning(|request| {
            std::fs::write(&request.destination, b"partial")?;
            Err(BackendError::ToolFailed {
                tool: "productbuild",
                detail: "signing identity not found".to_owned(),
            })
        });

        let err = DistributionAssembler::new(&backend, &out)
            .assemble(&set, &set[0].identifier)
            .expect_err("assembly fails");

        assert!(matches!(err, AssemblyError::Backend(_)));
        assert_eq!(entries(&out), before);
    }

    #[rstest]
    fn empty_sets_are_rejected() {
        let (_dir, out) = scratch_dir();
        let mut backend = MockPackagerBackend::new();
        backend.expect_format().never();
        backend.expect_package_distribution().never();
        let root = NamingContext::new().assign(&parse_name("hello-2.12"));

        let err = DistributionAssembler::new(&backend, &out)
            .assemble(&[], &root)
            .expect_err("nothing to do");

        assert!(matches!(err, AssemblyError::Empty));
    }
}
