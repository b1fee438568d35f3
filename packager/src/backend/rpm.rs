//! RPM components via `rpmbuild`, bundled into a `.tar.zst` distribution.
//!
//! Each store path becomes one RPM named `nix2rpm-<raw-name>-<hash>` whose
//! `Requires:` mirror the store references, so the RPM database sees the same
//! dependency graph as the store. Automatic dependency and provide scanning
//! are disabled: the store already states the closure exactly.

use super::{
    BackendError, ComponentRequest, DistributionRequest, PackageFormat, PackagerBackend,
    ensure_produced, run_tool, sanitize_file_name, utf8_dir,
};
use crate::exec::CommandExecutor;
use crate::store_path::StorePath;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;

const RPMBUILD: &str = "rpmbuild";
const MANIFEST_NAME: &str = "manifest.json";

/// Builds one RPM per store path.
pub struct RpmBackend<'a> {
    executor: &'a dyn CommandExecutor,
    store_root: Utf8PathBuf,
    host_arch: String,
}

impl<'a> RpmBackend<'a> {
    /// Backend targeting the host architecture.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, store_root: &Utf8Path) -> Self {
        Self::with_host_arch(executor, store_root, std::env::consts::ARCH)
    }

    /// Backend with an explicit default target architecture.
    #[must_use]
    pub fn with_host_arch(
        executor: &'a dyn CommandExecutor,
        store_root: &Utf8Path,
        host_arch: &str,
    ) -> Self {
        Self {
            executor,
            store_root: store_root.to_owned(),
            host_arch: host_arch.to_owned(),
        }
    }
}

/// RPM package name for a store path.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use nix2pkg_packager::backend::rpm::rpm_name;
/// use nix2pkg_packager::store_path::StorePath;
///
/// let path = StorePath::parse(
///     Utf8Path::new("/nix/store/0123456789abcdfghijklmnpqrsvwxyz-gtk+-2.24"),
///     Utf8Path::new("/nix/store"),
/// )
/// .expect("valid store path");
/// assert_eq!(rpm_name(&path), "nix2rpm-gtkplus-2.24-0123456789abcdfghijklmnpqrsvwxyz");
/// ```
#[must_use]
pub fn rpm_name(path: &StorePath) -> String {
    sanitize_file_name(&format!("nix2rpm-{}-{}", path.raw_name(), path.hash()))
}

/// Target architecture for a store path.
///
/// Cross-compiled outputs carry their target triple in the store name; all
/// other paths are built for `host_arch`.
#[must_use]
pub fn build_arch<'h>(raw_name: &str, host_arch: &'h str) -> &'h str {
    if raw_name.contains("aarch64-apple-darwin-") {
        "aarch64"
    } else if raw_name.contains("x86_64-apple-darwin-") {
        "x86_64"
    } else {
        host_arch
    }
}

/// Render the spec file for one component.
#[must_use]
pub fn component_spec(request: &ComponentRequest, store_root: &Utf8Path) -> String {
    let path = &request.store_path;
    let mut spec = String::new();
    let _ = writeln!(spec, "Name: {}", rpm_name(path));
    spec.push_str("Version: 1\nRelease: 0\n");
    spec.push_str("Summary: nix2pkg component\nGroup: nix2pkg\nLicense: unspecified\n");
    spec.push_str("AutoReq: No\nAutoProv: No\n");

    let requires: Vec<String> = request
        .dependencies
        .iter()
        .filter(|dep| *dep != path)
        .map(rpm_name)
        .collect();
    if !requires.is_empty() {
        let _ = writeln!(spec, "Requires: {}", requires.join(" "));
    }

    spec.push_str("%description\n");
    let _ = writeln!(
        spec,
        "Packaged {} ({}) with hash {} using nix2pkg",
        path.raw_name(),
        request.identifier,
        path.hash()
    );
    spec.push_str("%install\n");
    let _ = writeln!(spec, "mkdir -p $RPM_BUILD_ROOT{store_root}/");
    let _ = writeln!(spec, "cp -a {path} $RPM_BUILD_ROOT{store_root}/");
    spec.push_str("%files\n");
    let _ = writeln!(spec, "{}", request.install_target);
    spec.push_str("%clean\nchmod -R +w $RPM_BUILD_ROOT\nrm -rf $RPM_BUILD_ROOT\n");
    spec
}

/// Every `.rpm` below `dir`, sorted.
fn find_rpms(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, BackendError> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_owned()];
    while let Some(current) = pending.pop() {
        for entry in current.read_dir_utf8()? {
            let entry = entry?;
            let path = entry.path().to_owned();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else if path.extension() == Some("rpm") {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

#[derive(Serialize)]
struct BundleManifest<'a> {
    root: &'a str,
    format: &'static str,
    components: Vec<ManifestEntry<'a>>,
}

#[derive(Serialize)]
struct ManifestEntry<'a> {
    identifier: &'a str,
    file: &'a str,
}

impl PackagerBackend for RpmBackend<'_> {
    fn format(&self) -> PackageFormat {
        PackageFormat {
            component_extension: "rpm",
            distribution_extension: "tar.zst",
            display_name: "RPM bundle",
        }
    }

    fn package_component(&self, request: &ComponentRequest) -> Result<Utf8PathBuf, BackendError> {
        let scratch = tempfile::tempdir()?;
        let top = utf8_dir(&scratch)?;
        let rpm_dir = top.join("RPMS");
        let tmp_dir = top.join("tmp");
        let spec_dir = top.join("SPECS");
        for dir in [&rpm_dir, &tmp_dir, &spec_dir] {
            std::fs::create_dir_all(dir)?;
        }

        let spec_path = spec_dir.join(format!("{}.spec", rpm_name(&request.store_path)));
        std::fs::write(&spec_path, component_spec(request, &self.store_root))?;

        let arch = build_arch(request.store_path.raw_name(), &self.host_arch);
        let topdir_def = format!("_topdir {top}");
        let rpmdir_def = format!("_rpmdir {rpm_dir}");
        let tmppath_def = format!("_tmppath {tmp_dir}");
        run_tool(self.executor, "rpmbuild", RPMBUILD, &[
            "--target",
            arch,
            "-bb",
            "--define",
            &topdir_def,
            "--define",
            &rpmdir_def,
            "--define",
            &tmppath_def,
            "--define",
            "_invalid_encoding_terminates_build 0",
            spec_path.as_str(),
        ])?;

        let built = find_rpms(&rpm_dir)?;
        let Some(rpm) = built.first() else {
            return Err(BackendError::MissingOutput { path: rpm_dir });
        };
        std::fs::copy(rpm, &request.destination)?;
        ensure_produced(&request.destination)
    }

    fn package_distribution(
        &self,
        request: &DistributionRequest,
    ) -> Result<Utf8PathBuf, BackendError> {
        let mut entries = Vec::with_capacity(request.components.len());
        let file = File::create(&request.destination)?;
        let encoder = zstd::Encoder::new(file, 0)?;
        let mut builder = tar::Builder::new(encoder);

        for component in &request.components {
            let name = component
                .path
                .file_name()
                .ok_or_else(|| BackendError::MissingOutput {
                    path: component.path.clone(),
                })?;
            builder.append_path_with_name(&component.path, name)?;
            entries.push(ManifestEntry {
                identifier: &component.identifier,
                file: name,
            });
        }

        let manifest = serde_json::to_vec_pretty(&BundleManifest {
            root: &request.root_identifier,
            format: "rpm",
            components: entries,
        })
        .map_err(std::io::Error::from)?;
        let mut header = tar::Header::new_gnu();
        header.set_size(manifest.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, MANIFEST_NAME, manifest.as_slice())?;

        let encoder = builder.into_inner()?;
        encoder.finish()?;
        ensure_produced(&request.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DistributionComponent;
    use crate::naming::{NamingContext, parse_name};
    use crate::test_utils::{ARG_WILDCARD, ExpectedCall, StubExecutor, failure_output, success_output};
    use rstest::rstest;
    use std::io::Read;

    const STORE: &str = "/nix/store";

    fn sp(hash_char: char, name: &str) -> StorePath {
        let hash: String = std::iter::repeat_n(hash_char, 32).collect();
        StorePath::parse(
            Utf8Path::new(&format!("{STORE}/{hash}-{name}")),
            Utf8Path::new(STORE),
        )
        .expect("valid store path")
    }

    fn request(path: StorePath, dependencies: Vec<StorePath>, dest: &Utf8Path) -> ComponentRequest {
        let identifier = NamingContext::new().assign(&parse_name(path.raw_name()));
        ComponentRequest {
            install_target: path.as_path().to_owned(),
            store_path: path,
            identifier,
            dependencies,
            destination: dest.to_owned(),
        }
    }

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 temp dir");
        (dir, path)
    }

    /// Stands in for rpmbuild: drops an RPM into the `_rpmdir` define.
    fn write_rpm(args: &[&str]) {
        let rpm_dir = args
            .iter()
            .find_map(|arg| arg.strip_prefix("_rpmdir "))
            .expect("rpmdir defined");
        let arch_dir = Utf8Path::new(rpm_dir).join("x86_64");
        std::fs::create_dir_all(&arch_dir).expect("create arch dir");
        std::fs::write(arch_dir.join("component.rpm"), b"rpm").expect("write rpm");
    }

    #[rstest]
    #[case::native("hello-2.12", "x86_64", "x86_64")]
    #[case::cross_to_arm("aarch64-apple-darwin-clang-11.1.0", "x86_64", "aarch64")]
    #[case::cross_to_intel("x86_64-apple-darwin-binutils-2.38", "aarch64", "x86_64")]
    fn picks_target_architecture(#[case] raw: &str, #[case] host: &str, #[case] expected: &str) {
        assert_eq!(build_arch(raw, host), expected);
    }

    #[test]
    fn spec_requires_direct_dependencies_only() {
        let hello = sp('h', "hello-2.12");
        let glibc = sp('g', "glibc-2.35");
        let spec = component_spec(
            &request(hello.clone(), vec![glibc.clone(), hello.clone()], Utf8Path::new("/out/x")),
            Utf8Path::new(STORE),
        );

        assert!(spec.contains(&format!("Name: {}", rpm_name(&hello))));
        assert!(spec.contains(&format!("Requires: {}\n", rpm_name(&glibc))));
        assert!(spec.contains("AutoReq: No"));
        assert!(spec.contains(&format!("%files\n{hello}\n")));
        assert!(spec.contains(&format!("cp -a {hello} $RPM_BUILD_ROOT/nix/store/")));
    }

    #[test]
    fn spec_omits_requires_for_leaves() {
        let spec = component_spec(
            &request(sp('z', "zlib-1.2.13"), vec![], Utf8Path::new("/out/x")),
            Utf8Path::new(STORE),
        );
        assert!(!spec.contains("Requires:"));
    }

    #[test]
    fn component_runs_rpmbuild_and_copies_result() {
        let (_dir, out) = scratch();
        let dest = out.join("hello.rpm.part");
        let executor = StubExecutor::new(vec![
            ExpectedCall::new(
                RPMBUILD,
                &[
                    "--target",
                    "x86_64",
                    "-bb",
                    "--define",
                    ARG_WILDCARD,
                    "--define",
                    ARG_WILDCARD,
                    "--define",
                    ARG_WILDCARD,
                    "--define",
                    "_invalid_encoding_terminates_build 0",
                    ARG_WILDCARD,
                ],
                Ok(success_output()),
            )
            .with_effect(write_rpm),
        ]);
        let backend = RpmBackend::with_host_arch(&executor, Utf8Path::new(STORE), "x86_64");

        let produced = backend
            .package_component(&request(sp('h', "hello-2.12"), vec![], &dest))
            .expect("rpm builds");

        assert_eq!(produced, dest);
        assert_eq!(std::fs::read(&dest).expect("read rpm"), b"rpm");
        executor.assert_finished();
    }

    #[test]
    fn component_failure_is_reported() {
        let (_dir, out) = scratch();
        let dest = out.join("hello.rpm.part");
        let executor = StubExecutor::new(vec![ExpectedCall::new(
            RPMBUILD,
            &[ARG_WILDCARD; 12],
            Ok(failure_output("error: Bad exit status")),
        )]);
        let backend = RpmBackend::with_host_arch(&executor, Utf8Path::new(STORE), "x86_64");

        let err = backend
            .package_component(&request(sp('h', "hello-2.12"), vec![], &dest))
            .expect_err("rpmbuild fails");

        assert!(matches!(err, BackendError::ToolFailed { tool: "rpmbuild", .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn distribution_bundles_rpms_with_manifest() {
        let (_dir, out) = scratch();
        let zlib = out.join("zlib.rpm");
        let hello = out.join("hello.rpm");
        std::fs::write(&zlib, b"zlib").expect("write zlib");
        std::fs::write(&hello, b"hello").expect("write hello");
        let dest = out.join("bundle.tar.zst.part");
        let executor = StubExecutor::new(vec![]);
        let backend = RpmBackend::with_host_arch(&executor, Utf8Path::new(STORE), "x86_64");

        backend
            .package_distribution(&DistributionRequest {
                root_identifier: "hello-2.12".to_owned(),
                components: vec![
                    DistributionComponent {
                        identifier: "zlib-1.2.13".to_owned(),
                        path: zlib,
                    },
                    DistributionComponent {
                        identifier: "hello-2.12".to_owned(),
                        path: hello,
                    },
                ],
                destination: dest.clone(),
            })
            .expect("bundle builds");

        let decoder = zstd::Decoder::new(File::open(&dest).expect("open")).expect("zstd");
        let mut archive = tar::Archive::new(decoder);
        let mut names = Vec::new();
        let mut manifest = String::new();
        for entry in archive.entries().expect("entries") {
            let mut entry = entry.expect("entry");
            let name = entry.path().expect("path").display().to_string();
            if name == MANIFEST_NAME {
                entry.read_to_string(&mut manifest).expect("read manifest");
            }
            names.push(name);
        }

        assert_eq!(names, ["zlib.rpm", "hello.rpm", MANIFEST_NAME]);
        let parsed: serde_json::Value = serde_json::from_str(&manifest).expect("json");
        assert_eq!(parsed["root"], "hello-2.12");
        assert_eq!(parsed["components"][0]["identifier"], "zlib-1.2.13");
        assert_eq!(parsed["components"][1]["file"], "hello.rpm");
    }
}
