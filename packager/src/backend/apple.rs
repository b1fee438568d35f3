//! Apple flat packages via `pkgbuild` and `productbuild`.

use super::{
    BackendError, ComponentRequest, DistributionRequest, PackageFormat, PackagerBackend,
    ensure_produced, run_tool, utf8_dir,
};
use crate::exec::CommandExecutor;
use camino::Utf8PathBuf;

const PKGBUILD: &str = "/usr/bin/pkgbuild";
const PRODUCTBUILD: &str = "/usr/bin/productbuild";

/// Builds `.pkg` component packages and a product archive.
pub struct ApplePkgBackend<'a> {
    executor: &'a dyn CommandExecutor,
    identifier_prefix: String,
}

impl<'a> ApplePkgBackend<'a> {
    /// Backend issuing package identifiers under `identifier_prefix`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, identifier_prefix: &str) -> Self {
        Self {
            executor,
            identifier_prefix: identifier_prefix.to_owned(),
        }
    }

    /// Receipt identifier recorded by the installer, unique per store path.
    fn bundle_identifier(&self, request: &ComponentRequest) -> String {
        format!(
            "{}.{}",
            self.identifier_prefix,
            request.store_path.dir_name()
        )
    }
}

impl PackagerBackend for ApplePkgBackend<'_> {
    fn format(&self) -> PackageFormat {
        PackageFormat {
            component_extension: "pkg",
            distribution_extension: "pkg",
            display_name: "Apple installer package",
        }
    }

    fn package_component(&self, request: &ComponentRequest) -> Result<Utf8PathBuf, BackendError> {
        // pkgbuild packages a whole root, so stage the tree at its final
        // absolute location inside a scratch root.
        let staging = tempfile::tempdir()?;
        let root = utf8_dir(&staging)?;
        let relative = request
            .install_target
            .strip_prefix("/")
            .unwrap_or(request.install_target.as_path());
        let placed = root.join(relative);
        if let Some(parent) = placed.parent() {
            std::fs::create_dir_all(parent)?;
        }

        run_tool(
            self.executor,
            "cp",
            "cp",
            &["-a", request.store_path.as_str(), placed.as_str()],
        )?;

        let identifier = self.bundle_identifier(request);
        let version = request.identifier.package_version();
        run_tool(self.executor, "pkgbuild", PKGBUILD, &[
            "--root",
            root.as_str(),
            "--identifier",
            &identifier,
            "--version",
            &version,
            "--install-location",
            "/",
            request.destination.as_str(),
        ])?;

        ensure_produced(&request.destination)
    }

    fn package_distribution(
        &self,
        request: &DistributionRequest,
    ) -> Result<Utf8PathBuf, BackendError> {
        let mut args = Vec::with_capacity(request.components.len() * 2 + 1);
        for component in &request.components {
            args.push("--package");
            args.push(component.path.as_str());
        }
        args.push(request.destination.as_str());

        run_tool(self.executor, "productbuild", PRODUCTBUILD, &args)?;
        ensure_produced(&request.destination)
    }
}
