//! Unit tests for pipeline orchestration.

use super::*;
use crate::backend::{BackendError, MockPackagerBackend, PackageFormat};
use crate::closure::MockStoreQuery;
use rstest::{fixture, rstest};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const FORMAT: PackageFormat = PackageFormat {
    component_extension: "pkg",
    distribution_extension: "pkg",
    display_name: "Apple installer",
};

struct Workspace {
    _dir: TempDir,
    ctx: PipelineContext,
}

#[fixture]
fn workspace() -> Workspace {
    let dir = tempfile::tempdir().expect("temp dir");
    let base = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8 temp dir");
    Workspace {
        _dir: dir,
        ctx: PipelineContext {
            output_dir: base.join("out"),
            policy: BuildPolicy::default(),
            quiet: false,
        },
    }
}

fn sp(hash_char: char, name: &str) -> StorePath {
    let hash: String = std::iter::repeat_n(hash_char, 32).collect();
    StorePath::parse(
        Utf8Path::new(&format!("/nix/store/{hash}-{name}")),
        Utf8Path::new("/nix/store"),
    )
    .expect("valid store path")
}

/// `hello` depends on `openssl` and `zlib`, which both depend on `glibc`.
fn diamond() -> (StorePath, MockStoreQuery) {
    let hello = sp('h', "hello-2.12");
    let openssl = sp('o', "openssl-3.0.7");
    let zlib = sp('z', "zlib-1.2.13");
    let glibc = sp('g', "glibc-2.35");
    let graph: HashMap<StorePath, Vec<StorePath>> = HashMap::from([
        (hello.clone(), vec![openssl.clone(), zlib.clone(), hello.clone()]),
        (openssl, vec![glibc.clone()]),
        (zlib, vec![glibc.clone()]),
        (glibc, Vec::new()),
    ]);
    let mut store = MockStoreQuery::new();
    store.expect_contains().returning(|_| Ok(true));
    store
        .expect_references()
        .returning(move |path| Ok(graph.get(path).cloned().unwrap_or_default()));
    (hello, store)
}

/// Backend that writes its inputs and counts component builds.
fn recording_backend(calls: Arc<AtomicUsize>) -> MockPackagerBackend {
    let mut backend = MockPackagerBackend::new();
    backend.expect_format().return_const(FORMAT);
    backend.expect_package_component().returning(move |request| {
        calls.fetch_add(1, Ordering::SeqCst);
        std::fs::write(&request.destination, request.identifier.to_string())?;
        Ok(request.destination.clone())
    });
    backend.expect_package_distribution().returning(|request| {
        let listing: Vec<&str> = request
            .components
            .iter()
            .map(|c| c.identifier.as_str())
            .collect();
        std::fs::write(&request.destination, listing.join("\n"))?;
        Ok(request.destination.clone())
    });
    backend
}

#[rstest]
fn diamond_is_packaged_dependencies_first(workspace: Workspace) {
    let (root, store) = diamond();
    let calls = Arc::new(AtomicUsize::new(0));
    let backend = recording_backend(Arc::clone(&calls));
    let mut stderr = Vec::new();

    let report = run_pipeline(&workspace.ctx, &root, &store, &backend, &mut stderr)
        .expect("pipeline succeeds");

    let order: Vec<String> = report
        .distribution
        .components
        .iter()
        .map(|c| c.identifier.to_string())
        .collect();
    assert_eq!(order, [
        "glibc-2.35",
        "openssl-3.0.7",
        "zlib-1.2.13",
        "hello-2.12"
    ]);
    assert_eq!(report.distribution.root_identifier.to_string(), "hello-2.12");
    assert_eq!((report.built, report.reused), (4, 0));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        std::fs::read_to_string(&report.distribution.path).expect("read bundle"),
        order.join("\n")
    );
    assert!(String::from_utf8_lossy(&stderr).contains("Packaging hello-2.12 (4 closure members)"));
}

#[rstest]
fn rerun_reuses_every_component(workspace: Workspace) {
    let (root, store) = diamond();
    let calls = Arc::new(AtomicUsize::new(0));
    let backend = recording_backend(Arc::clone(&calls));

    let first = run_pipeline(&workspace.ctx, &root, &store, &backend, &mut Vec::new())
        .expect("first run");
    let second = run_pipeline(&workspace.ctx, &root, &store, &backend, &mut Vec::new())
        .expect("second run");

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!((second.built, second.reused), (0, 4));
    assert_eq!(first.distribution.path, second.distribution.path);
}

#[rstest]
fn component_failures_skip_assembly_and_keep_successes(workspace: Workspace) {
    let (root, store) = diamond();
    let mut backend = MockPackagerBackend::new();
    backend.expect_format().return_const(FORMAT);
    backend.expect_package_component().returning(|request| {
        if request.identifier.name() == "zlib" {
            return Err(BackendError::ToolFailed {
                tool: "pkgbuild",
                detail: "exit status 1".to_owned(),
            });
        }
        std::fs::write(&request.destination, b"ok")?;
        Ok(request.destination.clone())
    });
    backend.expect_package_distribution().never();

    let err = run_pipeline(&workspace.ctx, &root, &store, &backend, &mut Vec::new())
        .expect_err("zlib fails");

    let PackagerError::ComponentsFailed { failures } = err else {
        panic!("expected component failures, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].identifier, "zlib-1.2.13");
    let archives: BTreeSet<String> = workspace
        .ctx
        .output_dir
        .read_dir_utf8()
        .expect("read output")
        .map(|entry| entry.expect("entry").file_name().to_owned())
        .filter(|name| name.ends_with(".pkg"))
        .collect();
    assert_eq!(archives.len(), 3);
}

#[rstest]
fn quiet_runs_write_nothing(mut workspace: Workspace) {
    workspace.ctx.quiet = true;
    let (root, store) = diamond();
    let backend = recording_backend(Arc::new(AtomicUsize::new(0)));
    let mut stderr = Vec::new();

    run_pipeline(&workspace.ctx, &root, &store, &backend, &mut stderr).expect("pipeline succeeds");

    assert!(stderr.is_empty());
}

#[rstest]
fn locked_output_directories_are_refused(workspace: Workspace) {
    let _held = OutputLock::acquire(&workspace.ctx.output_dir).expect("first lock");
    let (root, store) = diamond();
    let mut backend = MockPackagerBackend::new();
    backend.expect_format().never();
    backend.expect_package_component().never();

    let err = run_pipeline(&workspace.ctx, &root, &store, &backend, &mut Vec::new())
        .expect_err("directory is locked");

    assert!(matches!(err, PackagerError::OutputDirLocked { .. }));
}

#[rstest]
fn missing_roots_fail_resolution(workspace: Workspace) {
    let root = sp('h', "hello-2.12");
    let mut store = MockStoreQuery::new();
    store.expect_contains().returning(|_| Ok(false));
    let backend = recording_backend(Arc::new(AtomicUsize::new(0)));

    let err = run_pipeline(&workspace.ctx, &root, &store, &backend, &mut Vec::new())
        .expect_err("root is missing");

    assert!(matches!(err, PackagerError::Resolution(ResolutionError::RootMissing { .. })));
}

#[rstest]
fn failed_resolution_leaves_the_output_directory_alone(workspace: Workspace) {
    let root = sp('h', "hello-2.12");
    let mut store = MockStoreQuery::new();
    store.expect_contains().returning(|_| Ok(false));
    let mut backend = MockPackagerBackend::new();
    backend.expect_format().never();
    backend.expect_package_component().never();

    let result = run_pipeline(&workspace.ctx, &root, &store, &backend, &mut Vec::new());

    assert!(result.is_err());
    assert!(
        !workspace.ctx.output_dir.exists(),
        "output directory should not be created"
    );
}

#[rstest]
fn plan_lists_identifiers_in_install_order() {
    let (root, store) = diamond();

    let planned = plan(&root, &store).expect("plan resolves");

    let rendered: Vec<String> = planned.iter().map(|p| p.identifier.to_string()).collect();
    assert_eq!(rendered, [
        "glibc-2.35",
        "openssl-3.0.7",
        "zlib-1.2.13",
        "hello-2.12"
    ]);
    assert_eq!(planned.last().map(|p| &p.store_path), Some(&root));
}
