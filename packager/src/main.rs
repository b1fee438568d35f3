//! `nix2pkg` CLI entrypoint.
//!
//! Builds attributes (or takes an existing store path), packages every member
//! of the runtime closure as a native component and bundles the components
//! into one distribution in the output directory.

use camino::Utf8Path;
use clap::Parser;
use nix2pkg::{OutputFormat, PackagerConfig};
use nix2pkg_packager::backend::{ApplePkgBackend, PackagerBackend, RpmBackend};
use nix2pkg_packager::builder::{
    Builder, NixBuildOptions, NixBuilder, RESULT_LINK, cross_compile_attrs,
};
use nix2pkg_packager::cli::{
    Cli, ClosureArgs, Command, GlobalArgs, OutputArgs, PackageArgs, ShowArgs, build_timeout,
    log_filter,
};
use nix2pkg_packager::closure::NixStoreQuery;
use nix2pkg_packager::error::Result;
use nix2pkg_packager::exec::{CommandExecutor, SystemCommandExecutor};
use nix2pkg_packager::output::{
    failure_lines, plan_lines, report_lines, write_stderr_line,
};
use nix2pkg_packager::pipeline::{PipelineContext, plan, run_pipeline};
use nix2pkg_packager::repo::{HttpFetcher, RepoSource, prepare_repository};
use nix2pkg_packager::store_path::StorePath;
use std::io::Write;
use tracing_subscriber::EnvFilter;

/// Scratch directory for the repository checkout and result links, inside
/// the output directory.
const WORK_DIR_NAME: &str = ".nix2pkg-work";

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.global);
    let mut stderr = std::io::stderr();
    let run_result = run(&cli, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn init_logging(global: &GlobalArgs) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(global)));
    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: &Cli, stderr: &mut dyn Write) -> Result<()> {
    let config = load_config(&cli.global)?;
    let executor = SystemCommandExecutor;

    match &cli.command {
        Command::Package(args) => run_package(cli, args, &config, &executor, stderr),
        Command::Closure(args) => run_closure(cli, args, &config, &executor, stderr),
        Command::Show(args) => run_show(args, &config, &executor),
    }
}

/// Loads the file named by `--config`, else `./nix2pkg.toml` when present.
fn load_config(global: &GlobalArgs) -> Result<PackagerConfig> {
    let config = match &global.config {
        Some(path) => PackagerConfig::load(path)?,
        None => PackagerConfig::discover(Utf8Path::new("."))?,
    };
    Ok(config)
}

fn parse_store_path(path: &Utf8Path, config: &PackagerConfig) -> Result<StorePath> {
    Ok(StorePath::parse(path, &config.store_root)?)
}

fn select_backend<'a>(
    output: &OutputArgs,
    config: &PackagerConfig,
    executor: &'a dyn CommandExecutor,
) -> Box<dyn PackagerBackend + 'a> {
    match output.format(config.format) {
        OutputFormat::Pkg => Box::new(ApplePkgBackend::new(executor, &config.identifier_prefix)),
        OutputFormat::Rpm => Box::new(RpmBackend::new(executor, &config.store_root)),
    }
}

fn package_closure(
    cli: &Cli,
    root: &StorePath,
    output: &OutputArgs,
    config: &PackagerConfig,
    executor: &dyn CommandExecutor,
    stderr: &mut dyn Write,
) -> Result<()> {
    let ctx = PipelineContext {
        output_dir: output.output_dir.clone(),
        policy: output.policy(config),
        quiet: cli.global.quiet,
    };
    let store = NixStoreQuery::new(executor, &config.store_root, config.nix_bin_dir.as_deref());
    let backend = select_backend(output, config, executor);

    let report = run_pipeline(&ctx, root, &store, backend.as_ref(), stderr)?;
    if !cli.global.quiet {
        for line in report_lines(&report) {
            write_stderr_line(stderr, line);
        }
    }
    Ok(())
}

fn run_closure(
    cli: &Cli,
    args: &ClosureArgs,
    config: &PackagerConfig,
    executor: &dyn CommandExecutor,
    stderr: &mut dyn Write,
) -> Result<()> {
    let root = parse_store_path(&args.store_path, config)?;
    package_closure(cli, &root, &args.output, config, executor, stderr)
}

fn run_package(
    cli: &Cli,
    args: &PackageArgs,
    config: &PackagerConfig,
    executor: &dyn CommandExecutor,
    stderr: &mut dyn Write,
) -> Result<()> {
    let work_dir = args.output.output_dir.join(WORK_DIR_NAME);
    let source = RepoSource::parse(args.repo(config));
    if !cli.global.quiet {
        write_stderr_line(stderr, format!("Fetching {}...", source.url()));
    }
    let repo_root = prepare_repository(&source, &HttpFetcher, &work_dir)?;

    let builder = NixBuilder::new(
        executor,
        config.nix_bin_dir.as_deref(),
        &repo_root,
        &work_dir.join(RESULT_LINK),
        &config.store_root,
        NixBuildOptions {
            jobs: args.output.jobs(config),
            build_logs: args.build_logs,
            force: args.force,
            timeout: build_timeout(config),
        },
    );

    let host_is_arm = std::env::consts::ARCH == "aarch64";
    for attr in cross_compile_attrs(&args.attrs, args.arm, args.x86, host_is_arm) {
        if !cli.global.quiet {
            write_stderr_line(stderr, format!("Building {attr}..."));
        }
        let outputs = builder.build(&attr)?;
        let Some((primary, extra)) = outputs.split_first() else {
            continue;
        };
        for output in extra {
            log::info!("{attr}: not packaging secondary output {output}");
        }
        package_closure(cli, primary, &args.output, config, executor, stderr)?;
    }
    Ok(())
}

fn run_show(args: &ShowArgs, config: &PackagerConfig, executor: &dyn CommandExecutor) -> Result<()> {
    let root = parse_store_path(&args.store_path, config)?;
    let store = NixStoreQuery::new(executor, &config.store_root, config.nix_bin_dir.as_deref());
    let planned = plan(&root, &store)?;

    let mut stdout = std::io::stdout().lock();
    for line in plan_lines(&planned) {
        writeln!(stdout, "{line}")?;
    }
    Ok(())
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            for line in failure_lines(&err) {
                write_stderr_line(stderr, line);
            }
            1
        }
    }
}
