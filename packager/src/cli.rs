//! CLI argument definitions for `nix2pkg`.
//!
//! Kept apart from the entrypoint so parsing and the way flags layer over
//! `nix2pkg.toml` can be tested without spawning the binary.

use crate::component::BuildPolicy;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use nix2pkg::{OutputFormat, PackagerConfig};
use std::time::Duration;

/// Repackage a store path and its runtime closure as native installers.
#[derive(Parser, Debug)]
#[command(name = "nix2pkg")]
#[command(version, about)]
#[command(long_about = concat!(
    "Repackage a store path and its runtime closure as native installers.\n\n",
    "Every member of the closure becomes its own component package, installed ",
    "at its original store location. The components are then bundled, ",
    "dependencies first, into a single distribution: an Apple product archive ",
    "(--pkg) or a bundle of RPMs (--rpm).",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Build an attribute from the 21.11 channel and package it:\n",
    "    $ nix2pkg package hello\n\n",
    "  Package an existing store path as RPMs:\n",
    "    $ nix2pkg closure --rpm /nix/store/<hash>-hello-2.12\n\n",
    "  Show the install order without packaging:\n",
    "    $ nix2pkg show /nix/store/<hash>-hello-2.12",
))]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build attributes with `nix build`, then package their closures.
    Package(PackageArgs),

    /// Package the closure of an existing store path.
    Closure(ClosureArgs),

    /// Print the closure of a store path in install order.
    Show(ShowArgs),
}

/// Options accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Configuration file [default: ./nix2pkg.toml when present].
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        global = true,
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, global = true, conflicts_with = "verbosity")]
    pub quiet: bool,
}

/// Where and how component archives and the distribution are produced.
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Directory receiving component archives and the distribution.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub output_dir: Utf8PathBuf,

    /// Produce Apple installer packages.
    #[arg(long, conflicts_with = "rpm")]
    pub pkg: bool,

    /// Produce RPM packages.
    #[arg(long, conflicts_with = "pkg")]
    pub rpm: bool,

    /// Concurrent jobs for builds and component packaging.
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Stop scheduling component builds after the first failure.
    #[arg(long)]
    pub fail_fast: bool,
}

/// Arguments for `nix2pkg package`.
#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    /// Attributes to build (for example `hello` or `python39Packages.requests`).
    #[arg(required = true, value_name = "ATTR")]
    pub attrs: Vec<String>,

    /// Repository revision: `unstable`, `master`, a channel such as `21.11`,
    /// or a tarball URL.
    #[arg(long, value_name = "REPO")]
    pub repo: Option<String>,

    /// Build packages marked insecure, broken or unsupported.
    #[arg(long)]
    pub force: bool,

    /// Build for aarch64-darwin.
    #[arg(long)]
    pub arm: bool,

    /// Build for x86_64-darwin.
    #[arg(long)]
    pub x86: bool,

    /// Stream full build logs.
    #[arg(long)]
    pub build_logs: bool,

    /// Output options.
    #[command(flatten)]
    pub output: OutputArgs,
}

/// Arguments for `nix2pkg closure`.
#[derive(Args, Debug, Clone)]
pub struct ClosureArgs {
    /// Store path whose closure is packaged.
    #[arg(value_name = "STORE_PATH")]
    pub store_path: Utf8PathBuf,

    /// Output options.
    #[command(flatten)]
    pub output: OutputArgs,
}

/// Arguments for `nix2pkg show`.
#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    /// Store path whose closure is listed.
    #[arg(value_name = "STORE_PATH")]
    pub store_path: Utf8PathBuf,
}

impl OutputArgs {
    /// Package format: the flag when given, else the configured one.
    ///
    /// # Examples
    ///
    /// ```
    /// use nix2pkg::OutputFormat;
    /// use nix2pkg_packager::cli::OutputArgs;
    ///
    /// let args = OutputArgs { rpm: true, ..OutputArgs::default() };
    /// assert_eq!(args.format(OutputFormat::Pkg), OutputFormat::Rpm);
    /// assert_eq!(OutputArgs::default().format(OutputFormat::Rpm), OutputFormat::Rpm);
    /// ```
    #[must_use]
    pub fn format(&self, configured: OutputFormat) -> OutputFormat {
        if self.rpm {
            OutputFormat::Rpm
        } else if self.pkg {
            OutputFormat::Pkg
        } else {
            configured
        }
    }

    /// Worker count: the flag, then the configuration, then one.
    #[must_use]
    pub fn jobs(&self, config: &PackagerConfig) -> usize {
        self.jobs.or(config.jobs).unwrap_or(1).max(1)
    }

    /// Component build policy after layering flags over `config`.
    #[must_use]
    pub fn policy(&self, config: &PackagerConfig) -> BuildPolicy {
        BuildPolicy {
            fail_fast: self.fail_fast || config.fail_fast,
            jobs: self.jobs(config),
        }
    }
}

impl PackageArgs {
    /// Repository revision: the flag, else the configured one.
    #[must_use]
    pub fn repo<'a>(&'a self, config: &'a PackagerConfig) -> &'a str {
        self.repo.as_deref().unwrap_or(&config.repo)
    }
}

/// Build timeout from the configuration, if any.
#[must_use]
pub fn build_timeout(config: &PackagerConfig) -> Option<Duration> {
    config.build_timeout_secs.map(Duration::from_secs)
}

/// Default log filter for the chosen verbosity.
///
/// `RUST_LOG` takes precedence when set.
#[must_use]
pub fn log_filter(global: &GlobalArgs) -> &'static str {
    if global.quiet {
        return "warn";
    }
    match global.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
