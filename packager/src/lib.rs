//! `nix2pkg` packager library.
//!
//! Translates a store path and its runtime closure into native installer
//! packages: one component per closure member, bundled dependencies-first
//! into a single distribution. The `nix2pkg` binary wraps it; the library is
//! usable on its own for custom flows and tests.
//!
//! # Modules
//!
//! - [`backend`] - Apple and RPM packaging backends
//! - [`builder`] - `nix build` orchestration and cross-compilation attributes
//! - [`cli`] - Command-line argument definitions
//! - [`closure`] - Closure discovery through store metadata
//! - [`component`] - Per-member packaging with resume support
//! - [`distribution`] - Bundling components into one installer
//! - [`error`] - Error types and the crate `Result` alias
//! - [`exec`] - Subprocess seam
//! - [`naming`] - Name/version inference and unique identifiers
//! - [`ordering`] - Dependency-first ordering of a closure
//! - [`output`] - Progress and summary text
//! - [`pipeline`] - End-to-end orchestration
//! - [`repo`] - Package repository download and patching
//! - [`store_path`] - Store path parsing

pub mod backend;
pub mod builder;
pub mod cli;
pub mod closure;
pub mod component;
pub mod distribution;
pub mod error;
pub mod exec;
pub mod naming;
pub mod ordering;
pub mod output;
pub mod pipeline;
pub mod repo;
pub mod store_path;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
