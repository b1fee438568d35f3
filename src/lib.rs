//! Shared configuration for the `nix2pkg` packager.
//!
//! The packager crate reads [`PackagerConfig`] once at start-up and layers
//! command-line overrides on top of it.

pub mod config;

pub use config::{CONFIG_FILE_NAME, ConfigError, OutputFormat, PackagerConfig};
