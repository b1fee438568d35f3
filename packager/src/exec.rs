//! Subprocess seam.
//!
//! Every external tool the packager drives (`nix`, `nix-store`, `pkgbuild`,
//! `productbuild`, `rpmbuild`, `cp`) runs through [`CommandExecutor`], so
//! backends and the builder can be exercised against scripted output.

use crate::error::{PackagerError, Result};
use camino::Utf8Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Abstraction for running external commands.
pub trait CommandExecutor: Send + Sync {
    /// Runs a command with arguments and returns the captured output.
    ///
    /// # Errors
    ///
    /// Returns any I/O errors encountered while spawning or running the command.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nix2pkg_packager::exec::{CommandExecutor, SystemCommandExecutor};
    ///
    /// let executor = SystemCommandExecutor;
    /// let output = executor.run("nix-store", &["--version"])?;
    /// assert!(output.status.success());
    /// # Ok::<(), nix2pkg_packager::error::PackagerError>(())
    /// ```
    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output>;

    /// Runs a command with extra environment variables.
    ///
    /// The default ignores `env`; executors that spawn real processes
    /// override it.
    ///
    /// # Errors
    ///
    /// Returns any I/O errors encountered while spawning or running the command.
    fn run_with_env(&self, cmd: &str, args: &[&str], env: &[(&str, &str)]) -> Result<Output> {
        let _ = env;
        self.run(cmd, args)
    }

    /// Runs a long command whose output goes straight to the terminal,
    /// killing it once `timeout` elapses.
    ///
    /// The returned `Output` carries only the exit status. The default
    /// delegates to [`Self::run_with_env`] and ignores `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PackagerError::CommandTimedOut`] when the timeout elapses,
    /// or any I/O error encountered while spawning the command.
    fn run_attached(
        &self,
        cmd: &str,
        args: &[&str],
        env: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<Output> {
        let _ = timeout;
        self.run_with_env(cmd, args, env)
    }
}

/// Executes commands on the host system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        Command::new(cmd)
            .args(args)
            .output()
            .map_err(PackagerError::from)
    }

    fn run_with_env(&self, cmd: &str, args: &[&str], env: &[(&str, &str)]) -> Result<Output> {
        Command::new(cmd)
            .args(args)
            .envs(env.iter().copied())
            .output()
            .map_err(PackagerError::from)
    }

    fn run_attached(
        &self,
        cmd: &str,
        args: &[&str],
        env: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<Output> {
        let mut child = Command::new(cmd)
            .args(args)
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .spawn()?;

        let status = match timeout {
            None => child.wait()?,
            Some(limit) => {
                if let Some(status) = child.wait_timeout(limit)? {
                    status
                } else {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PackagerError::CommandTimedOut {
                        command: cmd.to_owned(),
                        seconds: limit.as_secs(),
                    });
                }
            }
        };

        Ok(Output {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

/// Resolve `tool` inside `bin_dir`, or leave it bare for a `PATH` lookup.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use nix2pkg_packager::exec::tool_path;
///
/// assert_eq!(tool_path(None, "nix-store"), "nix-store");
/// assert_eq!(
///     tool_path(Some(Utf8Path::new("/nix/var/nix/profiles/default/bin")), "nix"),
///     "/nix/var/nix/profiles/default/bin/nix",
/// );
/// ```
#[must_use]
pub fn tool_path(bin_dir: Option<&Utf8Path>, tool: &str) -> String {
    bin_dir.map_or_else(|| tool.to_owned(), |dir| dir.join(tool).into_string())
}

/// Condense a failed command's stderr (falling back to stdout) into one
/// diagnostic string.
#[must_use]
pub fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_owned()
    } else {
        trimmed.to_owned()
    }
}
