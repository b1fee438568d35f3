//! Shared test utilities for the packager crate.

use crate::error::{PackagerError, Result};
use crate::exec::CommandExecutor;
use std::collections::VecDeque;
use std::process::{ExitStatus, Output};
use std::sync::Mutex;

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code.unsigned_abs())
}

/// Creates a successful command `Output` with empty stdout and stderr.
#[must_use]
pub fn success_output() -> Output {
    Output {
        status: exit_status(0),
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

/// Creates a successful command `Output` with the given stdout.
#[must_use]
pub fn stdout_output(stdout: &str) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given stderr message.
#[must_use]
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(1),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Side effect a stubbed command performs on the file system before it
/// returns, standing in for the files a real tool would write.
pub type StubEffect = fn(&[&str]);

/// Writes a placeholder file at the command's last argument.
///
/// `pkgbuild`, `productbuild` and friends all take their output path last.
///
/// # Panics
///
/// Panics if the command had no arguments or the file cannot be written.
pub fn touch_last_arg(args: &[&str]) {
    let dest = args.last().expect("command has an output argument");
    std::fs::write(dest, b"stub artefact").expect("write stub artefact");
}

/// Represents an expected command invocation for testing.
#[derive(Debug)]
pub struct ExpectedCall {
    /// The command to execute (e.g., "nix-store").
    pub cmd: String,
    /// The arguments to pass to the command.
    pub args: Vec<String>,
    /// The result to return when this command is invoked.
    pub result: Result<Output>,
    /// Optional file-system side effect applied before returning.
    pub effect: Option<StubEffect>,
}

impl ExpectedCall {
    /// Expect `cmd args...` and answer with `result`.
    #[must_use]
    pub fn new(cmd: &str, args: &[&str], result: Result<Output>) -> Self {
        Self {
            cmd: cmd.to_owned(),
            args: args.iter().map(|&a| a.to_owned()).collect(),
            result,
            effect: None,
        }
    }

    /// Attach a side effect to the call.
    #[must_use]
    pub fn with_effect(mut self, effect: StubEffect) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// A stub implementation of `CommandExecutor` for testing.
///
/// Records expected command invocations and returns predefined results,
/// allowing tests to verify command execution without side effects.
/// Argument vectors are compared with [`ARG_WILDCARD`] entries matching
/// anything, for paths that only exist inside temporary directories.
#[derive(Debug, Default)]
pub struct StubExecutor {
    expected: Mutex<VecDeque<ExpectedCall>>,
    environments: Mutex<Vec<Vec<(String, String)>>>,
}

/// Argument placeholder accepted by [`StubExecutor`] for any value.
pub const ARG_WILDCARD: &str = "<any>";

impl StubExecutor {
    /// Creates a new `StubExecutor` with the given expected calls.
    #[must_use]
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: Mutex::new(expected.into()),
            environments: Mutex::new(Vec::new()),
        }
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        assert!(
            self.expected.lock().expect("stub lock").is_empty(),
            "expected no further command invocations"
        );
    }

    /// Environment variables passed to each `run_with_env` call, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn environments(&self) -> Vec<Vec<(String, String)>> {
        self.environments.lock().expect("stub lock").clone()
    }

    fn matches(call: &ExpectedCall, cmd: &str, args: &[&str]) -> bool {
        call.cmd == cmd
            && call.args.len() == args.len()
            && call
                .args
                .iter()
                .zip(args)
                .all(|(expected, actual)| expected == ARG_WILDCARD || expected == actual)
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let call = self
            .expected
            .lock()
            .expect("stub lock")
            .pop_front()
            .ok_or_else(|| PackagerError::StubMismatch {
                message: format!("unexpected command invocation: {cmd} {}", args.join(" ")),
            })?;

        if !Self::matches(&call, cmd, args) {
            return Err(PackagerError::StubMismatch {
                message: format!(
                    "expected `{} {}`, got `{cmd} {}`",
                    call.cmd,
                    call.args.join(" "),
                    args.join(" ")
                ),
            });
        }

        if let Some(effect) = call.effect {
            effect(args);
        }
        call.result
    }

    fn run_with_env(&self, cmd: &str, args: &[&str], env: &[(&str, &str)]) -> Result<Output> {
        self.environments.lock().expect("stub lock").push(
            env.iter()
                .map(|&(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        );
        self.run(cmd, args)
    }
}
