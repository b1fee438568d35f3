//! Progress and summary text for the command-line surface.

use crate::error::PackagerError;
use crate::pipeline::{PipelineReport, PlannedComponent};
use std::io::Write;

/// Write one line to `stderr`, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort progress output.
    }
}

/// Summary printed after a successful run.
///
/// # Example
///
/// ```
/// use nix2pkg_packager::output::success_message;
///
/// let message = success_message(3, 1, "out/nix2pkg-hello-2.12-0a1b2c3d4e5f.pkg".as_ref());
/// assert!(message.contains("4 components"));
/// assert!(message.contains("1 reused"));
/// ```
#[must_use]
pub fn success_message(built: usize, reused: usize, distribution: &camino::Utf8Path) -> String {
    let total = built + reused;
    let plural = if total == 1 { "component" } else { "components" };
    format!("Packaged {total} {plural} ({built} built, {reused} reused) into {distribution}")
}

/// Lines describing a finished run.
#[must_use]
pub fn report_lines(report: &PipelineReport) -> Vec<String> {
    let mut lines = vec![success_message(
        report.built,
        report.reused,
        &report.distribution.path,
    )];
    lines.extend(
        report
            .distribution
            .components
            .iter()
            .map(|component| format!("  - {} ({})", component.identifier, component.path)),
    );
    lines
}

/// Ordered closure listing for `nix2pkg show`.
#[must_use]
pub fn plan_lines(plan: &[PlannedComponent]) -> Vec<String> {
    plan.iter()
        .enumerate()
        .map(|(index, planned)| {
            format!(
                "{:>4}. {} {}",
                index + 1,
                planned.identifier,
                planned.store_path
            )
        })
        .collect()
}

/// Final failure report: the error itself followed by any hint.
#[must_use]
pub fn failure_lines(err: &PackagerError) -> Vec<String> {
    let mut lines = vec![format!("error: {err}")];
    match err {
        PackagerError::ComponentsFailed { .. } => lines.push(
            "hint: successful components were kept; rerun to retry only the failures".to_owned(),
        ),
        PackagerError::OutputDirLocked { .. } => {
            lines.push("hint: wait for the other run or choose another --output-dir".to_owned());
        }
        _ => {}
    }
    lines
}
