//! Reconciliation of a test run's observation file against the accepted
//! reference.
//!
//! The engine never diffs or merges content itself: it compares for
//! equality, and on differences delegates to an external `diff` for display
//! and to `kdiff3` for three-way merging, with accept/deny decisions routed
//! through the dialog protocol.

use crate::dialog::{DialogHandler, DialogRequest};
use crate::errors::SpyglassError;
use crate::runtime::{EngineRuntime, ProcessRequest};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DIFF_SUFFIX: &str = ".diff";
pub const MERGED_SUFFIX: &str = ".out";

// ── ReconcileMode ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileMode {
    /// Fail on any difference.
    Abort,
    /// Accept the current run as the new reference.
    Accept,
    /// Show the diff and prompt on the console.
    Console,
    /// Show the diff and prompt through the dialog collaborator.
    Dialog,
    /// Merge interactively with kdiff3.
    Kdiff3,
}

impl ReconcileMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "abort" => Some(Self::Abort),
            "accept" => Some(Self::Accept),
            "console" => Some(Self::Console),
            "dialog" => Some(Self::Dialog),
            "kdiff3" => Some(Self::Kdiff3),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Accept => "accept",
            Self::Console => "console",
            Self::Dialog => "dialog",
            Self::Kdiff3 => "kdiff3",
        }
    }
}

// ── ReconcileRequest ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReconcileRequest<'a> {
    pub test_name: &'a str,
    pub reference_path: &'a Path,
    pub current_path: &'a Path,
    pub mode: ReconcileMode,
    /// Non-None when the test itself already failed: observations stay on
    /// disk for inspection but the reference is never overwritten.
    pub no_save: Option<&'a str>,
}

/// Reconcile the current-run file against the reference. Returns true when
/// the reference now reflects the accepted state (or was already equal).
pub fn reconcile_observations(
    runtime: &EngineRuntime,
    dialog: &dyn DialogHandler,
    request: &ReconcileRequest<'_>,
) -> Result<bool, SpyglassError> {
    let fs = runtime.file_system.as_ref();
    let terminal = runtime.terminal.as_ref();
    let reference = request.reference_path;
    let current = request.current_path;

    if !fs.exists(reference) {
        // First run for this test: the current observations become the
        // reference, unless the failing test blocked saving.
        return match request.no_save {
            Some(reason) => {
                terminal.write_line(&format!(
                    "Not saving reference observations for {}: {reason}",
                    request.test_name
                ))?;
                Ok(true)
            }
            None => {
                terminal.write_line(&format!(
                    "Saving reference observations for {} to {}",
                    request.test_name,
                    reference.display()
                ))?;
                fs.rename(current, reference)?;
                Ok(true)
            }
        };
    }

    let reference_text = fs.read_to_string(reference)?;
    let current_text = fs.read_to_string(current)?;
    let diff_path = crate::file_naming::with_suffix(
        &current.with_extension(""),
        DIFF_SUFFIX,
    );
    if reference_text == current_text {
        fs.remove_file(current)?;
        if fs.exists(&diff_path) {
            fs.remove_file(&diff_path)?;
        }
        return Ok(true);
    }

    terminal.write_line(&format!(
        "There were differences between the reference and current observations for {}",
        request.test_name
    ))?;

    match request.mode {
        ReconcileMode::Abort => {
            terminal.write_line(&format!(
                "Observation differences remain for {}; reconcile mode is abort",
                request.test_name
            ))?;
            Ok(false)
        }
        ReconcileMode::Accept => accept_current(runtime, request),
        ReconcileMode::Console | ReconcileMode::Dialog => {
            let diff_text = unified_diff(runtime, reference, current)?;
            fs.write_string(&diff_path, &diff_text)?;
            terminal.write_line(&diff_text)?;
            if let Some(reason) = request.no_save {
                terminal.write_line(&format!(
                    "Not accepting observations for {}: {reason}",
                    request.test_name
                ))?;
                return Ok(false);
            }
            let prompt = DialogRequest::new(
                format!("Differences found for test {}.", request.test_name),
                "Do you want to accept the current observations?",
                diff_text,
                &["accept", "deny"],
            );
            if dialog.choose(&prompt)? == "accept" {
                accept_current(runtime, request)
            } else {
                Ok(false)
            }
        }
        ReconcileMode::Kdiff3 => {
            if let Some(reason) = request.no_save {
                terminal.write_line(&format!(
                    "Not merging observations for {}: {reason}",
                    request.test_name
                ))?;
                return Ok(false);
            }
            let merged_path = crate::file_naming::with_suffix(
                &current.with_extension(""),
                MERGED_SUFFIX,
            );
            let output = runtime.process_runner.run(ProcessRequest {
                program: "kdiff3".to_string(),
                args: vec![
                    reference.display().to_string(),
                    current.display().to_string(),
                    "-m".to_string(),
                    "-o".to_string(),
                    merged_path.display().to_string(),
                ],
                cwd: None,
            })?;
            if output.exit_code == 0 {
                terminal.write_line(&format!(
                    "Saving merged observations for {}",
                    request.test_name
                ))?;
                fs.rename(&merged_path, reference)?;
                fs.remove_file(current)?;
                if fs.exists(&diff_path) {
                    fs.remove_file(&diff_path)?;
                }
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }
}

fn accept_current(
    runtime: &EngineRuntime,
    request: &ReconcileRequest<'_>,
) -> Result<bool, SpyglassError> {
    if let Some(reason) = request.no_save {
        runtime.terminal.write_line(&format!(
            "Not accepting observations for {}: {reason}",
            request.test_name
        ))?;
        return Ok(false);
    }
    runtime.terminal.write_line(&format!(
        "Accepting new observations for {}",
        request.test_name
    ))?;
    runtime
        .file_system
        .rename(request.current_path, request.reference_path)?;
    let diff_path = crate::file_naming::with_suffix(
        &request.current_path.with_extension(""),
        DIFF_SUFFIX,
    );
    if runtime.file_system.exists(&diff_path) {
        runtime.file_system.remove_file(&diff_path)?;
    }
    Ok(true)
}

/// Run `diff -u -w` over the two files. Exit codes 0 and 1 are normal diff
/// outcomes; anything else means the collaborator is unusable.
fn unified_diff(
    runtime: &EngineRuntime,
    reference: &Path,
    current: &Path,
) -> Result<String, SpyglassError> {
    let output = runtime.process_runner.run(ProcessRequest {
        program: "diff".to_string(),
        args: vec![
            "-u".to_string(),
            "-w".to_string(),
            reference.display().to_string(),
            current.display().to_string(),
        ],
        cwd: None,
    })?;
    if output.exit_code > 1 {
        return Err(SpyglassError::CollaboratorMissing(format!(
            "diff exited with {}: {}",
            output.exit_code, output.stderr
        )));
    }
    Ok(output.stdout)
}

/// Bootstrap the observation directory's ignore file, listing the artifacts
/// that must never be committed alongside references.
pub fn ensure_ignore_file(runtime: &EngineRuntime, dir: &Path) -> Result<(), SpyglassError> {
    let ignore = dir.join(".gitignore");
    if !runtime.file_system.exists(&ignore) {
        runtime
            .file_system
            .write_string(&ignore, "*_now.json\n*.diff\n")?;
    }
    Ok(())
}
