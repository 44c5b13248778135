//! The human-reconciler dialog protocol.
//!
//! The engine only defines the request/response contract; rendering is the
//! handler's business. Two handlers ship here: a console prompt over the
//! `Terminal` trait and an external dialog program driven over argv/stdout.

use crate::errors::SpyglassError;
use crate::runtime::{ProcessRequest, ProcessRunner, Terminal};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogRequest {
    pub before_prompt: String,
    pub after_prompt: String,
    pub content: String,
    pub options: Vec<String>,
    pub default_option: String,
}

impl DialogRequest {
    /// The last option is the default, matching the dialog script contract.
    pub fn new(
        before_prompt: impl Into<String>,
        after_prompt: impl Into<String>,
        content: impl Into<String>,
        options: &[&str],
    ) -> Self {
        let options: Vec<String> = options.iter().map(|o| (*o).to_string()).collect();
        let default_option = options.last().cloned().unwrap_or_default();
        Self {
            before_prompt: before_prompt.into(),
            after_prompt: after_prompt.into(),
            content: content.into(),
            options,
            default_option,
        }
    }
}

pub trait DialogHandler: Send + Sync {
    /// Returns the chosen option, guaranteed to be a member of
    /// `request.options`.
    fn choose(&self, request: &DialogRequest) -> Result<String, SpyglassError>;

    /// Like `choose`, but the content block is editable; returns the chosen
    /// option and the (possibly modified) content.
    fn choose_with_edits(
        &self,
        request: &DialogRequest,
    ) -> Result<(String, String), SpyglassError>;
}

// ── ConsoleDialog ─────────────────────────────────────────────────────────────

/// Prompts on the console. Options are selectable by full name or first
/// letter; empty or unrecognized input picks the default. Content editing is
/// not possible on a plain console, so `choose_with_edits` returns the
/// content unchanged.
pub struct ConsoleDialog {
    terminal: Arc<dyn Terminal>,
}

impl ConsoleDialog {
    pub fn new(terminal: Arc<dyn Terminal>) -> Self {
        Self { terminal }
    }

    fn prompt(&self, request: &DialogRequest) -> Result<String, SpyglassError> {
        self.terminal.write_line(&request.before_prompt)?;
        if !request.content.is_empty() {
            self.terminal.write_line(&request.content)?;
        }
        let menu = request
            .options
            .iter()
            .map(|o| format!("{o} ({})", initial(o)))
            .collect::<Vec<_>>()
            .join(" / ");
        self.terminal.write_line(&format!(
            "{} [{menu}; default {}]: ",
            request.after_prompt, request.default_option
        ))?;
        let answer = self.terminal.read_line()?;
        let answer = answer.trim();
        for option in &request.options {
            if answer.eq_ignore_ascii_case(option)
                || answer.eq_ignore_ascii_case(&initial(option))
            {
                return Ok(option.clone());
            }
        }
        Ok(request.default_option.clone())
    }
}

fn initial(option: &str) -> String {
    option.chars().take(1).collect::<String>().to_lowercase()
}

impl DialogHandler for ConsoleDialog {
    fn choose(&self, request: &DialogRequest) -> Result<String, SpyglassError> {
        self.prompt(request)
    }

    fn choose_with_edits(
        &self,
        request: &DialogRequest,
    ) -> Result<(String, String), SpyglassError> {
        let option = self.prompt(request)?;
        Ok((option, request.content.clone()))
    }
}

// ── ProcessDialog ─────────────────────────────────────────────────────────────

/// Drives an external dialog program. The program receives
/// `--before-prompt`, `--after-prompt`, `--content` (plus
/// `--editable-content` for the edit-capable variant) and the option list as
/// positional arguments; it prints the chosen option on the first stdout
/// line, followed by the edited content.
pub struct ProcessDialog {
    program: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl ProcessDialog {
    pub fn new(program: PathBuf, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { program, runner }
    }

    fn invoke(
        &self,
        request: &DialogRequest,
        editable: bool,
    ) -> Result<(String, String), SpyglassError> {
        let mut args = vec![
            "--before-prompt".to_string(),
            request.before_prompt.clone(),
            "--after-prompt".to_string(),
            request.after_prompt.clone(),
            "--content".to_string(),
            request.content.clone(),
        ];
        if editable {
            args.push("--editable-content".to_string());
        }
        args.extend(request.options.iter().cloned());

        let output = self.runner.run(ProcessRequest {
            program: self.program.display().to_string(),
            args,
            cwd: None,
        })?;
        if output.exit_code != 0 {
            return Err(SpyglassError::CollaboratorMissing(format!(
                "dialog program {} exited with {}",
                self.program.display(),
                output.exit_code
            )));
        }
        let mut lines = output.stdout.lines();
        let option = lines.next().unwrap_or_default().to_string();
        let content = lines.collect::<Vec<_>>().join("\n");
        if !request.options.contains(&option) {
            return Err(SpyglassError::CollaboratorMissing(format!(
                "dialog program returned unknown option: {option}"
            )));
        }
        Ok((option, content))
    }
}

impl DialogHandler for ProcessDialog {
    fn choose(&self, request: &DialogRequest) -> Result<String, SpyglassError> {
        self.invoke(request, false).map(|(option, _)| option)
    }

    fn choose_with_edits(
        &self,
        request: &DialogRequest,
    ) -> Result<(String, String), SpyglassError> {
        self.invoke(request, true)
    }
}

// ── ScriptedDialog ────────────────────────────────────────────────────────────

/// Test double: answers from a queue. A `None` content echoes the request's
/// content back (an accept-without-edits).
#[derive(Default)]
pub struct ScriptedDialog {
    responses: Mutex<VecDeque<(String, Option<String>)>>,
    requests: Mutex<Vec<DialogRequest>>,
}

impl ScriptedDialog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, option: &str, content: Option<&str>) {
        self.responses
            .lock()
            .expect("scripted dialog lock")
            .push_back((option.to_string(), content.map(str::to_string)));
    }

    pub fn requests(&self) -> Vec<DialogRequest> {
        self.requests.lock().expect("scripted dialog lock").clone()
    }

    fn next(&self, request: &DialogRequest) -> Result<(String, String), SpyglassError> {
        self.requests
            .lock()
            .expect("scripted dialog lock")
            .push(request.clone());
        let (option, content) = self
            .responses
            .lock()
            .expect("scripted dialog lock")
            .pop_front()
            .ok_or_else(|| {
                SpyglassError::CollaboratorMissing("scripted dialog exhausted".to_string())
            })?;
        Ok((option, content.unwrap_or_else(|| request.content.clone())))
    }
}

impl DialogHandler for ScriptedDialog {
    fn choose(&self, request: &DialogRequest) -> Result<String, SpyglassError> {
        self.next(request).map(|(option, _)| option)
    }

    fn choose_with_edits(
        &self,
        request: &DialogRequest,
    ) -> Result<(String, String), SpyglassError> {
        self.next(request)
    }
}
