//! Trait seam over the process's environment: filesystem, external processes,
//! and the console. Production implementations live next to in-memory fakes
//! so reconciliation and dialog flows are testable without kdiff3 or a TTY.

use crate::errors::SpyglassError;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait ProcessRunner: Send + Sync {
    /// Run to completion, capturing output. A program that cannot be launched
    /// at all maps to `CollaboratorMissing`.
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, SpyglassError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, SpyglassError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), SpyglassError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), SpyglassError>;
    fn remove_file(&self, path: &Path) -> Result<(), SpyglassError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), SpyglassError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn stdin_is_tty(&self) -> bool;
    fn write_line(&self, line: &str) -> Result<(), SpyglassError>;
    fn read_line(&self) -> Result<String, SpyglassError>;
}

// ── production implementations ────────────────────────────────────────────────

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, SpyglassError> {
        std::fs::read_to_string(path).map_err(|e| SpyglassError::Io(e.to_string()))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), SpyglassError> {
        std::fs::write(path, contents).map_err(|e| SpyglassError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), SpyglassError> {
        std::fs::create_dir_all(path).map_err(|e| SpyglassError::Io(e.to_string()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), SpyglassError> {
        std::fs::remove_file(path).map_err(|e| SpyglassError::Io(e.to_string()))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), SpyglassError> {
        std::fs::rename(from, to).map_err(|e| SpyglassError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionProcessRunner;

impl ProcessRunner for ProductionProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, SpyglassError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpyglassError::CollaboratorMissing(request.program.clone())
            } else {
                SpyglassError::Io(e.to_string())
            }
        })?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn stdin_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdin())
    }

    fn write_line(&self, line: &str) -> Result<(), SpyglassError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| SpyglassError::Io(e.to_string()))
    }

    fn read_line(&self) -> Result<String, SpyglassError> {
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| SpyglassError::Io(e.to_string()))?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

// ── EngineRuntime ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EngineRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl EngineRuntime {
    pub fn production() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

// ── fakes ─────────────────────────────────────────────────────────────────────

/// In-memory filesystem keyed by path. Directories are implicit.
#[derive(Default)]
pub struct FakeFileSystem {
    files: Mutex<HashMap<PathBuf, String>>,
}

impl FakeFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, path: impl AsRef<Path>, contents: &str) {
        self.files
            .lock()
            .expect("fake fs lock")
            .insert(path.as_ref().to_path_buf(), contents.to_string());
    }

    pub fn snapshot(&self) -> HashMap<PathBuf, String> {
        self.files.lock().expect("fake fs lock").clone()
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, SpyglassError> {
        self.files
            .lock()
            .expect("fake fs lock")
            .get(path)
            .cloned()
            .ok_or_else(|| SpyglassError::Io(format!("not found: {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), SpyglassError> {
        self.files
            .lock()
            .expect("fake fs lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, _path: &Path) -> Result<(), SpyglassError> {
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), SpyglassError> {
        self.files
            .lock()
            .expect("fake fs lock")
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SpyglassError::Io(format!("not found: {}", path.display())))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), SpyglassError> {
        let mut files = self.files.lock().expect("fake fs lock");
        let contents = files
            .remove(from)
            .ok_or_else(|| SpyglassError::Io(format!("not found: {}", from.display())))?;
        files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("fake fs lock").contains_key(path)
    }
}

/// Returns queued responses in FIFO order and records every request.
#[derive(Default)]
pub struct FakeProcessRunner {
    responses: Mutex<VecDeque<Result<ProcessOutput, SpyglassError>>>,
    requests: Mutex<Vec<ProcessRequest>>,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<ProcessOutput, SpyglassError>) {
        self.responses
            .lock()
            .expect("fake runner lock")
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().expect("fake runner lock").clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, SpyglassError> {
        self.requests
            .lock()
            .expect("fake runner lock")
            .push(request.clone());
        self.responses
            .lock()
            .expect("fake runner lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(SpyglassError::CollaboratorMissing(request.program.clone()))
            })
    }
}

/// Scripted console: queued input lines, captured output.
#[derive(Default)]
pub struct FakeTerminal {
    input: Mutex<VecDeque<String>>,
    output: Mutex<Vec<String>>,
    pub tty: bool,
}

impl FakeTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&self, line: &str) {
        self.input
            .lock()
            .expect("fake terminal lock")
            .push_back(line.to_string());
    }

    pub fn lines(&self) -> Vec<String> {
        self.output.lock().expect("fake terminal lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn stdin_is_tty(&self) -> bool {
        self.tty
    }

    fn write_line(&self, line: &str) -> Result<(), SpyglassError> {
        self.output
            .lock()
            .expect("fake terminal lock")
            .push(line.to_string());
        Ok(())
    }

    fn read_line(&self) -> Result<String, SpyglassError> {
        Ok(self
            .input
            .lock()
            .expect("fake terminal lock")
            .pop_front()
            .unwrap_or_default())
    }
}
