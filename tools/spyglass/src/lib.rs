pub mod agent;
pub mod canonical;
pub mod config;
pub mod dialog;
pub mod errors;
pub mod file_naming;
pub mod filter;
pub mod intercept;
pub mod logging;
pub mod observation;
pub mod reconcile;
pub mod record_replay;
pub mod registry;
pub mod runtime;
pub mod session;

pub use agent::MockAgent;
pub use errors::SpyglassError;
pub use observation::{Observation, SpyOutcome, SpyResult};
pub use record_replay::RecordReplayAgent;
pub use session::{Session, SpyOptions, Verdict};

use clap::{error::ErrorKind, Parser};
use config::ConfigFile;
use dialog::{ConsoleDialog, DialogHandler, ProcessDialog};
use reconcile::{reconcile_observations, ReconcileMode, ReconcileRequest};
use runtime::EngineRuntime;
use std::path::PathBuf;
use std::sync::Arc;

/// Standalone reconciliation of an observation file pair, for driving the
/// accept/reject flow outside a test run (or from another language's test
/// harness).
#[derive(Debug, Clone, Parser)]
#[command(name = "spyglass")]
#[command(about = "Reconcile recorded observations against a reference file")]
pub struct Cli {
    /// The accepted reference observation file.
    #[arg(long)]
    pub reference: PathBuf,
    /// The current run's observation file.
    #[arg(long)]
    pub current: PathBuf,
    /// Test name shown in prompts and messages.
    #[arg(long)]
    pub test: String,
    /// abort | accept | console | dialog | kdiff3
    #[arg(long)]
    pub mode: Option<String>,
    /// Reason the reference must not be overwritten (set when the test failed).
    #[arg(long = "no-save-reason")]
    pub no_save_reason: Option<String>,
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run() -> Result<i32, SpyglassError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let runtime = EngineRuntime::production();
    run_with_runtime(&args, &|key| std::env::var(key).ok(), &runtime, None)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    env: &dyn Fn(&str) -> Option<String>,
    runtime: &EngineRuntime,
    dialog: Option<Arc<dyn DialogHandler>>,
) -> Result<i32, SpyglassError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(SpyglassError::Cli(error.to_string())),
        },
    };

    let config = match &cli.config {
        Some(path) => ConfigFile::load(runtime.file_system.as_ref(), path)?,
        None => ConfigFile::default(),
    };

    let mode_text = cli
        .mode
        .clone()
        .or_else(|| env(config::RECONCILE_ENV))
        .or_else(|| config.reconcile_mode.clone());
    let mode = match mode_text {
        Some(text) => ReconcileMode::parse(&text).ok_or_else(|| {
            SpyglassError::InvalidConfig(format!("unknown reconcile mode: {text}"))
        })?,
        None => ReconcileMode::Console,
    };

    let dialog: Arc<dyn DialogHandler> = match dialog {
        Some(dialog) => dialog,
        None => match &config.dialog_program {
            Some(program) => Arc::new(ProcessDialog::new(
                program.clone(),
                Arc::clone(&runtime.process_runner),
            )),
            None => Arc::new(ConsoleDialog::new(Arc::clone(&runtime.terminal))),
        },
    };

    let reconciled = reconcile_observations(
        runtime,
        dialog.as_ref(),
        &ReconcileRequest {
            test_name: &cli.test,
            reference_path: &cli.reference,
            current_path: &cli.current,
            mode,
            no_save: cli.no_save_reason.as_deref(),
        },
    )?;
    Ok(if reconciled { 0 } else { 1 })
}
