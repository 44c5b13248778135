//! The session engine: one per test. Owns the agent registry, the replay
//! store, and the observation log; drives the start/finish lifecycle and the
//! spy dispatch protocol.

use crate::agent::MockAgent;
use crate::canonical::{canonicalize, observation_to_string};
use crate::config::{SessionSettings, SettingsPatch};
use crate::dialog::{ConsoleDialog, DialogHandler, ProcessDialog};
use crate::errors::SpyglassError;
use crate::file_naming::{
    find_reference_file, observation_base_path, with_suffix, CURRENT_RUN_SUFFIX,
};
use crate::logging::{JsonlLogger, LogEvent};
use crate::observation::{
    Observation, SpyOutcome, INSTANCE_NAME_KEY, RECORD_ARGS_KEY, REPLAY_RESULT_KEY,
    SPY_POINT_KEY,
};
use crate::reconcile::{ensure_ignore_file, reconcile_observations, ReconcileRequest};
use crate::record_replay::{RecordReplayAgent, ReplayContext, ReplayStore};
use crate::registry::{AgentRegistry, AgentSlot};
use crate::runtime::EngineRuntime;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

// ── Verdict ───────────────────────────────────────────────────────────────────

/// What `finish` reports back to the test harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Observations match the reference (or were accepted as the new one).
    Pass,
    /// The test body succeeded but the observations were not reconciled.
    ReconcileFail,
    /// The test body itself failed; reconciliation ran without saving.
    TestFail,
}

// ── SpyOptions ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SpyOptions {
    /// Suppress logging for this call unless an agent's own skip-save flag
    /// says otherwise.
    pub mock_only: bool,
    /// Instance key previously passed to `register_instance`; tags the
    /// observation with the registered display name.
    pub instance: Option<String>,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Exactly one live session serves one test at a time. All mutation is
/// sequential; parallel test execution requires independently constructed
/// sessions.
pub struct Session {
    active: bool,
    test_name: String,
    settings: SessionSettings,
    runtime: EngineRuntime,
    dialog: Arc<dyn DialogHandler>,
    registry: AgentRegistry,
    replay: ReplayStore,
    observations: Vec<String>,
    instances: HashMap<String, String>,
    logger: Option<JsonlLogger>,
}

impl Session {
    /// Start a session against the real filesystem and console.
    pub fn start(
        test_name: impl Into<String>,
        settings: SessionSettings,
    ) -> Result<Self, SpyglassError> {
        let runtime = EngineRuntime::production();
        let dialog: Arc<dyn DialogHandler> = match &settings.dialog_program {
            Some(program) => Arc::new(ProcessDialog::new(
                program.clone(),
                Arc::clone(&runtime.process_runner),
            )),
            None => Arc::new(ConsoleDialog::new(Arc::clone(&runtime.terminal))),
        };
        Self::start_with_runtime(test_name, settings, runtime, dialog)
    }

    /// Start with injected collaborators; the seam tests and embedders use.
    pub fn start_with_runtime(
        test_name: impl Into<String>,
        settings: SessionSettings,
        runtime: EngineRuntime,
        dialog: Arc<dyn DialogHandler>,
    ) -> Result<Self, SpyglassError> {
        let logger = settings.debug_log.as_ref().map(JsonlLogger::new);
        let mut session = Self {
            active: true,
            test_name: test_name.into(),
            settings,
            runtime,
            dialog,
            registry: AgentRegistry::new(),
            replay: ReplayStore::new(),
            observations: Vec::new(),
            instances: HashMap::new(),
            logger,
        };
        session.load_replay_values()?;
        session.log_event("session_start", json!({}));
        Ok(session)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn replay_store_len(&self) -> usize {
        self.replay.len()
    }

    /// The formatted observations collected so far, in call order.
    pub fn observation_log(&self) -> &[String] {
        &self.observations
    }

    /// Apply mid-test overrides. Moving the observation directory re-reads
    /// the replay values from the new location's reference file.
    pub fn settings(&mut self, patch: &SettingsPatch) -> Result<(), SpyglassError> {
        self.ensure_active("settings")?;
        let directory_changed = patch
            .observation_directory
            .as_ref()
            .is_some_and(|dir| *dir != self.settings.observation_directory);
        self.settings.apply(patch);
        if directory_changed {
            self.load_replay_values()?;
        }
        Ok(())
    }

    // ── deployment ───────────────────────────────────────────────────────

    pub fn deploy_agent(&mut self, point: &str, agent: MockAgent) -> Result<(), SpyglassError> {
        self.ensure_active("deploy_agent")?;
        self.registry.deploy(point, AgentSlot::Mock(agent));
        self.log_event("deploy_agent", json!({ "point": point }));
        Ok(())
    }

    pub fn deploy_record_replay_agent(
        &mut self,
        point: &str,
        agent: RecordReplayAgent,
    ) -> Result<(), SpyglassError> {
        self.ensure_active("deploy_record_replay_agent")?;
        self.registry.deploy(point, AgentSlot::RecordReplay(agent));
        self.log_event("deploy_record_replay_agent", json!({ "point": point }));
        Ok(())
    }

    /// Name an instance so observations made on its behalf carry a stable
    /// label distinguishing it from other instances of the same type.
    pub fn register_instance(
        &mut self,
        key: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<(), SpyglassError> {
        self.ensure_active("register_instance")?;
        self.instances.insert(key.into(), display_name.into());
        Ok(())
    }

    pub fn clear_replay_values(&mut self) {
        self.replay.clear();
    }

    // ── spy ──────────────────────────────────────────────────────────────

    pub fn spy(
        &mut self,
        point: Option<&str>,
        observation: Observation,
    ) -> Result<SpyOutcome, SpyglassError> {
        self.spy_with_options(point, observation, &SpyOptions::default())
    }

    pub fn spy_with_options(
        &mut self,
        point: Option<&str>,
        observation: Observation,
        options: &SpyOptions,
    ) -> Result<SpyOutcome, SpyglassError> {
        if !self.active {
            return Ok(SpyOutcome::none());
        }

        let mut working = observation;
        if let Some(name) = point {
            working.set(SPY_POINT_KEY, json!(name));
        }
        if let Some(instance_key) = &options.instance {
            if let Some(display) = self.instances.get(instance_key) {
                working.set(INSTANCE_NAME_KEY, json!(display));
            }
        }
        let mut working = canonicalize(&working, self.settings.decimal_precision);

        let precision = self.settings.decimal_precision;
        let reconcile_mode = self.settings.reconcile_mode;
        let session_record_mode = self.settings.record_mode;
        let dialog = Arc::clone(&self.dialog);
        let test_name = self.test_name.clone();

        // Top-down scan of the point's agent stack; the agent's own work
        // happens before the observation is saved, but saving is never
        // skipped because the agent raised.
        let mut agent_skip: Option<bool> = None;
        let mut is_record_replay = false;
        let active_slot = match point {
            Some(name) => self.registry.find_match_mut(name, &working),
            None => None,
        };
        let outcome = match active_slot {
            None => Ok(SpyOutcome::none()),
            Some(slot) => {
                slot.run_doers(&working);
                match slot {
                    AgentSlot::Mock(agent) => {
                        agent_skip = agent.skip_save();
                        let result = agent.outcome(point.unwrap_or_default(), &working);
                        agent.format(&mut working);
                        result
                    }
                    AgentSlot::RecordReplay(agent) => {
                        is_record_replay = true;
                        let mut ctx = ReplayContext {
                            store: &mut self.replay,
                            dialog: dialog.as_ref(),
                            test_name: &test_name,
                            reconcile_mode,
                            session_record_mode,
                            precision,
                        };
                        agent.outcome(point.unwrap_or_default(), &mut working, &mut ctx)
                    }
                }
            }
        };

        // Record-replay agents never skip saving; the log is where their
        // values persist.
        let skip_save = if is_record_replay {
            false
        } else {
            agent_skip.unwrap_or(options.mock_only)
        };

        if !skip_save {
            let text = observation_to_string(&working, precision);
            let annotation = match &outcome {
                Ok(o) if !o.result.is_none() => format!(" returning {}", o.result),
                _ => String::new(),
            };
            let _ = self
                .runtime
                .terminal
                .write_line(&format!("Observing: {text}{annotation}"));
            self.observations.push(text);

            // A replay hit logs only the argument entry; append the paired
            // stored-result entry so an accepted replay run still carries its
            // recorded values.
            if is_record_replay && working.contains_key(RECORD_ARGS_KEY) {
                if let Ok(o) = &outcome {
                    if let Some(value) = o.result.value() {
                        let mut stored = Observation::new().with(REPLAY_RESULT_KEY, json!(""));
                        if let Some(name) = point {
                            stored.set(SPY_POINT_KEY, json!(name));
                        }
                        stored.set("result", value.clone());
                        let stored = canonicalize(&stored, precision);
                        self.observations
                            .push(observation_to_string(&stored, precision));
                    }
                }
            }
        }

        self.log_event(
            "spy",
            json!({ "point": point, "saved": !skip_save }),
        );
        outcome
    }

    // ── finish ───────────────────────────────────────────────────────────

    /// Persist the observation log and reconcile it against the reference.
    /// `test_failure` carries the test's own failure message, if any; it
    /// blocks saving while still running reconciliation for inspection.
    pub fn finish(&mut self, test_failure: Option<&str>) -> Result<Verdict, SpyglassError> {
        self.ensure_active("finish")?;
        self.active = false;

        let fs = self.runtime.file_system.as_ref();
        let dir = &self.settings.observation_directory;
        let base = observation_base_path(dir, &self.test_name);
        if let Some(parent) = base.parent() {
            fs.create_dir_all(parent)?;
        }
        ensure_ignore_file(&self.runtime, dir)?;

        let (reference_path, _) = find_reference_file(fs, dir, &self.test_name);
        let current_path = with_suffix(&base, CURRENT_RUN_SUFFIX);
        if fs.exists(&current_path) {
            fs.remove_file(&current_path)?;
        }
        self.save_observations(&current_path)?;

        let reconciled = reconcile_observations(
            &self.runtime,
            self.dialog.as_ref(),
            &ReconcileRequest {
                test_name: &self.test_name,
                reference_path: &reference_path,
                current_path: &current_path,
                mode: self.settings.reconcile_mode,
                no_save: test_failure,
            },
        )?;

        let verdict = if test_failure.is_some() {
            Verdict::TestFail
        } else if reconciled {
            Verdict::Pass
        } else {
            Verdict::ReconcileFail
        };
        self.log_event(
            "finish",
            json!({ "verdict": format!("{verdict:?}"), "reconciled": reconciled }),
        );
        self.registry.clear();
        self.observations.clear();
        Ok(verdict)
    }

    // ── internals ────────────────────────────────────────────────────────

    fn ensure_active(&self, operation: &str) -> Result<(), SpyglassError> {
        if self.active {
            Ok(())
        } else {
            Err(SpyglassError::Session(format!(
                "{operation} requires an active session; call Session::start first"
            )))
        }
    }

    fn load_replay_values(&mut self) -> Result<(), SpyglassError> {
        let fs = self.runtime.file_system.as_ref();
        let (reference, exists) = find_reference_file(
            fs,
            &self.settings.observation_directory,
            &self.test_name,
        );
        self.replay = if exists {
            let contents = fs.read_to_string(&reference)?;
            ReplayStore::load_reference(&contents, self.settings.decimal_precision)?
        } else {
            ReplayStore::new()
        };
        Ok(())
    }

    fn save_observations(&self, path: &std::path::Path) -> Result<(), SpyglassError> {
        let mut body = String::from("[\n");
        body.push_str(&self.observations.join(",\n"));
        if !self.observations.is_empty() {
            body.push('\n');
        }
        body.push_str("]\n");
        self.runtime.file_system.write_string(path, &body)
    }

    fn log_event(&self, event_type: &str, payload: serde_json::Value) {
        if let Some(logger) = &self.logger {
            let _ = logger.append(&LogEvent {
                event_type,
                test_name: &self.test_name,
                payload,
            });
        }
    }
}
