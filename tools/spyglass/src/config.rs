//! Session settings and the optional `spyglass.toml` configuration layer.

use crate::canonical::DEFAULT_DECIMAL_PRECISION;
use crate::errors::SpyglassError;
use crate::reconcile::ReconcileMode;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_OBSERVATION_DIRECTORY: &str = "/tmp/spyglass_observations";

pub const OBSERVATION_DIR_ENV: &str = "SPYGLASS_OBSERVATION_DIR";
pub const RECONCILE_ENV: &str = "SPYGLASS_RECONCILE";
pub const RECORD_MODE_ENV: &str = "SPYGLASS_RECORD_MODE";

// ── file layer ────────────────────────────────────────────────────────────────

/// On-disk configuration, all fields optional. Anything absent falls back to
/// an environment variable and then to the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub observation_directory: Option<PathBuf>,
    pub reconcile_mode: Option<String>,
    pub decimal_precision: Option<u32>,
    pub record_mode: Option<bool>,
    pub dialog_program: Option<PathBuf>,
    pub debug_log: Option<PathBuf>,
}

impl ConfigFile {
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self, SpyglassError> {
        let text = fs.read_to_string(path)?;
        toml::from_str(&text).map_err(|e| SpyglassError::ConfigParse(e.to_string()))
    }
}

// ── SessionSettings ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub observation_directory: PathBuf,
    pub reconcile_mode: ReconcileMode,
    pub decimal_precision: u32,
    pub record_mode: bool,
    pub dialog_program: Option<PathBuf>,
    pub debug_log: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            observation_directory: PathBuf::from(DEFAULT_OBSERVATION_DIRECTORY),
            reconcile_mode: ReconcileMode::Console,
            decimal_precision: DEFAULT_DECIMAL_PRECISION,
            record_mode: false,
            dialog_program: None,
            debug_log: None,
        }
    }
}

impl SessionSettings {
    /// Resolution order per field: config file, then environment, then the
    /// built-in default.
    pub fn from_config(
        config: &ConfigFile,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, SpyglassError> {
        let mut settings = Self::default();

        if let Some(dir) = &config.observation_directory {
            settings.observation_directory = dir.clone();
        } else if let Some(dir) = env(OBSERVATION_DIR_ENV) {
            settings.observation_directory = PathBuf::from(dir);
        }

        let mode_text = config
            .reconcile_mode
            .clone()
            .or_else(|| env(RECONCILE_ENV));
        if let Some(text) = mode_text {
            settings.reconcile_mode = ReconcileMode::parse(&text).ok_or_else(|| {
                SpyglassError::InvalidConfig(format!("unknown reconcile mode: {text}"))
            })?;
        }

        if let Some(precision) = config.decimal_precision {
            settings.decimal_precision = precision;
        }

        if let Some(record) = config.record_mode {
            settings.record_mode = record;
        } else if let Some(text) = env(RECORD_MODE_ENV) {
            settings.record_mode = text == "1" || text.eq_ignore_ascii_case("true");
        }

        settings.dialog_program = config.dialog_program.clone();
        settings.debug_log = config.debug_log.clone();
        Ok(settings)
    }
}

/// Mid-test overrides; only the fields that are set change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    pub observation_directory: Option<PathBuf>,
    pub reconcile_mode: Option<ReconcileMode>,
    pub decimal_precision: Option<u32>,
    pub record_mode: Option<bool>,
}

impl SessionSettings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(dir) = &patch.observation_directory {
            self.observation_directory = dir.clone();
        }
        if let Some(mode) = patch.reconcile_mode {
            self.reconcile_mode = mode;
        }
        if let Some(precision) = patch.decimal_precision {
            self.decimal_precision = precision;
        }
        if let Some(record) = patch.record_mode {
            self.record_mode = record;
        }
    }
}
