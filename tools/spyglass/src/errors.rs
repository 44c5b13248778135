use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpyglassError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("spy point {point} requires mocking but no agent provided a result")]
    MockingRequired { point: String },
    #[error("no replay value available for spy point {point}: {detail}")]
    ReplayMiss { point: String, detail: String },
    #[error("reconcile error: {0}")]
    Reconcile(String),
    #[error("external collaborator missing: {0}")]
    CollaboratorMissing(String),
    #[error("agent raised for spy point {point}: {payload}")]
    AgentException { point: String, payload: Value },
    #[error("session error: {0}")]
    Session(String),
}
