//! The observation data model: key/value snapshots taken at spy points, and
//! the sentinel results an agent can hand back to the caller.

use serde_json::{Map, Value};
use std::fmt;

/// Reserved key identifying the spy point an observation was taken at.
/// Named so it sorts ahead of ordinary keys in the canonical form.
pub const SPY_POINT_KEY: &str = "__spy_point__";
/// Reserved key carrying the registered display name of the calling instance.
pub const INSTANCE_NAME_KEY: &str = "__instance_name__";
/// Marker key on the argument entry of a record-replay pair.
pub const RECORD_ARGS_KEY: &str = "__record_args__";
/// Marker key on the stored-result entry of a record-replay pair.
pub const REPLAY_RESULT_KEY: &str = "__replay_result__";
/// Transient key used while computing a replay lookup; never persisted.
pub const REPLAY_INDEX_KEY: &str = "__replay_index__";

const RESERVED_KEYS: [&str; 5] = [
    SPY_POINT_KEY,
    INSTANCE_NAME_KEY,
    RECORD_ARGS_KEY,
    REPLAY_RESULT_KEY,
    REPLAY_INDEX_KEY,
];

// ── Observation ───────────────────────────────────────────────────────────────

/// An ordered string-keyed map of JSON values. A fresh observation is built
/// per spy call; once appended to the session log it is never touched again.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Observation {
    entries: Map<String, Value>,
}

impl Observation {
    pub fn new() -> Self {
        Self {
            entries: Map::new(),
        }
    }

    /// Builder-style insert, for call sites assembling an observation inline.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// A copy with every engine-reserved key removed; this is the caller's
    /// argument set, used as the structural identity for replay lookups.
    pub fn without_reserved_keys(&self) -> Observation {
        let entries = self
            .entries
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self { entries }
    }

    /// Overlay `other` on top of this observation, keeping `other`'s values
    /// on key collisions.
    pub fn merged_with(&self, other: &Observation) -> Observation {
        let mut entries = self.entries.clone();
        for (k, v) in other.iter() {
            entries.insert(k.clone(), v.clone());
        }
        Self { entries }
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.entries.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.entries)
    }
}

impl From<Map<String, Value>> for Observation {
    fn from(entries: Map<String, Value>) -> Self {
        Self { entries }
    }
}

// ── Sentinels ─────────────────────────────────────────────────────────────────

/// The result of a spy call. `None` and `Continue` are reserved sentinels
/// distinct from every legal payload, including JSON `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum SpyResult {
    /// No agent applied, or the active agent gave no instruction.
    None,
    /// The active agent explicitly declined to short-circuit; the underlying
    /// computation must proceed and its real result is the one that counts.
    Continue,
    /// The agent supplied this value in place of the real computation.
    Value(Value),
}

impl SpyResult {
    pub fn is_none(&self) -> bool {
        matches!(self, SpyResult::None)
    }

    pub fn is_continue(&self) -> bool {
        matches!(self, SpyResult::Continue)
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            SpyResult::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for SpyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpyResult::None => write!(f, "<none>"),
            SpyResult::Continue => write!(f, "<continue>"),
            SpyResult::Value(v) => write!(f, "{v}"),
        }
    }
}

/// Everything a spy call hands back: the result proper, an optional value to
/// yield to a caller-supplied block, and a marker set while a record-replay
/// agent is driving the call.
#[derive(Debug, Clone, PartialEq)]
pub struct SpyOutcome {
    pub result: SpyResult,
    pub yielded: Option<Value>,
    pub record_replay: bool,
}

impl SpyOutcome {
    pub fn none() -> Self {
        Self {
            result: SpyResult::None,
            yielded: None,
            record_replay: false,
        }
    }

    pub fn value(value: Value) -> Self {
        Self {
            result: SpyResult::Value(value),
            yielded: None,
            record_replay: false,
        }
    }
}

// ── ValueProvider ─────────────────────────────────────────────────────────────

/// A literal value or a function of the observation. Computed specs must not
/// have observable side effects beyond the value they produce; that contract
/// is on the caller and is not enforced at runtime.
pub enum ValueProvider {
    Literal(Value),
    Computed(Box<dyn Fn(&Observation) -> Value + Send + Sync>),
}

impl ValueProvider {
    pub fn resolve(&self, observation: &Observation) -> Value {
        match self {
            ValueProvider::Literal(v) => v.clone(),
            ValueProvider::Computed(f) => f(observation),
        }
    }
}

impl fmt::Debug for ValueProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueProvider::Literal(v) => write!(f, "Literal({v})"),
            ValueProvider::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}
