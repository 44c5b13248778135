//! Filter predicates used to decide whether a deployed agent applies to an
//! observation.

use crate::errors::SpyglassError;
use crate::observation::Observation;
use serde_json::Value;
use std::fmt;

// ── FilterOp ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    StartsWith,
    EndsWith,
    Contains,
}

impl FilterOp {
    fn parse(op: &str) -> Result<Self, SpyglassError> {
        match op {
            "eq" | "exact" => Ok(Self::Eq),
            "startswith" => Ok(Self::StartsWith),
            "endswith" => Ok(Self::EndsWith),
            "contains" => Ok(Self::Contains),
            other => Err(SpyglassError::InvalidConfig(format!(
                "unknown filter operator: {other}"
            ))),
        }
    }
}

// ── AgentFilter ───────────────────────────────────────────────────────────────

/// A single filter: either a (field, operator, expected) triple or a free-form
/// predicate over the whole observation.
pub enum AgentFilter {
    Field {
        name: String,
        op: FilterOp,
        expected: Value,
    },
    Predicate(Box<dyn Fn(&Observation) -> bool + Send + Sync>),
}

impl AgentFilter {
    /// Parse the `field` / `field__operator` key syntax. A bare field name
    /// means equality.
    pub fn parse(key: &str, expected: Value) -> Result<Self, SpyglassError> {
        let parts: Vec<&str> = key.split("__").collect();
        match parts.as_slice() {
            [field] if !field.is_empty() => Ok(Self::Field {
                name: (*field).to_string(),
                op: FilterOp::Eq,
                expected,
            }),
            [field, op] if !field.is_empty() => Ok(Self::Field {
                name: (*field).to_string(),
                op: FilterOp::parse(op)?,
                expected,
            }),
            _ => Err(SpyglassError::InvalidConfig(format!(
                "invalid filter key: {key}"
            ))),
        }
    }

    pub fn field(name: impl Into<String>, op: FilterOp, expected: Value) -> Self {
        Self::Field {
            name: name.into(),
            op,
            expected,
        }
    }

    pub fn predicate(f: impl Fn(&Observation) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Box::new(f))
    }

    /// A missing field always rejects; substring operators compare against
    /// the field value's string form.
    pub fn accepts(&self, observation: &Observation) -> bool {
        match self {
            Self::Predicate(f) => f(observation),
            Self::Field { name, op, expected } => {
                let Some(actual) = observation.get(name) else {
                    return false;
                };
                match op {
                    FilterOp::Eq => actual == expected,
                    FilterOp::StartsWith => value_text(actual).starts_with(&value_text(expected)),
                    FilterOp::EndsWith => value_text(actual).ends_with(&value_text(expected)),
                    FilterOp::Contains => value_text(actual).contains(&value_text(expected)),
                }
            }
        }
    }
}

impl fmt::Debug for AgentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { name, op, expected } => {
                write!(f, "Field({name} {op:?} {expected})")
            }
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// String values compare their content; everything else compares its JSON
/// rendering.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── FilterSet ─────────────────────────────────────────────────────────────────

/// AND-composed filters; the empty set always matches.
#[derive(Debug, Default)]
pub struct FilterSet {
    filters: Vec<AgentFilter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    pub fn push(&mut self, filter: AgentFilter) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn accepts(&self, observation: &Observation) -> bool {
        self.filters.iter().all(|f| f.accepts(observation))
    }
}
