//! Explicit instrumentation: a higher-order wrapper that callers place
//! around a target function instead of relying on reflection machinery.
//!
//! The adapter spies the call's arguments, short-circuits when an agent
//! supplies a value, runs the real closure otherwise, and drives the
//! record-replay post-call phase when a record-replay agent let the call
//! proceed.

use crate::errors::SpyglassError;
use crate::observation::Observation;
use crate::session::{Session, SpyOptions};
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct PointOptions {
    /// Fail the call unless an agent supplied a result (or *continue*).
    pub require_agent_result: bool,
    /// Do not record this call's observation (an agent's skip-save flag can
    /// still override).
    pub mock_only: bool,
    /// Also spy the final return value, under `<point>.result`.
    pub spy_result: bool,
    /// Instance key previously passed to `Session::register_instance`.
    pub instance: Option<String>,
}

pub fn spied_call<F>(
    session: &mut Session,
    point: &str,
    args: Observation,
    f: F,
) -> Result<Value, SpyglassError>
where
    F: FnOnce() -> Value,
{
    spied_call_with_options(session, point, args, &PointOptions::default(), f)
}

pub fn spied_call_with_options<F>(
    session: &mut Session,
    point: &str,
    args: Observation,
    options: &PointOptions,
    f: F,
) -> Result<Value, SpyglassError>
where
    F: FnOnce() -> Value,
{
    let pre = session.spy_with_options(
        Some(point),
        args,
        &SpyOptions {
            mock_only: options.mock_only,
            instance: options.instance.clone(),
        },
    )?;

    if options.require_agent_result && pre.result.is_none() {
        return Err(SpyglassError::MockingRequired {
            point: point.to_string(),
        });
    }

    let value = match pre.result.value() {
        // An agent (or a replay hit) short-circuited; the real call is skipped.
        Some(v) => v.clone(),
        None => {
            let real = f();
            if pre.record_replay {
                // The record-replay agent is awaiting the real result; the
                // accepted (possibly edited) value is the one that counts.
                let post = session.spy(
                    Some(point),
                    Observation::new().with("result", real.clone()),
                )?;
                post.result.value().cloned().unwrap_or(real)
            } else {
                real
            }
        }
    };

    if options.spy_result {
        let result_point = format!("{point}.result");
        session.spy(
            Some(result_point.as_str()),
            Observation::new().with("result", value.clone()),
        )?;
    }
    Ok(value)
}
