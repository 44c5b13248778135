//! Record-replay agents and the store of previously recorded results.
//!
//! A record-replay agent wraps a call-shaped spy point that is driven twice
//! per call: once before the wrapped operation, to decide between replaying a
//! stored value and letting the real call run, and once after, to capture the
//! real result for future replay.

use crate::canonical::observation_to_string;
use crate::dialog::{DialogHandler, DialogRequest};
use crate::errors::SpyglassError;
use crate::filter::{AgentFilter, FilterOp, FilterSet};
use crate::observation::{
    Observation, SpyOutcome, SpyResult, RECORD_ARGS_KEY, REPLAY_RESULT_KEY,
};
use crate::reconcile::ReconcileMode;
use serde_json::{json, Value};
use std::collections::HashMap;

type Doer = Box<dyn Fn(&Observation) + Send + Sync>;

// ── ReplayStore ───────────────────────────────────────────────────────────────

/// Stored results keyed by canonical argument text plus a replay index. The
/// index disambiguates repeated identical-argument calls: order-independent
/// agents always use index 0, order-dependent agents advance a per-key
/// cursor.
#[derive(Debug, Default)]
pub struct ReplayStore {
    values: HashMap<(String, u64), Value>,
}

impl ReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the store from a reference observation file. Argument entries
    /// are paired with the stored result that immediately follows them; load
    /// order assigns the replay indices.
    pub fn load_reference(contents: &str, precision: u32) -> Result<Self, SpyglassError> {
        let parsed: Value = serde_json::from_str(contents)
            .map_err(|e| SpyglassError::Io(format!("reference file is not valid JSON: {e}")))?;
        let Value::Array(entries) = parsed else {
            return Err(SpyglassError::Io(
                "reference file is not a JSON array".to_string(),
            ));
        };

        let mut store = Self::new();
        let mut counts: HashMap<String, u64> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            let Value::Object(map) = entry else { continue };
            if !map.contains_key(RECORD_ARGS_KEY) {
                continue;
            }
            let args = Observation::from(map.clone()).without_reserved_keys();
            let key = observation_to_string(&args, precision);
            let index = counts.entry(key.clone()).or_insert(0);
            if let Some(Value::Object(next)) = entries.get(i + 1) {
                if next.contains_key(REPLAY_RESULT_KEY) {
                    if let Some(result) = next.get("result") {
                        store.values.insert((key.clone(), *index), result.clone());
                    }
                }
            }
            *index += 1;
        }
        Ok(store)
    }

    pub fn get(&self, key: &str, index: u64) -> Option<&Value> {
        self.values.get(&(key.to_string(), index))
    }

    pub fn insert(&mut self, key: String, index: u64, value: Value) {
        self.values.insert((key, index), value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ── ReplayContext ─────────────────────────────────────────────────────────────

/// Session-owned collaborators a record-replay agent needs while resolving a
/// call.
pub struct ReplayContext<'a> {
    pub store: &'a mut ReplayStore,
    pub dialog: &'a dyn DialogHandler,
    pub test_name: &'a str,
    pub reconcile_mode: ReconcileMode,
    pub session_record_mode: bool,
    pub precision: u32,
}

// ── RecordReplayAgent ─────────────────────────────────────────────────────────

enum ReplayState {
    Idle,
    AwaitingResult { args: Observation },
}

/// An agent in record mode lets the wrapped call run and captures its result;
/// in replay mode it substitutes the previously stored result instead. The
/// per-agent `record_mode` flag overrides the session-wide default.
pub struct RecordReplayAgent {
    filters: FilterSet,
    record_mode: Option<bool>,
    order_dependent: bool,
    doers: Vec<Doer>,
    state: ReplayState,
    seen: HashMap<String, u64>,
}

impl Default for RecordReplayAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordReplayAgent {
    pub fn new() -> Self {
        Self {
            filters: FilterSet::new(),
            record_mode: None,
            order_dependent: false,
            doers: Vec::new(),
            state: ReplayState::Idle,
            seen: HashMap::new(),
        }
    }

    pub fn record_mode(mut self, record: bool) -> Self {
        self.record_mode = Some(record);
        self
    }

    /// With `order_dependent` set, each successive call with identical
    /// arguments records and replays its own value; otherwise the same
    /// arguments always map to one stored value.
    pub fn order_dependent(mut self, order_dependent: bool) -> Self {
        self.order_dependent = order_dependent;
        self
    }

    pub fn with_filter_spec(mut self, key: &str, expected: Value) -> Result<Self, SpyglassError> {
        self.filters.push(AgentFilter::parse(key, expected)?);
        Ok(self)
    }

    pub fn filter_eq(mut self, field: impl Into<String>, expected: Value) -> Self {
        self.filters
            .push(AgentFilter::field(field, FilterOp::Eq, expected));
        self
    }

    pub fn filter_contains(mut self, field: impl Into<String>, expected: Value) -> Self {
        self.filters
            .push(AgentFilter::field(field, FilterOp::Contains, expected));
        self
    }

    pub fn with_doer(mut self, f: impl Fn(&Observation) + Send + Sync + 'static) -> Self {
        self.doers.push(Box::new(f));
        self
    }

    /// While a call is in flight the post-call observation only carries the
    /// result, so filters are evaluated against the pre-call arguments
    /// overlaid with it.
    pub(crate) fn matches(&self, observation: &Observation) -> bool {
        match &self.state {
            ReplayState::Idle => self.filters.accepts(observation),
            ReplayState::AwaitingResult { args } => {
                self.filters.accepts(&args.merged_with(observation))
            }
        }
    }

    pub(crate) fn run_doers(&self, observation: &Observation) {
        for doer in &self.doers {
            doer(observation);
        }
    }

    pub(crate) fn outcome(
        &mut self,
        point: &str,
        observation: &mut Observation,
        ctx: &mut ReplayContext<'_>,
    ) -> Result<SpyOutcome, SpyglassError> {
        match std::mem::replace(&mut self.state, ReplayState::Idle) {
            ReplayState::Idle => self.before_call(point, observation, ctx),
            ReplayState::AwaitingResult { args } => {
                self.after_call(point, observation, &args, ctx)
            }
        }
    }

    fn before_call(
        &mut self,
        point: &str,
        observation: &mut Observation,
        ctx: &mut ReplayContext<'_>,
    ) -> Result<SpyOutcome, SpyglassError> {
        observation.set(RECORD_ARGS_KEY, json!(""));
        let args = observation.without_reserved_keys();
        let key = observation_to_string(&args, ctx.precision);
        let index = if self.order_dependent {
            self.seen.get(&key).copied().unwrap_or(0)
        } else {
            0
        };

        if let Some(value) = ctx.store.get(&key, index) {
            let value = value.clone();
            *self.seen.entry(key).or_insert(0) += 1;
            return Ok(SpyOutcome {
                result: SpyResult::Value(value),
                yielded: None,
                record_replay: true,
            });
        }

        let record = self.record_mode.unwrap_or(ctx.session_record_mode);
        if !record {
            // Replay miss: resolve per the session's reconcile policy. An
            // accepted miss grants record mode for this one call only.
            match ctx.reconcile_mode {
                ReconcileMode::Abort => {
                    return Err(SpyglassError::ReplayMiss {
                        point: point.to_string(),
                        detail: format!("no stored value for arguments {key}"),
                    });
                }
                ReconcileMode::Accept => {}
                ReconcileMode::Console | ReconcileMode::Dialog | ReconcileMode::Kdiff3 => {
                    let request = DialogRequest::new(
                        format!(
                            "For test {}:\nA call through {point} has no stored value to \
                             replay. These are the arguments it was called with:",
                            ctx.test_name
                        ),
                        "Do you wish to allow this call to proceed?",
                        key.clone(),
                        &["accept", "deny"],
                    );
                    if ctx.dialog.choose(&request)? != "accept" {
                        return Err(SpyglassError::ReplayMiss {
                            point: point.to_string(),
                            detail: "the call was denied".to_string(),
                        });
                    }
                }
            }
        }

        self.state = ReplayState::AwaitingResult { args };
        Ok(SpyOutcome {
            result: SpyResult::Continue,
            yielded: None,
            record_replay: true,
        })
    }

    fn after_call(
        &mut self,
        point: &str,
        observation: &mut Observation,
        args: &Observation,
        ctx: &mut ReplayContext<'_>,
    ) -> Result<SpyOutcome, SpyglassError> {
        observation.set(REPLAY_RESULT_KEY, json!(""));
        let current = observation.get("result").cloned().unwrap_or(Value::Null);
        let accepted = confirm_result(point, args, current, ctx)?;
        observation.set("result", accepted.clone());

        let key = observation_to_string(args, ctx.precision);
        let index = if self.order_dependent {
            self.seen.get(&key).copied().unwrap_or(0)
        } else {
            0
        };
        ctx.store.insert(key.clone(), index, accepted.clone());
        *self.seen.entry(key).or_insert(0) += 1;

        Ok(SpyOutcome {
            result: SpyResult::Value(accepted),
            yielded: None,
            record_replay: true,
        })
    }
}

/// Show the freshly computed result to the human reconciler, who may accept
/// it as-is, edit it, or reject it. Rejection aborts the test.
fn confirm_result(
    point: &str,
    args: &Observation,
    current: Value,
    ctx: &ReplayContext<'_>,
) -> Result<Value, SpyglassError> {
    let (content, is_json) = match &current {
        Value::String(s) => (s.clone(), false),
        other => (
            crate::canonical::to_canonical_string(other, ctx.precision),
            true,
        ),
    };
    let args_text = observation_to_string(args, ctx.precision);
    let request = DialogRequest::new(
        format!(
            "For test {}:\nBelow is the current result{} returned by {point} when called \
             with arguments as follows:\n\n{args_text}\n",
            ctx.test_name,
            if is_json { " (JSON-serialized)" } else { "" }
        ),
        "Do you wish to save this result for future replay? You can also edit it before \
         accepting.",
        content.clone(),
        &["Accept", "Reject"],
    );
    let (option, edited) = ctx.dialog.choose_with_edits(&request)?;
    if option != "Accept" {
        return Err(SpyglassError::ReplayMiss {
            point: point.to_string(),
            detail: "the recorded value was not accepted".to_string(),
        });
    }
    if edited == content {
        Ok(current)
    } else if is_json {
        serde_json::from_str(&edited)
            .map_err(|e| SpyglassError::Reconcile(format!("edited replay value is not valid JSON: {e}")))
    } else {
        Ok(Value::String(edited))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::ScriptedDialog;
    use serde_json::json;

    fn context<'a>(
        store: &'a mut ReplayStore,
        dialog: &'a ScriptedDialog,
        mode: ReconcileMode,
        record: bool,
    ) -> ReplayContext<'a> {
        ReplayContext {
            store,
            dialog,
            test_name: "suite.case",
            reconcile_mode: mode,
            session_record_mode: record,
            precision: 4,
        }
    }

    fn args_obs() -> Observation {
        Observation::new().with("arr", json!([1]))
    }

    #[test]
    fn record_then_replay_round_trip() {
        let mut store = ReplayStore::new();
        let dialog = ScriptedDialog::new();
        dialog.push_response("Accept", None);

        let mut agent = RecordReplayAgent::new().record_mode(true);
        let mut pre = args_obs();
        {
            let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
            let outcome = agent.outcome("p", &mut pre, &mut ctx).expect("pre");
            assert!(outcome.result.is_continue());
            assert!(outcome.record_replay);
        }
        assert!(pre.contains_key(RECORD_ARGS_KEY));

        let mut post = Observation::new().with("result", json!("R"));
        {
            let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
            let outcome = agent.outcome("p", &mut post, &mut ctx).expect("post");
            assert_eq!(outcome.result, SpyResult::Value(json!("R")));
        }
        assert!(post.contains_key(REPLAY_RESULT_KEY));

        // Same arguments replay the stored value without a dialog round trip.
        let mut again = args_obs();
        let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
        let outcome = agent.outcome("p", &mut again, &mut ctx).expect("replay");
        assert_eq!(outcome.result, SpyResult::Value(json!("R")));
    }

    #[test]
    fn replay_miss_aborts_under_abort_policy() {
        let mut store = ReplayStore::new();
        let dialog = ScriptedDialog::new();
        let mut agent = RecordReplayAgent::new();
        let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
        let err = agent.outcome("p", &mut args_obs(), &mut ctx);
        assert!(matches!(err, Err(SpyglassError::ReplayMiss { .. })));
    }

    #[test]
    fn replay_miss_with_dialog_accept_records_this_call_only() {
        let mut store = ReplayStore::new();
        let dialog = ScriptedDialog::new();
        dialog.push_response("accept", None);
        dialog.push_response("Accept", None);

        let mut agent = RecordReplayAgent::new();
        let mut pre = args_obs();
        {
            let mut ctx = context(&mut store, &dialog, ReconcileMode::Dialog, false);
            let outcome = agent.outcome("p", &mut pre, &mut ctx).expect("pre");
            assert!(outcome.result.is_continue());
        }
        let mut post = Observation::new().with("result", json!(7));
        let mut ctx = context(&mut store, &dialog, ReconcileMode::Dialog, false);
        let outcome = agent.outcome("p", &mut post, &mut ctx).expect("post");
        assert_eq!(outcome.result, SpyResult::Value(json!(7)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replay_miss_with_dialog_deny_is_fatal() {
        let mut store = ReplayStore::new();
        let dialog = ScriptedDialog::new();
        dialog.push_response("deny", None);
        let mut agent = RecordReplayAgent::new();
        let mut ctx = context(&mut store, &dialog, ReconcileMode::Console, false);
        let err = agent.outcome("p", &mut args_obs(), &mut ctx);
        assert!(matches!(err, Err(SpyglassError::ReplayMiss { .. })));
    }

    #[test]
    fn rejected_recording_is_fatal() {
        let mut store = ReplayStore::new();
        let dialog = ScriptedDialog::new();
        dialog.push_response("Reject", None);
        let mut agent = RecordReplayAgent::new().record_mode(true);
        {
            let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
            agent.outcome("p", &mut args_obs(), &mut ctx).expect("pre");
        }
        let mut post = Observation::new().with("result", json!("R"));
        let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
        let err = agent.outcome("p", &mut post, &mut ctx);
        assert!(matches!(err, Err(SpyglassError::ReplayMiss { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn edited_json_result_is_parsed_back() {
        let mut store = ReplayStore::new();
        let dialog = ScriptedDialog::new();
        dialog.push_response("Accept", Some("[\n    \"foobar\",\n    \"modified\"\n]"));
        let mut agent = RecordReplayAgent::new().record_mode(true);
        {
            let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
            agent.outcome("p", &mut args_obs(), &mut ctx).expect("pre");
        }
        let mut post = Observation::new().with("result", json!(["foobar", "original"]));
        let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
        let outcome = agent.outcome("p", &mut post, &mut ctx).expect("post");
        assert_eq!(outcome.result, SpyResult::Value(json!(["foobar", "modified"])));
    }

    #[test]
    fn order_independent_agents_record_once_and_replay_every_time() {
        let mut store = ReplayStore::new();
        let dialog = ScriptedDialog::new();
        dialog.push_response("Accept", None);

        let mut agent = RecordReplayAgent::new().record_mode(true);
        {
            let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
            agent.outcome("p", &mut args_obs(), &mut ctx).expect("pre");
        }
        {
            let mut post = Observation::new().with("result", json!("first"));
            let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
            agent.outcome("p", &mut post, &mut ctx).expect("post");
        }
        // Second call with the same arguments replays instead of re-recording.
        let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
        let outcome = agent.outcome("p", &mut args_obs(), &mut ctx).expect("replay");
        assert_eq!(outcome.result, SpyResult::Value(json!("first")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn order_dependent_agents_record_and_replay_in_call_order() {
        let mut store = ReplayStore::new();
        let dialog = ScriptedDialog::new();
        dialog.push_response("Accept", Some("bar1"));
        dialog.push_response("Accept", Some("bar2"));

        let mut agent = RecordReplayAgent::new().record_mode(true).order_dependent(true);
        for expected in ["bar1", "bar2"] {
            {
                let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
                let outcome = agent.outcome("p", &mut args_obs(), &mut ctx).expect("pre");
                assert!(outcome.result.is_continue());
            }
            let mut post = Observation::new().with("result", json!("raw"));
            let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
            let outcome = agent.outcome("p", &mut post, &mut ctx).expect("post");
            assert_eq!(outcome.result, SpyResult::Value(json!(expected)));
        }
        assert_eq!(store.len(), 2);

        // A fresh agent over the same store replays the two values in order.
        let mut replayer = RecordReplayAgent::new().order_dependent(true);
        for expected in ["bar1", "bar2"] {
            let mut ctx = context(&mut store, &dialog, ReconcileMode::Abort, false);
            let outcome = replayer
                .outcome("p", &mut args_obs(), &mut ctx)
                .expect("replay");
            assert_eq!(outcome.result, SpyResult::Value(json!(expected)));
        }
    }

    #[test]
    fn store_loads_paired_entries_from_a_reference_file() {
        let contents = r#"[
    {
        "__record_args__": "",
        "__spy_point__": "p",
        "arr": [1]
    },
    {
        "__replay_result__": "",
        "__spy_point__": "p",
        "result": "R"
    },
    {
        "__spy_point__": "other",
        "x": 1
    }
]"#;
        let store = ReplayStore::load_reference(contents, 4).expect("load");
        assert_eq!(store.len(), 1);
        let key = observation_to_string(&Observation::new().with("arr", json!([1])), 4);
        assert_eq!(store.get(&key, 0), Some(&json!("R")));
    }

    #[test]
    fn store_assigns_indices_in_load_order_for_repeated_arguments() {
        let contents = r#"[
    {"__record_args__": "", "arr": [1]},
    {"__replay_result__": "", "result": "bar1"},
    {"__record_args__": "", "arr": [1]},
    {"__replay_result__": "", "result": "bar2"}
]"#;
        let store = ReplayStore::load_reference(contents, 4).expect("load");
        let key = observation_to_string(&Observation::new().with("arr", json!([1])), 4);
        assert_eq!(store.get(&key, 0), Some(&json!("bar1")));
        assert_eq!(store.get(&key, 1), Some(&json!("bar2")));
    }
}
