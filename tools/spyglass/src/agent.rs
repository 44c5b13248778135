//! Mock agents: deployed rules that conditionally intercept a spy point's
//! outcome.

use crate::errors::SpyglassError;
use crate::filter::{AgentFilter, FilterOp, FilterSet};
use crate::observation::{Observation, SpyOutcome, SpyResult, ValueProvider};
use serde_json::Value;

type Doer = Box<dyn Fn(&Observation) + Send + Sync>;
type Formatter = Box<dyn Fn(&mut Observation) + Send + Sync>;

/// An agent with AND-composed filters and an action specification. The action
/// precedence is fixed: an exception spec wins over a yield spec, which wins
/// over a result spec; with none of them set the agent yields the *none*
/// sentinel (useful for pure side-effect or formatting agents).
#[derive(Default)]
pub struct MockAgent {
    filters: FilterSet,
    result_spec: Option<ValueProvider>,
    result_continue: bool,
    exception_spec: Option<ValueProvider>,
    yield_spec: Option<ValueProvider>,
    doers: Vec<Doer>,
    formatter: Option<Formatter>,
    skip_save: Option<bool>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    // ── filters ──────────────────────────────────────────────────────────

    /// Parse the `field` / `field__operator` key syntax; rejects unknown
    /// operators at deploy time.
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

    pub fn filter_startswith(mut self, field: impl Into<String>, expected: Value) -> Self {
        self.filters
            .push(AgentFilter::field(field, FilterOp::StartsWith, expected));
        self
    }

    pub fn filter_endswith(mut self, field: impl Into<String>, expected: Value) -> Self {
        self.filters
            .push(AgentFilter::field(field, FilterOp::EndsWith, expected));
        self
    }

    pub fn with_predicate(
        mut self,
        f: impl Fn(&Observation) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filters.push(AgentFilter::predicate(f));
        self
    }

    // ── actions ──────────────────────────────────────────────────────────

    pub fn with_result(mut self, value: Value) -> Self {
        self.result_spec = Some(ValueProvider::Literal(value));
        self
    }

    pub fn with_result_computed(
        mut self,
        f: impl Fn(&Observation) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.result_spec = Some(ValueProvider::Computed(Box::new(f)));
        self
    }

    /// Explicitly decline to short-circuit: the spy call reports the
    /// *continue* sentinel and the underlying computation must run.
    pub fn with_result_continue(mut self) -> Self {
        self.result_continue = true;
        self
    }

    pub fn with_exception(mut self, payload: Value) -> Self {
        self.exception_spec = Some(ValueProvider::Literal(payload));
        self
    }

    pub fn with_exception_computed(
        mut self,
        f: impl Fn(&Observation) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.exception_spec = Some(ValueProvider::Computed(Box::new(f)));
        self
    }

    pub fn with_yield_value(mut self, value: Value) -> Self {
        self.yield_spec = Some(ValueProvider::Literal(value));
        self
    }

    pub fn with_yield_computed(
        mut self,
        f: impl Fn(&Observation) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.yield_spec = Some(ValueProvider::Computed(Box::new(f)));
        self
    }

    /// Side-effect callables, run in declaration order before the action spec
    /// is evaluated.
    pub fn with_doer(mut self, f: impl Fn(&Observation) + Send + Sync + 'static) -> Self {
        self.doers.push(Box::new(f));
        self
    }

    /// Rewrites the observation just before it is logged. The formatted form
    /// is what gets saved; matching and actions see the unformatted one.
    pub fn with_formatter(
        mut self,
        f: impl Fn(&mut Observation) + Send + Sync + 'static,
    ) -> Self {
        self.formatter = Some(Box::new(f));
        self
    }

    /// Suppress (or force) logging for calls this agent handles, overriding
    /// the call site's own flag.
    pub fn skip_save_observation(mut self, skip: bool) -> Self {
        self.skip_save = Some(skip);
        self
    }

    // ── dispatch ─────────────────────────────────────────────────────────

    pub(crate) fn matches(&self, observation: &Observation) -> bool {
        self.filters.accepts(observation)
    }

    pub(crate) fn run_doers(&self, observation: &Observation) {
        for doer in &self.doers {
            doer(observation);
        }
    }

    pub(crate) fn outcome(
        &self,
        point: &str,
        observation: &Observation,
    ) -> Result<SpyOutcome, SpyglassError> {
        if let Some(spec) = &self.exception_spec {
            return Err(SpyglassError::AgentException {
                point: point.to_string(),
                payload: spec.resolve(observation),
            });
        }
        if let Some(spec) = &self.yield_spec {
            return Ok(SpyOutcome {
                result: SpyResult::None,
                yielded: Some(spec.resolve(observation)),
                record_replay: false,
            });
        }
        if self.result_continue {
            return Ok(SpyOutcome {
                result: SpyResult::Continue,
                yielded: None,
                record_replay: false,
            });
        }
        match &self.result_spec {
            Some(spec) => Ok(SpyOutcome::value(spec.resolve(observation))),
            None => Ok(SpyOutcome::none()),
        }
    }

    pub(crate) fn format(&self, observation: &mut Observation) {
        if let Some(formatter) = &self.formatter {
            formatter(observation);
        }
    }

    pub(crate) fn skip_save(&self) -> Option<bool> {
        self.skip_save
    }
}
