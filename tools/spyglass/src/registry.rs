//! Per-spy-point agent stacks, most recently deployed first.

use crate::agent::MockAgent;
use crate::observation::Observation;
use crate::record_replay::RecordReplayAgent;
use std::collections::HashMap;

pub enum AgentSlot {
    Mock(MockAgent),
    RecordReplay(RecordReplayAgent),
}

impl AgentSlot {
    pub(crate) fn matches(&self, observation: &Observation) -> bool {
        match self {
            AgentSlot::Mock(agent) => agent.matches(observation),
            AgentSlot::RecordReplay(agent) => agent.matches(observation),
        }
    }

    pub(crate) fn run_doers(&self, observation: &Observation) {
        match self {
            AgentSlot::Mock(agent) => agent.run_doers(observation),
            AgentSlot::RecordReplay(agent) => agent.run_doers(observation),
        }
    }
}

/// Dispatch picks the first agent in a point's stack whose filters pass, so
/// later deployments shadow earlier ones exactly where their filters overlap.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Vec<AgentSlot>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deploy(&mut self, point: &str, slot: AgentSlot) {
        self.stack_mut(point).insert(0, slot);
    }

    pub fn find_match_mut(
        &mut self,
        point: &str,
        observation: &Observation,
    ) -> Option<&mut AgentSlot> {
        self.agents
            .get_mut(point)?
            .iter_mut()
            .find(|slot| slot.matches(observation))
    }

    pub fn deployed_count(&self, point: &str) -> usize {
        self.agents.get(point).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.agents.clear();
    }

    fn stack_mut(&mut self, point: &str) -> &mut Vec<AgentSlot> {
        self.agents.entry(point.to_string()).or_default()
    }
}
