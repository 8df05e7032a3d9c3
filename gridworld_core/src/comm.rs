//! One-tick-delayed observation sharing between nearby agents.

use tracing::trace;

use crate::{
    Position,
    entity::ObjectKind,
    environment::AgentState,
    observation::{Observation, UNSEEN},
};

/// What each agent saw last tick and where it stood when it saw it.
#[derive(Debug, Clone, Default)]
pub struct CommBuffer {
    previous: Vec<Observation>,
    positions: Vec<Position>,
}

impl CommBuffer {
    pub fn clear(&mut self) {
        self.previous.clear();
        self.positions.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    /// Keeps this tick's private observations and agent positions for the
    /// next tick.
    pub fn store(&mut self, observations: &[Observation], agents: &[AgentState]) {
        self.previous = observations.to_vec();
        self.positions = agents.iter().map(|agent| agent.position).collect();
    }

    /// Builds shared observations from fresh private ones.
    ///
    /// Receiver `r` takes from every signalling sender `s` that stood within
    /// `radius` of it at the start of the tick: each cell `r` cannot see now
    /// but `s` saw last tick, agent markers excepted.
    pub fn share(&self, fresh: &[Observation], signals: &[bool], radius: f64) -> Vec<Observation> {
        let mut shared = fresh.to_vec();
        if self.previous.len() != fresh.len() || self.positions.len() != fresh.len() {
            return shared;
        }

        for (receiver, observation) in shared.iter_mut().enumerate() {
            for (sender, _) in signals.iter().enumerate().filter(|(_, signal)| **signal) {
                if sender == receiver {
                    continue;
                }
                let distance = self.positions[receiver].distance(self.positions[sender]);
                if distance >= radius {
                    continue;
                }
                let source = &self.previous[sender];
                if source.cells.len() != observation.cells.len() {
                    continue;
                }
                let mut copied = 0usize;
                for (index, cell) in observation.cells.iter_mut().enumerate() {
                    let theirs = source.cells[index];
                    let useful = theirs[0] != ObjectKind::Unseen.index()
                        && theirs[0] != ObjectKind::Agent.index();
                    if fresh[receiver].cells[index] == UNSEEN && useful {
                        *cell = theirs;
                        copied += 1;
                    }
                }
                trace!(receiver, sender, copied, "shared observation cells");
            }
        }

        shared
    }
}
