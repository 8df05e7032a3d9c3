use std::collections::VecDeque;

use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};

use crate::{environment::Action, observation::Observation};

/// Trait defining the behavior of an agent.
/// Policies pick an action from the agent's own observation only.
pub trait Policy {
    /// Determines the action the agent wants to perform this tick.
    /// `&mut self` allows the policy to keep internal state between ticks.
    fn act(&mut self, observation: &Observation) -> Action;

    /// Whether the agent shares its view this tick.
    fn signal(&mut self, _observation: &Observation) -> bool {
        false
    }
}

/// Picks uniformly among all actions.
#[derive(Debug)]
pub struct RandomPolicy {
    rng: StdRng,
    signal_chance: f64,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            signal_chance: 0.0,
        }
    }

    /// Signals on roughly `chance` of the ticks.
    pub fn with_signal_chance(mut self, chance: f64) -> Self {
        self.signal_chance = chance.clamp(0.0, 1.0);
        self
    }
}

impl Policy for RandomPolicy {
    fn act(&mut self, _observation: &Observation) -> Action {
        *Action::ALL.choose(&mut self.rng).unwrap_or(&Action::Done)
    }

    fn signal(&mut self, _observation: &Observation) -> bool {
        self.rng.random_bool(self.signal_chance)
    }
}

/// Replays a fixed action list, then reports `Done` forever.
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    plan: VecDeque<Action>,
}

impl Scripted {
    pub fn new(plan: impl IntoIterator<Item = Action>) -> Self {
        Self {
            plan: plan.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.plan.len()
    }
}

impl Policy for Scripted {
    fn act(&mut self, _observation: &Observation) -> Action {
        self.plan.pop_front().unwrap_or(Action::Done)
    }
}
