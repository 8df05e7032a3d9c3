use std::fmt;

use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    AgentId, Color, Direction, EntityId, Position,
    comm::CommBuffer,
    config::{ConfigError, EnvConfig},
    entity::{Entity, EntityKind, Location},
    generate::{GenerateError, Generator, Layout},
    map::WorldGrid,
    observation::{Observation, Observer},
    resolve::{Event, resolve_tick},
};

/// Actions an agent can take in one tick. The discriminants are the wire
/// action indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Action {
    Left = 0,
    Right = 1,
    Forward = 2,
    Pickup = 3,
    Drop = 4,
    Toggle = 5,
    Done = 6,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Action::Left,
        Action::Right,
        Action::Forward,
        Action::Pickup,
        Action::Drop,
        Action::Toggle,
        Action::Done,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("unknown action index {0}")]
    InvalidIndex(u8),
}

impl TryFrom<u8> for Action {
    type Error = ActionError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or(ActionError::InvalidIndex(index))
    }
}

/// Holds the state of an agent within the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: AgentId,
    pub position: Position,
    pub direction: Direction,
    pub carrying: Option<Entity>,
}

impl AgentState {
    pub fn color(&self) -> Color {
        Color::for_agent(self.id)
    }
}

/// What ends an episode successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Objective {
    /// The first agent to step onto any goal ends the episode for everyone.
    ReachGoal,
    /// The entity starting at `target` must be picked up, by a specific
    /// agent when `by` is set.
    Retrieve {
        target: Position,
        by: Option<AgentId>,
    },
    /// Agent `i` must stand on `goals[i]`; all at the same time.
    ReachOwnGoals { goals: Vec<Position> },
}

/// Objective with layout positions resolved to live entities.
#[derive(Debug, Clone, PartialEq)]
enum Task {
    ReachGoal,
    Retrieve {
        entity: EntityId,
        by: Option<AgentId>,
    },
    ReachOwnGoals {
        goals: Vec<Position>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reward {
    Shared(f32),
    PerAgent(Vec<f32>),
}

impl Reward {
    pub fn for_agent(&self, agent: AgentId) -> f32 {
        match self {
            Reward::Shared(value) => *value,
            Reward::PerAgent(values) => values.get(agent).copied().unwrap_or(0.0),
        }
    }

    pub fn total(&self) -> f32 {
        match self {
            Reward::Shared(value) => *value,
            Reward::PerAgent(values) => values.iter().sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Objective,
    Lava,
    MaxSteps,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Per agent, whether its action took effect this tick.
    pub applied: Vec<bool>,
    pub step_count: u32,
    pub termination: Option<Termination>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub observations: Vec<Observation>,
    pub reward: Reward,
    pub done: bool,
    pub info: StepInfo,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("the environment has not been reset yet")]
    NotReset,
    #[error("episode is over; reset before stepping again")]
    EpisodeOver,
    #[error("expected {expected} entries, one per agent, got {actual}")]
    ActionCountMismatch { expected: usize, actual: usize },
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
}

/// Manages the simulation environment.
pub struct Environment {
    config: EnvConfig,
    generator: Box<dyn Generator>,
    rng: StdRng,
    grid: WorldGrid,
    agents: Vec<AgentState>,
    mission: String,
    task: Task,
    step_count: u32,
    started: bool,
    done: bool,
    comm: CommBuffer,
}

fn assign_ids(entity: &mut Entity, next: &mut EntityId) {
    entity.id = *next;
    *next += 1;
    if let EntityKind::Box(Some(inner)) = &mut entity.kind {
        inner.location = Location::Unplaced;
        assign_ids(inner, next);
    }
}

fn invalid(msg: String) -> Result<(), EnvError> {
    Err(EnvError::InvalidLayout(msg))
}

fn check_layout(layout: &Layout) -> Result<(), EnvError> {
    if layout.agents.is_empty() {
        return invalid("no agents".to_string());
    }
    for (agent, (pos, _)) in layout.agents.iter().enumerate() {
        let Some(cell) = layout.grid.get(pos.x, pos.y) else {
            return invalid(format!("agent {agent} starts out of bounds at {pos:?}"));
        };
        if cell.as_ref().is_some_and(|e| !e.can_overlap()) {
            return invalid(format!("agent {agent} starts inside an obstacle at {pos:?}"));
        }
        if layout.agents[..agent].iter().any(|(other, _)| other == pos) {
            return invalid(format!("agents share the start cell {pos:?}"));
        }
    }
    match &layout.objective {
        Objective::ReachOwnGoals { goals } if goals.len() != layout.agents.len() => {
            invalid(format!(
                "{} goals for {} agents",
                goals.len(),
                layout.agents.len()
            ))
        }
        Objective::Retrieve { target, .. }
            if !layout
                .grid
                .get(target.x, target.y)
                .is_some_and(|cell| cell.as_ref().is_some_and(Entity::is_liftable)) =>
        {
            invalid(format!("nothing to retrieve at {target:?}"))
        }
        _ => Ok(()),
    }
}

impl Environment {
    /// Creates an environment. No episode exists until [`Environment::reset`].
    pub fn new(config: EnvConfig, generator: Box<dyn Generator>) -> Result<Self, EnvError> {
        config.validate()?;
        Ok(Environment {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            generator,
            grid: WorldGrid::empty(0, 0),
            agents: Vec::new(),
            mission: String::new(),
            task: Task::ReachGoal,
            step_count: 0,
            started: false,
            done: true,
            comm: CommBuffer::default(),
        })
    }

    /// Restarts the layout sequence from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.config.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Starts a new episode and returns each agent's first observation.
    pub fn reset(&mut self) -> Result<Vec<Observation>, EnvError> {
        let mut layout = self.generator.generate(&mut self.rng, &self.config)?;
        check_layout(&layout)?;

        let mut next_id = 0;
        for y in 0..layout.grid.height() {
            for x in 0..layout.grid.width() {
                if let Some(entity) = layout.grid[(x, y)].as_mut() {
                    assign_ids(entity, &mut next_id);
                }
            }
        }

        self.task = match layout.objective {
            Objective::ReachGoal => Task::ReachGoal,
            Objective::Retrieve { target, by } => Task::Retrieve {
                entity: layout.grid[target].as_ref().map_or(0, |e| e.id),
                by,
            },
            Objective::ReachOwnGoals { goals } => Task::ReachOwnGoals { goals },
        };
        self.agents = layout
            .agents
            .iter()
            .enumerate()
            .map(|(id, &(position, direction))| AgentState {
                id,
                position,
                direction,
                carrying: None,
            })
            .collect();
        self.grid = layout.grid;
        self.mission = layout.mission;
        self.step_count = 0;
        self.started = true;
        self.done = false;
        self.comm.clear();

        info!(
            agents = self.agents.len(),
            width = self.grid.width(),
            height = self.grid.height(),
            mission = %self.mission,
            "episode reset"
        );

        let observations = self.observe();
        if self.config.communication {
            self.comm.store(&observations, &self.agents);
        }
        Ok(observations)
    }

    /// Advances one tick with one action per agent.
    pub fn step(&mut self, actions: &[Action]) -> Result<StepOutcome, EnvError> {
        self.step_with_signals(actions, &[])
    }

    /// Advances one tick; `signals[i]` is agent `i`'s communicate flag. An
    /// empty slice means nobody signals.
    pub fn step_with_signals(
        &mut self,
        actions: &[Action],
        signals: &[bool],
    ) -> Result<StepOutcome, EnvError> {
        if !self.started {
            return Err(EnvError::NotReset);
        }
        if self.done {
            return Err(EnvError::EpisodeOver);
        }
        let expected = self.agents.len();
        if actions.len() != expected {
            return Err(EnvError::ActionCountMismatch {
                expected,
                actual: actions.len(),
            });
        }
        if !signals.is_empty() && signals.len() != expected {
            return Err(EnvError::ActionCountMismatch {
                expected,
                actual: signals.len(),
            });
        }

        self.step_count += 1;
        let resolution = resolve_tick(&mut self.grid, &mut self.agents, actions);
        let (reward, mut termination) = self.evaluate(&resolution.events);
        if termination.is_none() && self.step_count >= self.config.max_steps {
            termination = Some(Termination::MaxSteps);
        }
        self.done = termination.is_some();

        if let Some(reason) = termination {
            info!(
                steps = self.step_count,
                ?reason,
                reward = reward.total(),
                "episode finished"
            );
        } else {
            debug!(steps = self.step_count, "tick complete");
        }

        let fresh = self.observe();
        let observations = if self.config.communication {
            let shared = self.comm.share(&fresh, signals, self.config.comm_radius);
            self.comm.store(&fresh, &self.agents);
            shared
        } else {
            fresh
        };

        Ok(StepOutcome {
            observations,
            reward,
            done: self.done,
            info: StepInfo {
                applied: resolution.applied,
                step_count: self.step_count,
                termination,
                events: resolution.events,
            },
        })
    }

    /// Success reward, decaying with the number of ticks taken.
    fn success_reward(&self) -> f32 {
        1.0 - 0.9 * (self.step_count as f32 / self.config.max_steps as f32)
    }

    fn evaluate(&self, events: &[Event]) -> (Reward, Option<Termination>) {
        let entered = |check: fn(&Entity) -> bool| {
            events.iter().any(|event| match event {
                Event::Moved { to, .. } => self.grid[*to].as_ref().is_some_and(check),
                _ => false,
            })
        };
        let lava = entered(Entity::is_lava);

        match &self.task {
            Task::ReachGoal => {
                if entered(Entity::is_goal) {
                    (
                        Reward::Shared(self.success_reward()),
                        Some(Termination::Objective),
                    )
                } else {
                    (Reward::Shared(0.0), lava.then_some(Termination::Lava))
                }
            }
            Task::Retrieve { entity, by } => {
                let retrieved = events.iter().any(|event| {
                    matches!(event, Event::PickedUp { agent, entity: picked }
                        if picked == entity && by.is_none_or(|by| by == *agent))
                });
                if retrieved {
                    (
                        Reward::Shared(self.success_reward()),
                        Some(Termination::Objective),
                    )
                } else {
                    (Reward::Shared(0.0), lava.then_some(Termination::Lava))
                }
            }
            Task::ReachOwnGoals { goals } => {
                let rewards: Vec<f32> = self
                    .agents
                    .iter()
                    .zip(goals)
                    .map(|(agent, goal)| if agent.position == *goal { 1.0 } else { 0.0 })
                    .collect();
                if rewards.iter().all(|r| *r > 0.0) {
                    (Reward::PerAgent(rewards), Some(Termination::Objective))
                } else if lava {
                    (Reward::PerAgent(vec![0.0; rewards.len()]), Some(Termination::Lava))
                } else {
                    (Reward::PerAgent(rewards), None)
                }
            }
        }
    }

    fn observer(&self) -> Observer<'_> {
        Observer {
            world: &self.grid,
            agents: &self.agents,
            view_size: self.config.agent_view_size,
            see_through_walls: self.config.see_through_walls,
            mission: &self.mission,
        }
    }

    /// Private observations of every agent, without sharing.
    pub fn observe(&self) -> Vec<Observation> {
        self.observer().all(self.config.communication)
    }

    /// Short digest of the grid and agent poses, for state-equality checks.
    pub fn state_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.grid.width() as u64).to_le_bytes());
        hasher.update(&(self.grid.height() as u64).to_le_bytes());
        for cell in self.observer().god_view() {
            hasher.update(&cell);
        }
        for agent in &self.agents {
            hasher.update(&(agent.position.x as u64).to_le_bytes());
            hasher.update(&(agent.position.y as u64).to_le_bytes());
            hasher.update(&[agent.direction.index()]);
        }
        hasher.finalize().to_hex().as_str()[..16].to_string()
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn grid(&self) -> &WorldGrid {
        &self.grid
    }

    pub fn agents(&self) -> &[AgentState] {
        &self.agents
    }

    pub fn mission(&self) -> &str {
        &self.mission
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in 0..self.grid.height() {
            if y > 0 {
                writeln!(f)?;
            }
            for x in 0..self.grid.width() {
                let here = Position::new(x, y);
                if let Some(agent) = self.agents.iter().find(|a| a.position == here) {
                    let arrow = match agent.direction {
                        Direction::Right => ">>",
                        Direction::Down => "VV",
                        Direction::Left => "<<",
                        Direction::Up => "^^",
                    };
                    f.write_str(arrow)?;
                    continue;
                }
                match &self.grid[here] {
                    Some(entity) => f.write_str(&entity.glyph())?,
                    None => f.write_str("  ")?,
                }
            }
        }
        Ok(())
    }
}
