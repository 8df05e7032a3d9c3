//! Simultaneous action resolution.
//!
//! Every agent's intent is judged against the same pre-tick snapshot. Only
//! after all verdicts are in is the world mutated, so the order in which
//! agents are listed never changes what happens.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::{
    AgentId, EntityId, Position,
    entity::{Location, ToggleKind, ToggleOutcome},
    environment::{Action, AgentState},
    map::WorldGrid,
};

/// Something that changed while committing a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Moved { agent: AgentId, to: Position },
    PickedUp { agent: AgentId, entity: EntityId },
    Dropped { agent: AgentId, at: Position },
    Toggled { agent: AgentId, at: Position },
}

/// Outcome of one tick of resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Per agent, whether its action took effect.
    pub applied: Vec<bool>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Unvisited,
    InProgress,
    Done(bool),
}

type ClaimMap = HashMap<Position, Vec<AgentId>>;

fn claimants(map: &ClaimMap, pos: Position) -> &[AgentId] {
    map.get(&pos).map_or(&[], Vec::as_slice)
}

/// Who wants what, built once from the snapshot.
#[derive(Debug, Default)]
struct Claims {
    occupants: HashMap<Position, AgentId>,
    /// Cell each agent ends the tick in if its action succeeds.
    destinations: ClaimMap,
    drops: ClaimMap,
    pickups: ClaimMap,
    opens: ClaimMap,
    closes: ClaimMap,
}

impl Claims {
    fn interactions(&self, pos: Position) -> usize {
        claimants(&self.pickups, pos).len()
            + claimants(&self.opens, pos).len()
            + claimants(&self.closes, pos).len()
    }

    fn sole(&self, map: &ClaimMap, pos: Position, agent: AgentId) -> bool {
        claimants(map, pos) == [agent] && self.interactions(pos) == 1
    }

    /// The content of `pos` leaves the grid this tick.
    fn lifted(&self, pos: Position) -> bool {
        claimants(&self.pickups, pos).len() == 1 && self.interactions(pos) == 1
    }
}

/// Judges every agent's action against one snapshot of the world.
pub struct Resolver<'a> {
    world: &'a WorldGrid,
    agents: &'a [AgentState],
    actions: &'a [Action],
    forward: Vec<Option<Position>>,
    claims: Claims,
    verdicts: Vec<Verdict>,
}

/// In-bounds cell in front of each agent.
fn forward_cells(world: &WorldGrid, agents: &[AgentState]) -> Vec<Option<Position>> {
    agents
        .iter()
        .map(|agent| {
            let next = agent.position.step(agent.direction)?;
            world.is_valid(next.x, next.y).then_some(next)
        })
        .collect()
}

impl<'a> Resolver<'a> {
    pub fn new(world: &'a WorldGrid, agents: &'a [AgentState], actions: &'a [Action]) -> Self {
        let forward = forward_cells(world, agents);
        let mut claims = Claims::default();

        for (agent, state) in agents.iter().enumerate() {
            claims.occupants.insert(state.position, agent);
            let ahead = forward[agent];

            if actions[agent] == Action::Forward {
                if let Some(pos) = ahead {
                    claims.destinations.entry(pos).or_default().push(agent);
                }
                continue;
            }

            claims
                .destinations
                .entry(state.position)
                .or_default()
                .push(agent);

            let Some(pos) = ahead else { continue };
            let cell = world[pos].as_ref();
            match actions[agent] {
                Action::Drop => claims.drops.entry(pos).or_default().push(agent),
                Action::Pickup => {
                    if state.carrying.is_none() && cell.is_some_and(|e| e.can_pickup_by(agent)) {
                        claims.pickups.entry(pos).or_default().push(agent);
                    }
                }
                Action::Toggle => {
                    match cell.and_then(|e| e.check_toggle(state.carrying.as_ref())) {
                        Some(ToggleKind::Open) => claims.opens.entry(pos).or_default().push(agent),
                        Some(ToggleKind::Close) => {
                            claims.closes.entry(pos).or_default().push(agent)
                        }
                        None => {}
                    }
                }
                _ => {}
            }
        }

        Resolver {
            world,
            agents,
            actions,
            forward,
            claims,
            verdicts: vec![Verdict::Unvisited; agents.len()],
        }
    }

    /// Validity of every agent's action.
    pub fn resolve(mut self) -> Vec<bool> {
        let applied: Vec<bool> = (0..self.agents.len()).map(|a| self.is_valid(a)).collect();
        for (agent, ok) in applied.iter().enumerate() {
            if !ok {
                trace!(agent, action = ?self.actions[agent], "intent rejected");
            }
        }
        applied
    }

    fn is_valid(&mut self, agent: AgentId) -> bool {
        match self.verdicts[agent] {
            Verdict::Done(valid) => return valid,
            Verdict::InProgress => {
                trace!(agent, "movement cycle");
                return false;
            }
            Verdict::Unvisited => {}
        }
        self.verdicts[agent] = Verdict::InProgress;
        let valid = match self.actions[agent] {
            Action::Left | Action::Right | Action::Done => true,
            Action::Forward => self.can_move(agent),
            Action::Pickup => self
                .forward[agent]
                .is_some_and(|pos| self.claims.sole(&self.claims.pickups, pos, agent)),
            Action::Drop => self.can_drop(agent),
            Action::Toggle => self.can_toggle(agent),
        };
        self.verdicts[agent] = Verdict::Done(valid);
        valid
    }

    /// An agent standing in `pos` gets out of the way this tick.
    fn occupant_leaves(&mut self, pos: Position) -> bool {
        match self.claims.occupants.get(&pos).copied() {
            Some(occupant) => self.is_valid(occupant),
            None => true,
        }
    }

    fn vacatable(&self, pos: Position) -> bool {
        match &self.world[pos] {
            None => true,
            Some(entity) => entity.can_overlap() || self.claims.lifted(pos),
        }
    }

    fn can_move(&mut self, agent: AgentId) -> bool {
        let Some(target) = self.forward[agent] else {
            return false;
        };
        if !self.vacatable(target)
            || claimants(&self.claims.destinations, target).len() > 1
            || self.claims.drops.contains_key(&target)
            || self.claims.closes.contains_key(&target)
        {
            return false;
        }
        if let Some(&occupant) = self.claims.occupants.get(&target) {
            let head_on = self.actions[occupant] == Action::Forward
                && self.forward[occupant] == Some(self.agents[agent].position);
            if head_on {
                return false;
            }
        }
        self.occupant_leaves(target)
    }

    fn can_drop(&mut self, agent: AgentId) -> bool {
        let Some(target) = self.forward[agent] else {
            return false;
        };
        if self.agents[agent].carrying.is_none() {
            return false;
        }
        let free = self.world[target].is_none() || self.claims.lifted(target);
        if !free
            || self.claims.destinations.contains_key(&target)
            || claimants(&self.claims.drops, target).len() > 1
        {
            return false;
        }
        self.occupant_leaves(target)
    }

    fn can_toggle(&mut self, agent: AgentId) -> bool {
        let Some(target) = self.forward[agent] else {
            return false;
        };
        if self.claims.sole(&self.claims.closes, target, agent) {
            return !self.claims.destinations.contains_key(&target) && self.occupant_leaves(target);
        }
        self.claims.sole(&self.claims.opens, target, agent)
    }
}

/// Applies validated actions. Pickups go first so that a cell emptied this
/// tick can receive a dropped entity regardless of agent order.
pub fn commit(
    world: &mut WorldGrid,
    agents: &mut [AgentState],
    actions: &[Action],
    applied: &[bool],
) -> Vec<Event> {
    let forward = forward_cells(world, agents);
    let mut events = Vec::new();

    for agent in 0..agents.len() {
        if !applied[agent] || actions[agent] != Action::Pickup {
            continue;
        }
        let Some(pos) = forward[agent] else { continue };
        if let Some(mut entity) = world.take(pos) {
            entity.location = Location::Carried(agent);
            events.push(Event::PickedUp {
                agent,
                entity: entity.id,
            });
            agents[agent].carrying = Some(entity);
        }
    }

    for agent in 0..agents.len() {
        if !applied[agent] {
            continue;
        }
        let state = &mut agents[agent];
        match (actions[agent], forward[agent]) {
            (Action::Left, _) => state.direction = state.direction.left(),
            (Action::Right, _) => state.direction = state.direction.right(),
            (Action::Forward, Some(to)) => {
                state.position = to;
                events.push(Event::Moved { agent, to });
            }
            (Action::Drop, Some(at)) => {
                if let Some(entity) = state.carrying.take() {
                    world.put(at, entity);
                    events.push(Event::Dropped { agent, at });
                }
            }
            (Action::Toggle, Some(at)) => {
                let outcome = match world[at].as_mut() {
                    Some(entity) => entity.toggle(state.carrying.as_ref()),
                    None => ToggleOutcome::Failed,
                };
                match outcome {
                    ToggleOutcome::Failed => continue,
                    ToggleOutcome::Changed => {}
                    ToggleOutcome::Replace(contents) => {
                        world.take(at);
                        if let Some(contents) = contents {
                            world.put(at, contents);
                        }
                    }
                }
                events.push(Event::Toggled { agent, at });
            }
            _ => {}
        }
    }

    events
}

/// Resolves and commits one tick.
pub fn resolve_tick(
    world: &mut WorldGrid,
    agents: &mut [AgentState],
    actions: &[Action],
) -> Resolution {
    let applied = Resolver::new(world, agents, actions).resolve();
    let events = commit(world, agents, actions, &applied);
    debug!(
        agents = agents.len(),
        applied = applied.iter().filter(|ok| **ok).count(),
        events = events.len(),
        "resolved tick"
    );
    Resolution { applied, events }
}
