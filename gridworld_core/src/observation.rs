use serde::{Deserialize, Serialize};

use crate::{
    AgentId, Direction,
    entity::{DecodeError, Entity, ObjectKind},
    environment::AgentState,
    map::{Grid, Mask, WorldGrid},
    visibility::ViewFrame,
};

/// Encoding of a cell outside the visibility mask.
pub const UNSEEN: [u8; 3] = [0, 0, 0];

/// Encoding of a visible cell with nothing in it.
pub const EMPTY: [u8; 3] = [ObjectKind::Empty as u8, 0, 0];

/// Marker written for a visible cell occupied by another agent.
pub fn agent_marker(agent: AgentId, direction: Direction) -> [u8; 3] {
    [
        ObjectKind::Agent.index(),
        crate::Color::for_agent(agent).index(),
        direction.index(),
    ]
}

/// What one agent perceives after a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub width: usize,
    pub height: usize,
    /// Row-major `(type, color, state)` triples.
    pub cells: Vec<[u8; 3]>,
    pub direction: Direction,
    pub mission: String,
}

impl Observation {
    pub fn get(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        (x < self.width && y < self.height).then(|| self.cells[y * self.width + x])
    }

    pub fn is_seen(&self, x: usize, y: usize) -> bool {
        self.get(x, y).is_some_and(|cell| cell[0] != ObjectKind::Unseen.index())
    }

    /// Reconstructs the perceived terrain and which cells were seen.
    pub fn to_grid(&self) -> Result<(WorldGrid, Mask), DecodeError> {
        WorldGrid::decode(self.width, self.height, &self.cells)
    }
}

fn encode_cell(cell: Option<&Entity>, occupant: Option<&AgentState>) -> [u8; 3] {
    match (occupant, cell) {
        (Some(agent), _) => agent_marker(agent.id, agent.direction),
        (None, Some(entity)) => entity.encode(),
        (None, None) => EMPTY,
    }
}

impl WorldGrid {
    /// Encodes every cell, writing [`UNSEEN`] where `mask` is false.
    pub fn encode(&self, mask: &Mask) -> Vec<[u8; 3]> {
        self.enumerate()
            .map(|(xy, cell)| {
                if mask[xy] {
                    encode_cell(cell.as_ref(), None)
                } else {
                    UNSEEN
                }
            })
            .collect()
    }

    /// Inverse of [`WorldGrid::encode`]. Agent markers and unseen cells decode
    /// to no entity; the returned mask is true wherever a cell was seen.
    pub fn decode(
        width: usize,
        height: usize,
        cells: &[[u8; 3]],
    ) -> Result<(WorldGrid, Mask), DecodeError> {
        let expected = width * height;
        if cells.len() != expected {
            return Err(DecodeError::ShapeMismatch {
                expected,
                actual: cells.len(),
            });
        }
        let mut grid = WorldGrid::empty(width, height);
        let mut mask = Mask::filled(width, height, false);
        for (index, &cell) in cells.iter().enumerate() {
            let (x, y) = (index % width, index / width);
            mask[(x, y)] = cell[0] != ObjectKind::Unseen.index();
            grid[(x, y)] = Entity::decode(cell)?;
        }
        Ok((grid, mask))
    }
}

/// Builds observations for the agents of one episode.
pub struct Observer<'a> {
    pub world: &'a WorldGrid,
    pub agents: &'a [AgentState],
    pub view_size: usize,
    pub see_through_walls: bool,
    pub mission: &'a str,
}

impl Observer<'_> {
    fn frame(&self, agent: &AgentState) -> ViewFrame {
        ViewFrame::new(agent.position, agent.direction, self.view_size)
    }

    fn other_at(&self, me: AgentId, x: isize, y: isize) -> Option<&AgentState> {
        let pos = self.world.position(x, y)?;
        self.agents
            .iter()
            .find(|other| other.id != me && other.position == pos)
    }

    /// Window view: forward is up, the agent sits at the bottom centre and
    /// sees its carried entity in its own cell.
    pub fn egocentric(&self, me: AgentId) -> Observation {
        let agent = &self.agents[me];
        let frame = self.frame(agent);
        let (mut window, mask) = frame.observe(self.world, self.see_through_walls);
        window[frame.anchor()] = agent.carrying.clone();

        let cells = window
            .enumerate()
            .map(|((vx, vy), cell)| {
                if !mask[(vx, vy)] {
                    return UNSEEN;
                }
                let (x, y) = frame.to_world(vx, vy);
                encode_cell(cell.as_ref(), self.other_at(me, x, y))
            })
            .collect();

        Observation {
            width: window.width(),
            height: window.height(),
            cells,
            direction: agent.direction,
            mission: self.mission.to_string(),
        }
    }

    /// Whole-grid view in world orientation. The visible region is the same
    /// one the window view would report.
    pub fn full_grid(&self, me: AgentId) -> Observation {
        let agent = &self.agents[me];
        let frame = self.frame(agent);
        let (_, window_mask) = frame.observe(self.world, self.see_through_walls);

        let mut mask = Mask::filled(self.world.width(), self.world.height(), false);
        for ((vx, vy), _) in window_mask.enumerate().filter(|(_, seen)| **seen) {
            let (x, y) = frame.to_world(vx, vy);
            if let Some(pos) = self.world.position(x, y) {
                mask[pos] = true;
            }
        }

        let cells = Grid::from_generator(self.world.width(), self.world.height(), |x, y| {
            if !mask[(x, y)] {
                return UNSEEN;
            }
            if agent.position.x == x && agent.position.y == y {
                return encode_cell(agent.carrying.as_ref(), None);
            }
            encode_cell(
                self.world[(x, y)].as_ref(),
                self.other_at(me, x as isize, y as isize),
            )
        });

        Observation {
            width: self.world.width(),
            height: self.world.height(),
            cells: cells.as_slice().to_vec(),
            direction: agent.direction,
            mission: self.mission.to_string(),
        }
    }

    /// Observation for every agent, in agent order.
    pub fn all(&self, full_grid: bool) -> Vec<Observation> {
        (0..self.agents.len())
            .map(|me| {
                if full_grid {
                    self.full_grid(me)
                } else {
                    self.egocentric(me)
                }
            })
            .collect()
    }

    /// Full-visibility encoding of the world with every agent marked.
    pub fn god_view(&self) -> Vec<[u8; 3]> {
        self.world
            .enumerate()
            .map(|((x, y), cell)| {
                let occupant = self
                    .agents
                    .iter()
                    .find(|agent| agent.position.x == x && agent.position.y == y);
                encode_cell(cell.as_ref(), occupant)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Color, Position, entity::DoorState};

    fn agent(id: AgentId, x: usize, y: usize, direction: Direction) -> AgentState {
        AgentState {
            id,
            position: Position::new(x, y),
            direction,
            carrying: None,
        }
    }

    fn room() -> WorldGrid {
        let mut world = WorldGrid::empty(7, 7);
        world.wall_rect(0, 0, 7, 7);
        world
    }

    fn observer<'a>(world: &'a WorldGrid, agents: &'a [AgentState]) -> Observer<'a> {
        Observer {
            world,
            agents,
            view_size: 5,
            see_through_walls: false,
            mission: "test",
        }
    }

    #[test]
    fn carried_entity_shows_at_anchor() {
        let world = room();
        let mut agents = vec![agent(0, 3, 3, Direction::Up)];
        agents[0].carrying = Some(Entity::key(Color::Red));
        let obs = observer(&world, &agents).egocentric(0);
        assert_eq!((obs.width, obs.height), (5, 5));
        assert_eq!(obs.get(2, 4), Some([5, 0, 0]));

        agents[0].carrying = None;
        let obs = observer(&world, &agents).egocentric(0);
        assert_eq!(obs.get(2, 4), Some(EMPTY));
    }

    #[test]
    fn other_agents_appear_as_markers() {
        let world = room();
        let agents = vec![
            agent(0, 3, 4, Direction::Up),
            agent(7, 3, 2, Direction::Left),
        ];
        let obs = observer(&world, &agents).egocentric(0);
        // Two cells straight ahead.
        assert_eq!(obs.get(2, 2), Some([10, 1, 2]));
    }

    #[test]
    fn hidden_cells_are_unseen() {
        let mut world = room();
        world.horz_wall(1, 2, Some(5));
        world.put(
            Position::new(3, 2),
            Entity::door(Color::Blue, DoorState::Locked),
        );
        let agents = vec![agent(0, 3, 4, Direction::Up)];
        let obs = observer(&world, &agents).egocentric(0);
        assert_eq!(obs.get(2, 2), Some([4, 2, 2]));
        assert_eq!(obs.get(2, 1), Some(UNSEEN));
        assert!(!obs.is_seen(2, 0));
    }

    #[test]
    fn full_grid_matches_window_region() {
        let mut world = room();
        world.put(Position::new(4, 2), Entity::ball(Color::Purple));
        let agents = vec![
            agent(0, 2, 3, Direction::Right),
            agent(1, 5, 5, Direction::Down),
        ];
        let obs = observer(&world, &agents).full_grid(0);
        assert_eq!((obs.width, obs.height), (7, 7));
        assert_eq!(obs.get(4, 2), Some([6, 3, 0]));
        assert_eq!(obs.get(2, 3), Some(EMPTY));
        // Behind the agent is outside the window.
        assert_eq!(obs.get(1, 3), Some(UNSEEN));
        assert_eq!(obs.get(5, 5), Some([10, 1, 1]));
    }

    #[test]
    fn decode_inverts_visible_terrain() {
        let mut world = room();
        world.put(Position::new(2, 2), Entity::key(Color::Yellow));
        world.put(Position::new(4, 4), Entity::lava());
        let mask = Mask::filled(7, 7, true);
        let (decoded, seen) = WorldGrid::decode(7, 7, &world.encode(&mask)).unwrap();
        assert!(seen.iter().all(|&v| v));
        for ((x, y), cell) in world.enumerate() {
            assert_eq!(
                decoded[(x, y)].as_ref().map(Entity::encode),
                cell.as_ref().map(Entity::encode)
            );
        }
    }

    #[test]
    fn decode_checks_shape() {
        assert_eq!(
            WorldGrid::decode(2, 2, &[EMPTY; 3]).unwrap_err(),
            DecodeError::ShapeMismatch {
                expected: 4,
                actual: 3
            }
        );
    }
}
