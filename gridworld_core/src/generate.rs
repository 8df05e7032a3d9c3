//! World generators and the text map loader.

use rand::{Rng, rngs::StdRng, seq::SliceRandom};
use tracing::warn;

use crate::{
    Color, Direction, Position,
    config::EnvConfig,
    entity::{DoorState, Entity},
    environment::Objective,
    map::WorldGrid,
};

/// Tries allowed to rejection sampling before a placement gives up.
pub const DEFAULT_MAX_TRIES: usize = 10_000;

/// Errors raised while building a layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    #[error("rejection sampling failed to place {what} after {tries} tries")]
    PlacementExhausted { what: String, tries: usize },
    #[error("map parse error: {0}")]
    MapParse(String),
    #[error("invalid generator parameters: {0}")]
    InvalidParameters(String),
}

/// Everything an episode needs to start.
#[derive(Debug, Clone)]
pub struct Layout {
    pub grid: WorldGrid,
    /// Start pose of each agent, in agent order.
    pub agents: Vec<(Position, Direction)>,
    pub mission: String,
    pub objective: Objective,
}

/// Produces the initial world of an episode.
pub trait Generator {
    fn generate(&self, rng: &mut StdRng, config: &EnvConfig) -> Result<Layout, GenerateError>;
}

/// Rectangle in which placement samples positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Region {
            x,
            y,
            width,
            height,
        }
    }
}

/// Grid under construction plus the agents placed so far.
pub struct LayoutBuilder<'r> {
    pub grid: WorldGrid,
    agents: Vec<(Position, Direction)>,
    rng: &'r mut StdRng,
    max_tries: usize,
}

impl<'r> LayoutBuilder<'r> {
    pub fn new(width: usize, height: usize, rng: &'r mut StdRng) -> Self {
        LayoutBuilder {
            grid: WorldGrid::empty(width, height),
            agents: Vec::new(),
            rng,
            max_tries: DEFAULT_MAX_TRIES,
        }
    }

    pub fn with_max_tries(mut self, max_tries: usize) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut *self.rng
    }

    fn find_free(&mut self, region: Region, what: &str) -> Result<Position, GenerateError> {
        let exhausted = |tries| GenerateError::PlacementExhausted {
            what: what.to_string(),
            tries,
        };
        let x_end = (region.x + region.width).min(self.grid.width());
        let y_end = (region.y + region.height).min(self.grid.height());
        if region.x >= x_end || region.y >= y_end {
            return Err(exhausted(0));
        }

        for tries in 1..=self.max_tries {
            let pos = Position::new(
                self.rng.random_range(region.x..x_end),
                self.rng.random_range(region.y..y_end),
            );
            if self.grid[pos].is_some() || self.agents.iter().any(|(p, _)| *p == pos) {
                continue;
            }
            if tries > self.max_tries / 2 {
                warn!(what, tries, max_tries = self.max_tries, "placement close to giving up");
            }
            return Ok(pos);
        }
        Err(exhausted(self.max_tries))
    }

    /// Puts `entity` on a random free cell of `region`.
    pub fn place_obj(&mut self, entity: Entity, region: Region) -> Result<Position, GenerateError> {
        let what = format!("{:?}", entity.object_kind());
        let pos = self.find_free(region, &what)?;
        self.grid.put(pos, entity);
        Ok(pos)
    }

    /// Adds an agent on a random free cell of `region`, facing a random way.
    pub fn place_agent(&mut self, region: Region) -> Result<Position, GenerateError> {
        let pos = self.find_free(region, "agent")?;
        let direction = Direction::ALL[self.rng.random_range(0..Direction::ALL.len())];
        self.agents.push((pos, direction));
        Ok(pos)
    }

    pub fn finish(self, mission: impl Into<String>, objective: Objective) -> Layout {
        Layout {
            grid: self.grid,
            agents: self.agents,
            mission: mission.into(),
            objective,
        }
    }
}

fn require(condition: bool, message: &str) -> Result<(), GenerateError> {
    if condition {
        Ok(())
    } else {
        Err(GenerateError::InvalidParameters(message.to_string()))
    }
}

/// Walled square room with a goal in the bottom-right corner.
#[derive(Debug, Clone)]
pub struct EmptyRoom {
    pub size: usize,
    pub agents: usize,
    pub max_tries: usize,
}

impl EmptyRoom {
    pub fn new(size: usize, agents: usize) -> Self {
        EmptyRoom {
            size,
            agents,
            max_tries: DEFAULT_MAX_TRIES,
        }
    }
}

impl Generator for EmptyRoom {
    fn generate(&self, rng: &mut StdRng, _config: &EnvConfig) -> Result<Layout, GenerateError> {
        require(self.size >= 3, "room size must be at least 3")?;
        require(self.agents > 0, "at least one agent is required")?;
        let size = self.size;
        let mut builder = LayoutBuilder::new(size, size, rng).with_max_tries(self.max_tries);
        builder.grid.wall_rect(0, 0, size, size);
        builder.grid.put(Position::new(size - 2, size - 2), Entity::goal());
        for _ in 0..self.agents {
            builder.place_agent(Region::new(1, 1, size - 2, size - 2))?;
        }
        Ok(builder.finish("get to the green goal square", Objective::ReachGoal))
    }
}

/// Two rooms split by a wall with a locked green door. A green and a blue
/// key lie on the agents' side; the goal is on the far side.
#[derive(Debug, Clone)]
pub struct MultiDoorKey {
    pub size: usize,
    pub agents: usize,
    pub max_tries: usize,
}

impl MultiDoorKey {
    pub fn new(size: usize, agents: usize) -> Self {
        MultiDoorKey {
            size,
            agents,
            max_tries: DEFAULT_MAX_TRIES,
        }
    }
}

impl Default for MultiDoorKey {
    fn default() -> Self {
        Self::new(8, 3)
    }
}

impl Generator for MultiDoorKey {
    fn generate(&self, rng: &mut StdRng, _config: &EnvConfig) -> Result<Layout, GenerateError> {
        require(self.size >= 5, "door-key rooms need a size of at least 5")?;
        require(self.agents > 0, "at least one agent is required")?;
        let size = self.size;
        let mut builder = LayoutBuilder::new(size, size, rng).with_max_tries(self.max_tries);
        builder.grid.wall_rect(0, 0, size, size);
        builder.grid.put(Position::new(size - 2, size - 2), Entity::goal());

        let split = builder.rng().random_range(2..size - 2);
        builder.grid.vert_wall(split, 0, None);
        let left = Region::new(0, 0, split, size);
        for _ in 0..self.agents {
            builder.place_agent(left)?;
        }

        let door_y = builder.rng().random_range(1..size - 2);
        builder.grid.put(
            Position::new(split, door_y),
            Entity::door(Color::Green, DoorState::Locked),
        );
        builder.place_obj(Entity::key(Color::Green), left)?;
        builder.place_obj(Entity::key(Color::Blue), left)?;

        Ok(builder.finish(
            "use the key to open the door and then get to the goal",
            Objective::ReachGoal,
        ))
    }
}

/// One row per agent. Keys and agents share an open hall; each agent's
/// goal sits in a one-cell room behind a locked door of the agent's colour.
#[derive(Debug, Clone)]
pub struct UnlockDoorGoal {
    pub agents: usize,
    pub max_tries: usize,
}

impl UnlockDoorGoal {
    pub fn new(agents: usize) -> Self {
        UnlockDoorGoal {
            agents,
            max_tries: DEFAULT_MAX_TRIES,
        }
    }
}

impl Generator for UnlockDoorGoal {
    fn generate(&self, rng: &mut StdRng, _config: &EnvConfig) -> Result<Layout, GenerateError> {
        require(
            (1..=Color::ALL.len()).contains(&self.agents),
            "one to six agents are supported",
        )?;
        let rows = self.agents;
        let (width, height) = (7, 2 * rows + 1);
        let mut builder = LayoutBuilder::new(width, height, rng).with_max_tries(self.max_tries);
        builder.grid.wall_rect(0, 0, width, height);
        builder.grid.vert_wall(4, 0, None);
        for row in 1..rows {
            builder.grid.horz_wall(4, 2 * row, Some(3));
        }

        let mut goal_rows: Vec<usize> = (0..rows).collect();
        goal_rows.shuffle(builder.rng());
        let mut key_rows: Vec<usize> = (0..rows).collect();
        key_rows.shuffle(builder.rng());

        let mut goals = Vec::with_capacity(rows);
        for agent in 0..rows {
            let color = Color::for_agent(agent);
            let y = 2 * goal_rows[agent] + 1;
            builder
                .grid
                .put(Position::new(4, y), Entity::door(color, DoorState::Locked));
            let goal = Position::new(5, y);
            builder.grid.put(goal, Entity::colored_goal(color));
            goals.push(goal);
            builder
                .grid
                .put(Position::new(1, 2 * key_rows[agent] + 1), Entity::key(color));
        }

        for _ in 0..rows {
            builder.place_agent(Region::new(2, 1, 2, height - 2))?;
        }

        Ok(builder.finish(
            "get to your respective colored goal",
            Objective::ReachOwnGoals { goals },
        ))
    }
}

/// A hall and a side chamber joined by a chain of locked doors, one per
/// agent colour in shuffled order. A key of every colour lies in the hall,
/// so opening the chain takes every agent. The chamber holds a ball; picking
/// it up ends the episode for everyone.
///
/// The hall is a single room rather than rows of rooms, and the prize is a
/// ball to retrieve rather than a goal square.
#[derive(Debug, Clone)]
pub struct KeyCorridor {
    pub size: usize,
    pub agents: usize,
    pub max_tries: usize,
}

impl KeyCorridor {
    pub fn new(size: usize, agents: usize) -> Self {
        KeyCorridor {
            size,
            agents,
            max_tries: DEFAULT_MAX_TRIES,
        }
    }
}

impl Generator for KeyCorridor {
    fn generate(&self, rng: &mut StdRng, _config: &EnvConfig) -> Result<Layout, GenerateError> {
        require(self.size >= 6, "corridor rooms need a size of at least 6")?;
        require(self.agents > 0, "at least one agent is required")?;
        let size = self.size;
        let palette: Vec<Color> = (0..self.agents.min(Color::ALL.len()))
            .map(Color::for_agent)
            .collect();
        // Hall, one wall column per door, then a two-column chamber.
        let width = size + palette.len();
        let mut builder = LayoutBuilder::new(width, size, rng).with_max_tries(self.max_tries);
        builder.grid.wall_rect(0, 0, width, size);

        let first_door = size - 3;
        let door_y = builder.rng().random_range(1..size - 1);
        let mut door_colors = palette.clone();
        door_colors.shuffle(builder.rng());
        for (offset, color) in door_colors.into_iter().enumerate() {
            let x = first_door + offset;
            builder.grid.vert_wall(x, 0, None);
            builder
                .grid
                .put(Position::new(x, door_y), Entity::door(color, DoorState::Locked));
        }

        let ball_color = palette[builder.rng().random_range(0..palette.len())];
        let chamber = first_door + palette.len();
        let target = builder.place_obj(
            Entity::ball(ball_color),
            Region::new(chamber, 1, width - 1 - chamber, size - 2),
        )?;

        let hall = Region::new(1, 1, first_door - 1, size - 2);
        for &color in &palette {
            builder.place_obj(Entity::key(color), hall)?;
        }
        for _ in 0..self.agents {
            builder.place_agent(hall)?;
        }

        let mission = format!("pick up the {ball_color:?} ball").to_lowercase();
        Ok(builder.finish(mission, Objective::Retrieve { target, by: None }))
    }
}

/// A layout read from a whitespace-separated token map.
#[derive(Debug, Clone)]
pub struct TextMap {
    pub source: String,
    pub mission: String,
    /// Defaults to reaching a goal.
    pub objective: Option<Objective>,
}

impl TextMap {
    pub fn new(source: impl Into<String>) -> Self {
        TextMap {
            source: source.into(),
            mission: "get to the goal".to_string(),
            objective: None,
        }
    }
}

impl Generator for TextMap {
    fn generate(&self, _rng: &mut StdRng, _config: &EnvConfig) -> Result<Layout, GenerateError> {
        let (grid, agents) = load_layout_from_string(&self.source)?;
        Ok(Layout {
            grid,
            agents,
            mission: self.mission.clone(),
            objective: self.objective.clone().unwrap_or(Objective::ReachGoal),
        })
    }
}

fn parse_agent(token: &str) -> Option<(usize, Direction)> {
    let mut chars = token.chars();
    let direction = match chars.next()? {
        '>' => Direction::Right,
        'v' => Direction::Down,
        '<' => Direction::Left,
        '^' => Direction::Up,
        _ => return None,
    };
    let id = chars.as_str().parse().ok()?;
    Some((id, direction))
}

fn parse_entity(token: &str) -> Option<Option<Entity>> {
    if token == ".." {
        return Some(None);
    }
    let mut chars = token.chars();
    let (kind, initial) = (chars.next()?, chars.next()?);
    if chars.next().is_some() {
        return None;
    }
    let color = Color::from_initial(initial)?;
    let entity = match kind {
        'W' => Entity::wall(),
        'F' => Entity::floor(color),
        'O' => Entity::door(color, DoorState::Open),
        'D' => Entity::door(color, DoorState::Closed),
        'L' => Entity::door(color, DoorState::Locked),
        'K' => Entity::key(color),
        'A' => Entity::ball(color),
        'B' => Entity::boxed(color, None),
        'G' => Entity::colored_goal(color),
        'V' => Entity::lava(),
        _ => return None,
    };
    Some(Some(entity))
}

/// Loads a grid and agent start poses from a map string.
///
/// Each row is one line of whitespace-separated two-character tokens: `..`
/// for an empty cell, a kind letter followed by a colour initial for an
/// entity (`W` wall, `F` floor, `O`/`D`/`L` open/closed/locked door, `K`
/// key, `A` ball, `B` box, `G` goal, `V` lava), or a facing arrow followed
/// by an agent index (`>0`, `v1`, `<2`, `^3`). Agent indices must be
/// contiguous from zero.
pub fn load_layout_from_string(
    map_string: &str,
) -> Result<(WorldGrid, Vec<(Position, Direction)>), GenerateError> {
    let lines: Vec<&str> = map_string.trim().lines().collect();
    if lines.is_empty() {
        return Err(GenerateError::MapParse("Map string is empty.".to_string()));
    }

    let height = lines.len();
    let mut width = 0;
    let mut parsed_rows: Vec<Vec<&str>> = Vec::with_capacity(height);

    for (y, line) in lines.iter().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if y == 0 {
            width = tokens.len();
            if width == 0 {
                return Err(GenerateError::MapParse("Map has zero width.".to_string()));
            }
        } else if tokens.len() != width {
            return Err(GenerateError::MapParse(format!(
                "Inconsistent width at row {}: expected {}, found {}",
                y,
                width,
                tokens.len()
            )));
        }
        parsed_rows.push(tokens);
    }

    let mut grid = WorldGrid::empty(width, height);
    let mut starts: Vec<(usize, Position, Direction)> = Vec::new();

    for (y, row_tokens) in parsed_rows.iter().enumerate() {
        for (x, token) in row_tokens.iter().enumerate() {
            let pos = Position { x, y };
            if let Some((id, direction)) = parse_agent(token) {
                if starts.iter().any(|(other, _, _)| *other == id) {
                    return Err(GenerateError::MapParse(format!(
                        "Agent {} appears more than once.",
                        id
                    )));
                }
                starts.push((id, pos, direction));
                continue;
            }
            match parse_entity(token) {
                Some(Some(entity)) => {
                    grid.put(pos, entity);
                }
                Some(None) => {}
                None => {
                    return Err(GenerateError::MapParse(format!(
                        "Unknown map code '{}' at position ({}, {}).",
                        token, x, y
                    )));
                }
            }
        }
    }

    if starts.is_empty() {
        return Err(GenerateError::MapParse(
            "No agent start positions found in map.".to_string(),
        ));
    }
    starts.sort_by_key(|(id, _, _)| *id);
    if let Some((expected, (id, _, _))) = starts
        .iter()
        .enumerate()
        .find(|(expected, (id, _, _))| expected != id)
    {
        return Err(GenerateError::MapParse(format!(
            "Agent indices must be contiguous: expected {}, found {}.",
            expected, id
        )));
    }

    Ok((
        grid,
        starts.into_iter().map(|(_, pos, dir)| (pos, dir)).collect(),
    ))
}
