use serde::{Deserialize, Serialize};

pub mod agent;
pub mod comm;
pub mod config;
pub mod entity;
pub mod environment;
pub mod generate;
pub mod map;
pub mod observation;
pub mod resolve;
pub mod visibility;

/// Unique identifier for entities placed in the world.
pub type EntityId = usize;

/// Index of an agent within an episode.
pub type AgentId = usize;

/// Represents a 2D coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub const fn new(x: usize, y: usize) -> Self {
        Position { x, y }
    }

    /// The neighbouring cell in `direction`, or `None` when it would leave the
    /// non-negative quadrant.
    pub fn step(self, direction: Direction) -> Option<Position> {
        let (dx, dy) = direction.delta();
        Some(Position {
            x: self.x.checked_add_signed(dx)?,
            y: self.y.checked_add_signed(dy)?,
        })
    }

    /// Euclidean distance between two cells.
    pub fn distance(self, other: Position) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Facing of an agent. The discriminants are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    Right = 0,
    Down = 1,
    Left = 2,
    Up = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Right,
        Direction::Down,
        Direction::Left,
        Direction::Up,
    ];

    /// Turns clockwise.
    pub fn right(self) -> Self {
        match self {
            Direction::Right => Direction::Down,
            Direction::Down => Direction::Left,
            Direction::Left => Direction::Up,
            Direction::Up => Direction::Right,
        }
    }

    /// Turns counter-clockwise.
    pub fn left(self) -> Self {
        match self {
            Direction::Right => Direction::Up,
            Direction::Up => Direction::Left,
            Direction::Left => Direction::Down,
            Direction::Down => Direction::Right,
        }
    }

    /// Unit vector pointing forward.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Up => (0, -1),
        }
    }

    /// Unit vector pointing to the agent's right hand side.
    pub fn right_delta(self) -> (isize, isize) {
        let (dx, dy) = self.delta();
        (-dy, dx)
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

/// The fixed colour palette shared by entities and agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Color {
    Red = 0,
    Green = 1,
    Blue = 2,
    Purple = 3,
    Yellow = 4,
    Grey = 5,
}

impl Color {
    pub const ALL: [Color; 6] = [
        Color::Red,
        Color::Green,
        Color::Blue,
        Color::Purple,
        Color::Yellow,
        Color::Grey,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Colour assigned to an agent: its index modulo the palette size.
    pub fn for_agent(agent: AgentId) -> Self {
        Self::ALL[agent % Self::ALL.len()]
    }

    /// Upper-case initial used by the text renderer and map files.
    pub fn initial(self) -> char {
        match self {
            Color::Red => 'R',
            Color::Green => 'G',
            Color::Blue => 'B',
            Color::Purple => 'P',
            Color::Yellow => 'Y',
            Color::Grey => 'E',
        }
    }

    pub fn from_initial(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|color| color.initial() == c)
    }
}
