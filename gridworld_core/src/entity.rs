use serde::{Deserialize, Serialize};

use crate::{AgentId, Color, EntityId, Position};

/// Object type indices used on the wire (channel 0 of an observation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectKind {
    Unseen = 0,
    Empty = 1,
    Wall = 2,
    Floor = 3,
    Door = 4,
    Key = 5,
    Ball = 6,
    Box = 7,
    Goal = 8,
    Lava = 9,
    Agent = 10,
}

impl ObjectKind {
    pub fn index(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ObjectKind {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => ObjectKind::Unseen,
            1 => ObjectKind::Empty,
            2 => ObjectKind::Wall,
            3 => ObjectKind::Floor,
            4 => ObjectKind::Door,
            5 => ObjectKind::Key,
            6 => ObjectKind::Ball,
            7 => ObjectKind::Box,
            8 => ObjectKind::Goal,
            9 => ObjectKind::Lava,
            10 => ObjectKind::Agent,
            other => return Err(DecodeError::UnknownType(other)),
        })
    }
}

/// Errors raised while turning encoded cells back into entities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown object type index {0}")]
    UnknownType(u8),
    #[error("unknown color index {0}")]
    UnknownColor(u8),
    #[error("unknown door state index {0}")]
    UnknownDoorState(u8),
    #[error("encoded buffer holds {actual} cells, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
}

/// State of a door. The discriminants are the wire state indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DoorState {
    Open = 0,
    Closed = 1,
    Locked = 2,
}

impl DoorState {
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Result<Self, DecodeError> {
        match index {
            0 => Ok(DoorState::Open),
            1 => Ok(DoorState::Closed),
            2 => Ok(DoorState::Locked),
            other => Err(DecodeError::UnknownDoorState(other)),
        }
    }
}

/// Where an entity currently lives. Exactly one owner at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Location {
    /// Not yet placed, inside a box, or part of an observation copy.
    #[default]
    Unplaced,
    OnGrid(Position),
    Carried(AgentId),
}

/// Variant-specific data of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Wall,
    Floor,
    Door(DoorState),
    Key,
    Ball,
    Box(Option<Box<Entity>>),
    Goal,
    Lava,
}

/// Static object occupying a grid cell or carried by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub color: Color,
    /// Assigned when an episode is reset; 0 until then.
    pub id: EntityId,
    pub location: Location,
}

/// Which side of a toggle an agent is attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleKind {
    /// Unlocking/opening a door or opening a box.
    Open,
    /// Closing an open door.
    Close,
}

/// Result of applying a toggle to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Failed,
    Changed,
    /// The entity must be replaced in its cell by the given contents.
    Replace(Option<Entity>),
}

impl Entity {
    pub fn new(kind: EntityKind, color: Color) -> Self {
        Entity {
            kind,
            color,
            id: 0,
            location: Location::Unplaced,
        }
    }

    pub fn wall() -> Self {
        Self::new(EntityKind::Wall, Color::Grey)
    }

    pub fn floor(color: Color) -> Self {
        Self::new(EntityKind::Floor, color)
    }

    pub fn door(color: Color, state: DoorState) -> Self {
        Self::new(EntityKind::Door(state), color)
    }

    pub fn key(color: Color) -> Self {
        Self::new(EntityKind::Key, color)
    }

    pub fn ball(color: Color) -> Self {
        Self::new(EntityKind::Ball, color)
    }

    pub fn boxed(color: Color, contents: Option<Entity>) -> Self {
        Self::new(EntityKind::Box(contents.map(Box::new)), color)
    }

    pub fn goal() -> Self {
        Self::new(EntityKind::Goal, Color::Green)
    }

    pub fn colored_goal(color: Color) -> Self {
        Self::new(EntityKind::Goal, color)
    }

    pub fn lava() -> Self {
        Self::new(EntityKind::Lava, Color::Red)
    }

    pub fn object_kind(&self) -> ObjectKind {
        match self.kind {
            EntityKind::Wall => ObjectKind::Wall,
            EntityKind::Floor => ObjectKind::Floor,
            EntityKind::Door(_) => ObjectKind::Door,
            EntityKind::Key => ObjectKind::Key,
            EntityKind::Ball => ObjectKind::Ball,
            EntityKind::Box(_) => ObjectKind::Box,
            EntityKind::Goal => ObjectKind::Goal,
            EntityKind::Lava => ObjectKind::Lava,
        }
    }

    pub fn door_state(&self) -> Option<DoorState> {
        match self.kind {
            EntityKind::Door(state) => Some(state),
            _ => None,
        }
    }

    pub fn is_goal(&self) -> bool {
        matches!(self.kind, EntityKind::Goal)
    }

    pub fn is_lava(&self) -> bool {
        matches!(self.kind, EntityKind::Lava)
    }

    /// Can an agent stand on this cell?
    pub fn can_overlap(&self) -> bool {
        match self.kind {
            EntityKind::Floor | EntityKind::Goal | EntityKind::Lava => true,
            EntityKind::Door(state) => state == DoorState::Open,
            EntityKind::Wall | EntityKind::Key | EntityKind::Ball | EntityKind::Box(_) => false,
        }
    }

    /// Is this a liftable variant at all, regardless of who asks.
    pub fn is_liftable(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::Key | EntityKind::Ball | EntityKind::Box(_)
        )
    }

    /// Can `agent` pick this up? Liftable variants only, and only when the
    /// entity's colour matches the agent's colour.
    pub fn can_pickup_by(&self, agent: AgentId) -> bool {
        self.is_liftable() && self.color == Color::for_agent(agent)
    }

    pub fn can_contain(&self) -> bool {
        matches!(self.kind, EntityKind::Box(_))
    }

    /// Opaque cells stop visibility propagation.
    pub fn see_behind(&self) -> bool {
        match self.kind {
            EntityKind::Wall => false,
            EntityKind::Door(state) => state == DoorState::Open,
            _ => true,
        }
    }

    fn unlocks(&self, carrying: Option<&Entity>) -> bool {
        matches!(carrying, Some(key) if key.kind == EntityKind::Key && key.color == self.color)
    }

    /// Non-mutating check of what a toggle by an agent carrying `carrying`
    /// would attempt. `None` means the toggle cannot succeed.
    pub fn check_toggle(&self, carrying: Option<&Entity>) -> Option<ToggleKind> {
        match self.kind {
            EntityKind::Door(DoorState::Locked) => {
                self.unlocks(carrying).then_some(ToggleKind::Open)
            }
            EntityKind::Door(DoorState::Closed) => Some(ToggleKind::Open),
            EntityKind::Door(DoorState::Open) => Some(ToggleKind::Close),
            EntityKind::Box(_) => Some(ToggleKind::Open),
            _ => None,
        }
    }

    /// Applies the toggle contract to this entity.
    pub fn toggle(&mut self, carrying: Option<&Entity>) -> ToggleOutcome {
        let unlocked = self.unlocks(carrying);
        match &mut self.kind {
            EntityKind::Door(state) => match *state {
                DoorState::Locked if unlocked => {
                    *state = DoorState::Open;
                    ToggleOutcome::Changed
                }
                DoorState::Locked => ToggleOutcome::Failed,
                DoorState::Closed => {
                    *state = DoorState::Open;
                    ToggleOutcome::Changed
                }
                DoorState::Open => {
                    *state = DoorState::Closed;
                    ToggleOutcome::Changed
                }
            },
            EntityKind::Box(contents) => ToggleOutcome::Replace(contents.take().map(|b| *b)),
            _ => ToggleOutcome::Failed,
        }
    }

    /// Encodes as `(type, color, state)`.
    pub fn encode(&self) -> [u8; 3] {
        let state = self.door_state().map_or(0, DoorState::index);
        [self.object_kind().index(), self.color.index(), state]
    }

    /// Rebuilds an entity from its encoding. Unseen, empty and agent markers
    /// carry no entity.
    pub fn decode(cell: [u8; 3]) -> Result<Option<Entity>, DecodeError> {
        let [type_idx, color_idx, state] = cell;
        let kind = ObjectKind::try_from(type_idx)?;
        let kind = match kind {
            ObjectKind::Unseen | ObjectKind::Empty | ObjectKind::Agent => return Ok(None),
            ObjectKind::Wall => EntityKind::Wall,
            ObjectKind::Floor => EntityKind::Floor,
            ObjectKind::Door => EntityKind::Door(DoorState::from_index(state)?),
            ObjectKind::Key => EntityKind::Key,
            ObjectKind::Ball => EntityKind::Ball,
            ObjectKind::Box => EntityKind::Box(None),
            ObjectKind::Goal => EntityKind::Goal,
            ObjectKind::Lava => EntityKind::Lava,
        };
        let color = Color::from_index(color_idx).ok_or(DecodeError::UnknownColor(color_idx))?;
        Ok(Some(Entity::new(kind, color)))
    }

    /// Two-character label used by the text renderer.
    pub fn glyph(&self) -> String {
        let c = self.color.initial();
        match self.kind {
            EntityKind::Wall => format!("W{c}"),
            EntityKind::Floor => format!("F{c}"),
            EntityKind::Door(DoorState::Open) => "__".to_string(),
            EntityKind::Door(DoorState::Locked) => format!("L{c}"),
            EntityKind::Door(DoorState::Closed) => format!("D{c}"),
            EntityKind::Key => format!("K{c}"),
            EntityKind::Ball => format!("A{c}"),
            EntityKind::Box(_) => format!("B{c}"),
            EntityKind::Goal => format!("G{c}"),
            EntityKind::Lava => format!("V{c}"),
        }
    }
}
