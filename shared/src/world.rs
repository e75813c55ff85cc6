//! Replicated world model.
//!
//! The grid, the actor roster and the roamers are owned by the authority and
//! replicated wholesale in [`WorldSnapshot`]. Projectiles live only in
//! [`WorldModel`] and never travel inside a snapshot.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Participant identifier, unique for the lifetime of a session.
pub type ParticipantId = u32;

/// Target coordinate meaning "the actor's current location".
pub const USE_CURRENT_LOCATION: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    #[default]
    Empty,
    Shrubbery,
    TreeSeedling,
    TreeYoung,
    TreeMature,
    Grave,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cell {
    #[serde(rename = "type", default)]
    pub kind: CellKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub growth: f32,
    /// Game time of the last growth step. Local bookkeeping only.
    #[serde(skip)]
    pub last_growth: f32,
}

fn is_zero(value: &f32) -> bool {
    *value == 0.0
}

// Local bookkeeping does not take part in equality.
impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.owner == other.owner && self.growth == other.growth
    }
}

impl Cell {
    pub fn clear(&mut self) {
        self.kind = CellKind::Empty;
        self.owner = None;
        self.growth = 0.0;
    }
}

/// Row-major grid of cells.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Grid {
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(0);
        let height = height.max(0);
        Self {
            width,
            height,
            cells: vec![Cell::default(); (width * height) as usize],
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    /// True when the dimensions describe exactly the cells carried.
    pub fn is_well_formed(&self) -> bool {
        self.width >= 0
            && self.height >= 0
            && self
                .width
                .checked_mul(self.height)
                .and_then(|count| usize::try_from(count).ok())
                == Some(self.cells.len())
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if !self.contains(x, y) {
            return None;
        }
        let index = y.checked_mul(self.width)?.checked_add(x)?;
        usize::try_from(index)
            .ok()
            .filter(|&index| index < self.cells.len())
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<&Cell> {
        self.index(x, y).map(|i| &self.cells[i])
    }

    pub fn cell_mut(&mut self, x: i32, y: i32) -> Option<&mut Cell> {
        self.index(x, y).map(move |i| &mut self.cells[i])
    }

    /// Four fixed spawn corners, in a stable order.
    pub fn corners(&self) -> [(i32, i32); 4] {
        let right = (self.width - 1).max(0);
        let bottom = (self.height - 1).max(0);
        [(0, 0), (right, 0), (0, bottom), (right, bottom)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Plant,
    Shoot,
    Chop,
}

impl Mode {
    pub fn next(self) -> Self {
        match self {
            Mode::Plant => Mode::Shoot,
            Mode::Shoot => Mode::Chop,
            Mode::Chop => Mode::Plant,
        }
    }
}

/// Replicated state of one participant's in-world presence.
///
/// Used both as the payload of an actor update and as an entry of the
/// snapshot roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: ParticipantId,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub score: i32,
    #[serde(default = "alive_by_default")]
    pub alive: bool,
    #[serde(default)]
    pub facing_x: i32,
    #[serde(default)]
    pub facing_y: i32,
    #[serde(default)]
    pub display_name: String,
}

fn alive_by_default() -> bool {
    true
}

impl Actor {
    pub fn new(id: ParticipantId, x: i32, y: i32) -> Self {
        Self {
            id,
            x,
            y,
            mode: Mode::Plant,
            score: 0,
            alive: true,
            facing_x: 0,
            facing_y: 0,
            display_name: String::new(),
        }
    }

    /// True when any field a peer can observe differs.
    pub fn observably_differs(&self, other: &Actor) -> bool {
        self.x != other.x
            || self.y != other.y
            || self.mode != other.mode
            || self.score != other.score
            || self.alive != other.alive
            || self.facing_x != other.facing_x
            || self.facing_y != other.facing_y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoamerKind {
    Rabbit,
    Deer,
}

/// Non-player entity wandering the grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roamer {
    pub id: u32,
    pub kind: RoamerKind,
    pub x: i32,
    pub y: i32,
    #[serde(skip)]
    pub last_move: f32,
    #[serde(skip, default = "default_move_delay")]
    pub move_delay: f32,
}

fn default_move_delay() -> f32 {
    1.0
}

impl PartialEq for Roamer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.kind == other.kind && self.x == other.x && self.y == other.y
    }
}

impl Roamer {
    pub fn new(id: u32, kind: RoamerKind, x: i32, y: i32) -> Self {
        Self {
            id,
            kind,
            x,
            y,
            last_move: 0.0,
            move_delay: default_move_delay(),
        }
    }
}

/// Short-lived entity seeded by a shoot action. Never replicated.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub x: i32,
    pub y: i32,
    pub dir_x: i32,
    pub dir_y: i32,
    pub owner: ParticipantId,
    pub fired_at: f32,
    pub active: bool,
}

/// The authority-owned portion of the world, as carried by a full snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshot {
    #[serde(default)]
    pub grid: Grid,
    #[serde(default)]
    pub actor_roster: Vec<Actor>,
    #[serde(default)]
    pub roamer_list: Vec<Roamer>,
}

/// Full local world: replicated state plus in-flight projectiles.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldModel {
    pub grid: Grid,
    pub actors: BTreeMap<ParticipantId, Actor>,
    pub roamers: Vec<Roamer>,
    pub projectiles: Vec<Projectile>,
    /// Next roamer id handed out by the authority.
    pub next_roamer_id: u32,
}

impl WorldModel {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            grid: Grid::new(width, height),
            ..Self::default()
        }
    }

    /// Scatters shrubbery over empty cells.
    pub fn seed_shrubbery<R: Rng>(&mut self, count: usize, rng: &mut R) {
        if self.grid.cells.is_empty() {
            return;
        }
        for _ in 0..count {
            let x = rng.gen_range(0..self.grid.width);
            let y = rng.gen_range(0..self.grid.height);
            if let Some(cell) = self.grid.cell_mut(x, y) {
                if cell.kind == CellKind::Empty {
                    cell.kind = CellKind::Shrubbery;
                }
            }
        }
    }

    /// Replicated view of this world. Projectiles are left out.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            grid: self.grid.clone(),
            actor_roster: self.actors.values().cloned().collect(),
            roamer_list: self.roamers.clone(),
        }
    }

    /// Replaces grid, roster and roamers with the snapshot contents.
    /// Projectiles are untouched.
    ///
    /// Growth timers are local: a cell keeps its timer when the grid shape and
    /// the cell kind are unchanged, otherwise the timer starts at `now`.
    pub fn replace_replicated(&mut self, snapshot: WorldSnapshot, now: f32) {
        let previous = std::mem::replace(&mut self.grid, snapshot.grid);
        let same_shape = previous.width == self.grid.width
            && previous.height == self.grid.height
            && previous.cells.len() == self.grid.cells.len();
        for (i, cell) in self.grid.cells.iter_mut().enumerate() {
            cell.last_growth = match previous.cells.get(i) {
                Some(old) if same_shape && old.kind == cell.kind => old.last_growth,
                _ => now,
            };
        }
        self.actors = snapshot
            .actor_roster
            .into_iter()
            .map(|actor| (actor.id, actor))
            .collect();
        self.next_roamer_id = self
            .next_roamer_id
            .max(snapshot.roamer_list.iter().map(|r| r.id + 1).max().unwrap_or(0));
        self.roamers = snapshot.roamer_list;
    }

    pub fn actor(&self, id: ParticipantId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn actor_mut(&mut self, id: ParticipantId) -> Option<&mut Actor> {
        self.actors.get_mut(&id)
    }
}
