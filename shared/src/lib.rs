pub mod codec;
pub mod protocol;
pub mod rules;
pub mod world;

pub use codec::{decode, encode, DecodeError, EncodeError};
pub use protocol::{ActionKind, Message, ParticipantAction, ParticipantRef};
pub use world::{
    Actor, Cell, CellKind, Grid, Mode, ParticipantId, Projectile, Roamer, RoamerKind,
    WorldModel, WorldSnapshot, USE_CURRENT_LOCATION,
};

pub const GRID_WIDTH: i32 = 30;
pub const GRID_HEIGHT: i32 = 20;
pub const SHRUBBERY_COUNT: usize = 60;
pub const MAX_ROAMERS: usize = 15;
pub const ROAMER_SPAWN_CHANCE: f64 = 0.02;

/// Participant id the authority keeps for itself.
pub const AUTHORITY_ID: ParticipantId = 0;

/// Builds the starting world an authority opens a session with.
pub fn initial_world<R: rand::Rng>(width: i32, height: i32, shrubbery: usize, rng: &mut R) -> WorldModel {
    let mut world = WorldModel::new(width, height);
    world.seed_shrubbery(shrubbery, rng);
    world
}
