//! Merging remote state into the local world.
//!
//! Two entities are locally owned and survive any inbound state: the actor
//! this process controls and the projectiles in flight. Everything else is
//! taken from the authority as-is.

use crate::session::Role;
use log::{debug, warn};
use shared::{Actor, ParticipantId, WorldModel, WorldSnapshot};

/// Applies a full snapshot, keeping the local actor and all projectiles.
///
/// The authority never imports a snapshot. `now` is the local game clock and
/// seeds growth timers of cells that changed. Returns true when the world was
/// touched.
pub fn apply_full_snapshot(
    world: &mut WorldModel,
    incoming: WorldSnapshot,
    role: Role,
    local_id: Option<ParticipantId>,
    now: f32,
) -> bool {
    if role == Role::Authority {
        debug!("Authority ignoring inbound snapshot");
        return false;
    }
    if !incoming.grid.is_well_formed() {
        warn!(
            "Ignoring snapshot with a {}x{} grid of {} cells",
            incoming.grid.width,
            incoming.grid.height,
            incoming.grid.cells.len()
        );
        return false;
    }

    let local_actor = local_id.and_then(|id| world.actors.get(&id).cloned());
    let projectiles = std::mem::take(&mut world.projectiles);

    world.replace_replicated(incoming, now);
    world.projectiles = projectiles;

    if let Some(mut actor) = local_actor {
        // The only thing we take from the authority about ourselves is a name
        // we did not have yet.
        if actor.display_name.is_empty() {
            if let Some(remote) = world.actors.get(&actor.id) {
                actor.display_name = remote.display_name.clone();
            }
        }
        world.actors.insert(actor.id, actor);
    }

    true
}

/// Applies a remote actor update. Echoes of our own actor are ignored.
///
/// Updates are applied in delivery order with no timestamp check, so the last
/// one delivered wins.
pub fn apply_actor_update(
    world: &mut WorldModel,
    update: Actor,
    local_id: Option<ParticipantId>,
) -> bool {
    if Some(update.id) == local_id {
        return false;
    }

    match world.actors.get_mut(&update.id) {
        Some(actor) => {
            actor.x = update.x;
            actor.y = update.y;
            actor.mode = update.mode;
            actor.score = update.score;
            actor.alive = update.alive;
            actor.facing_x = update.facing_x;
            actor.facing_y = update.facing_y;
            if !update.display_name.is_empty() {
                actor.display_name = update.display_name;
            }
        }
        None => {
            debug!("First sighting of actor {}", update.id);
            world.actors.insert(update.id, update);
        }
    }

    true
}
