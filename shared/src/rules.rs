//! Local world rules.
//!
//! Every peer runs these against its own [`WorldModel`]: actions arrive as
//! messages and are resolved here, trees grow, projectiles fly. Roamer spawning
//! and wandering only runs on the authority, peers learn about roamers from
//! snapshots. Time is game time in seconds.

use crate::protocol::{ActionKind, ParticipantAction};
use crate::world::{
    Actor, CellKind, ParticipantId, Projectile, Roamer, RoamerKind, WorldModel,
    USE_CURRENT_LOCATION,
};
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

pub const TREE_GROWTH_TIME: f32 = 10.0;
pub const PROJECTILE_SPEED: f32 = 8.0;
pub const PROJECTILE_LIFETIME: f32 = 2.0;
pub const CHOP_REWARD: i32 = 10;
pub const ROAMER_REWARD: i32 = 5;
pub const ELIMINATION_PENALTY: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnknownActor,
    ActorDown,
    OutOfReach,
    OutOfBounds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Planted { x: i32, y: i32 },
    Chopped { x: i32, y: i32 },
    Fired,
    /// Valid target, but nothing there to act on.
    NoEffect,
    Rejected(Rejection),
}

/// Limits for authority-side roamer spawning.
#[derive(Debug, Clone, Copy)]
pub struct RoamerLimits {
    pub cap: usize,
    pub spawn_chance: f64,
}

impl Default for RoamerLimits {
    fn default() -> Self {
        Self {
            cap: 15,
            spawn_chance: 0.02,
        }
    }
}

/// Creates the actor if it is missing, then places it on a random corner.
pub fn spawn_actor<'a, R: Rng>(
    world: &'a mut WorldModel,
    id: ParticipantId,
    rng: &mut R,
) -> &'a Actor {
    world
        .actors
        .entry(id)
        .or_insert_with(|| Actor::new(id, 0, 0));
    respawn(world, id, rng);
    &world.actors[&id]
}

/// Moves an existing actor to a random corner and revives it.
pub fn respawn<R: Rng>(world: &mut WorldModel, id: ParticipantId, rng: &mut R) {
    let corners = world.grid.corners();
    let (x, y) = corners[rng.gen_range(0..corners.len())];

    if let Some(actor) = world.actors.get_mut(&id) {
        actor.x = x;
        actor.y = y;
        actor.alive = true;
        if let Some(cell) = world.grid.cell_mut(x, y) {
            cell.clear();
        }
    }
}

/// Resolves a discrete action against the world.
///
/// Rate limiting is the originator's job; this runs unconditionally for any
/// known, alive actor.
pub fn apply_action(world: &mut WorldModel, action: &ParticipantAction, now: f32) -> ActionOutcome {
    let Some(actor) = world.actors.get(&action.actor_id) else {
        return ActionOutcome::Rejected(Rejection::UnknownActor);
    };
    if !actor.alive {
        return ActionOutcome::Rejected(Rejection::ActorDown);
    }

    let (ax, ay) = (actor.x, actor.y);
    let target_x = if action.target_x == USE_CURRENT_LOCATION {
        ax
    } else {
        action.target_x
    };
    let target_y = if action.target_y == USE_CURRENT_LOCATION {
        ay
    } else {
        action.target_y
    };

    match action.action_kind {
        ActionKind::Plant => {
            if let Err(rejection) = check_reach(world, (ax, ay), (target_x, target_y)) {
                return ActionOutcome::Rejected(rejection);
            }
            match world.grid.cell_mut(target_x, target_y) {
                Some(cell) if matches!(cell.kind, CellKind::Empty | CellKind::Shrubbery) => {
                    cell.kind = CellKind::TreeSeedling;
                    cell.owner = Some(action.actor_id);
                    cell.growth = 0.0;
                    cell.last_growth = now;
                    ActionOutcome::Planted {
                        x: target_x,
                        y: target_y,
                    }
                }
                _ => ActionOutcome::NoEffect,
            }
        }
        ActionKind::Chop => {
            if let Err(rejection) = check_reach(world, (ax, ay), (target_x, target_y)) {
                return ActionOutcome::Rejected(rejection);
            }
            match world.grid.cell_mut(target_x, target_y) {
                Some(cell) if cell.kind == CellKind::TreeMature => {
                    cell.clear();
                    if let Some(actor) = world.actors.get_mut(&action.actor_id) {
                        actor.score += CHOP_REWARD;
                    }
                    ActionOutcome::Chopped {
                        x: target_x,
                        y: target_y,
                    }
                }
                _ => ActionOutcome::NoEffect,
            }
        }
        ActionKind::Shoot => {
            let (mut dir_x, dir_y) = (actor.facing_x, actor.facing_y);
            if dir_x == 0 && dir_y == 0 {
                dir_x = 1;
            }
            world.projectiles.push(Projectile {
                x: ax,
                y: ay,
                dir_x,
                dir_y,
                owner: action.actor_id,
                fired_at: now,
                active: true,
            });
            ActionOutcome::Fired
        }
    }
}

// Targets must be the actor's own cell or one of its eight neighbours.
fn check_reach(world: &WorldModel, from: (i32, i32), to: (i32, i32)) -> Result<(), Rejection> {
    if (to.0 - from.0).abs() > 1 || (to.1 - from.1).abs() > 1 {
        return Err(Rejection::OutOfReach);
    }
    if !world.grid.contains(to.0, to.1) {
        return Err(Rejection::OutOfBounds);
    }
    Ok(())
}

/// One simulation step.
pub fn advance<R: Rng>(
    world: &mut WorldModel,
    now: f32,
    is_authority: bool,
    limits: &RoamerLimits,
    rng: &mut R,
) {
    grow_trees(world, now);
    advance_projectiles(world, now, rng);
    if is_authority {
        spawn_roamers(world, now, limits, rng);
        wander_roamers(world, now, rng);
    }
}

pub fn grow_trees(world: &mut WorldModel, now: f32) {
    for cell in &mut world.grid.cells {
        if !matches!(cell.kind, CellKind::TreeSeedling | CellKind::TreeYoung) {
            continue;
        }
        if now - cell.last_growth <= 1.0 {
            continue;
        }

        cell.growth = (cell.growth + 1.0 / TREE_GROWTH_TIME).min(1.0);
        cell.last_growth = now;

        if cell.kind == CellKind::TreeSeedling && cell.growth >= 0.5 {
            cell.kind = CellKind::TreeYoung;
        } else if cell.kind == CellKind::TreeYoung && cell.growth >= 1.0 {
            cell.kind = CellKind::TreeMature;
        }
    }
}

pub fn advance_projectiles<R: Rng>(world: &mut WorldModel, now: f32, rng: &mut R) {
    let in_flight = std::mem::take(&mut world.projectiles);
    let mut survivors = Vec::with_capacity(in_flight.len());

    for projectile in in_flight {
        if !projectile.active || now - projectile.fired_at > PROJECTILE_LIFETIME {
            continue;
        }

        let distance = ((now - projectile.fired_at) * PROJECTILE_SPEED) as i32;
        let x = projectile.x + projectile.dir_x * distance;
        let y = projectile.y + projectile.dir_y * distance;

        if !world.grid.contains(x, y) {
            continue;
        }

        if let Some(index) = world.roamers.iter().position(|r| r.x == x && r.y == y) {
            let roamer = world.roamers.remove(index);
            debug!("Projectile from {} hit roamer {}", projectile.owner, roamer.id);
            if let Some(shooter) = world.actors.get_mut(&projectile.owner) {
                shooter.score += ROAMER_REWARD;
            }
            continue;
        }

        let victim = world
            .actors
            .values()
            .find(|a| a.id != projectile.owner && a.alive && a.x == x && a.y == y)
            .map(|a| a.id);
        if let Some(victim) = victim {
            debug!("Projectile from {} eliminated actor {}", projectile.owner, victim);
            if let Some(actor) = world.actors.get_mut(&victim) {
                actor.alive = false;
            }
            if let Some(shooter) = world.actors.get_mut(&projectile.owner) {
                shooter.score -= ELIMINATION_PENALTY;
            }
            if let Some(cell) = world.grid.cell_mut(x, y) {
                cell.kind = CellKind::Grave;
                cell.owner = Some(victim);
                cell.growth = 0.0;
            }
            respawn(world, victim, rng);
            continue;
        }

        let blocked = world
            .grid
            .cell(x, y)
            .is_some_and(|c| matches!(c.kind, CellKind::TreeYoung | CellKind::TreeMature));
        if !blocked {
            survivors.push(projectile);
        }
    }

    world.projectiles = survivors;
}

pub fn spawn_roamers<R: Rng>(world: &mut WorldModel, now: f32, limits: &RoamerLimits, rng: &mut R) {
    if world.roamers.len() >= limits.cap || world.grid.cells.is_empty() {
        return;
    }
    if !rng.gen_bool(limits.spawn_chance.clamp(0.0, 1.0)) {
        return;
    }

    let x = rng.gen_range(0..world.grid.width);
    let y = rng.gen_range(0..world.grid.height);
    if world.grid.cell(x, y).map(|c| c.kind) != Some(CellKind::Empty) {
        return;
    }

    let kind = if rng.gen_bool(0.5) {
        RoamerKind::Rabbit
    } else {
        RoamerKind::Deer
    };
    let mut roamer = Roamer::new(world.next_roamer_id, kind, x, y);
    roamer.move_delay = 0.5 + rng.gen_range(0.0..1.0);
    roamer.last_move = now;
    world.next_roamer_id += 1;
    world.roamers.push(roamer);
}

pub fn wander_roamers<R: Rng>(world: &mut WorldModel, now: f32, rng: &mut R) {
    let mut moves = [(0, 1), (0, -1), (1, 0), (-1, 0)];

    for roamer in &mut world.roamers {
        if now - roamer.last_move <= roamer.move_delay {
            continue;
        }
        roamer.last_move = now;
        moves.shuffle(rng);

        for (dx, dy) in moves {
            let (x, y) = (roamer.x + dx, roamer.y + dy);
            let Some(cell) = world.grid.cell_mut(x, y) else {
                continue;
            };
            let edible = matches!(cell.kind, CellKind::Shrubbery | CellKind::TreeSeedling)
                || (cell.kind == CellKind::TreeYoung && cell.growth < 0.5);
            if edible {
                cell.clear();
            } else if cell.kind != CellKind::Empty {
                continue;
            }
            roamer.x = x;
            roamer.y = y;
            break;
        }
    }
}
