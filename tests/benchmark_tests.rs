//! Performance benchmarks for the sync hot paths

use peer::dispatcher::{self, Disposition, Handler};
use peer::reconcile::{apply_actor_update, apply_full_snapshot};
use peer::Role;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::rules::{self, RoamerLimits};
use shared::{codec, initial_world, Actor, Message, ParticipantAction, ParticipantId, WorldModel, WorldSnapshot};
use std::time::Instant;

fn populated_world() -> WorldModel {
    let mut rng = StdRng::seed_from_u64(11);
    let mut world = initial_world(30, 20, 60, &mut rng);
    for id in 0..8 {
        rules::spawn_actor(&mut world, id, &mut rng);
    }
    let limits = RoamerLimits {
        cap: 15,
        spawn_chance: 1.0,
    };
    for _ in 0..15 {
        rules::spawn_roamers(&mut world, 0.0, &limits, &mut rng);
    }
    world
}

/// Benchmarks encoding and decoding a full snapshot
#[test]
fn benchmark_snapshot_codec() {
    let message = Message::FullSnapshot(populated_world().snapshot());

    let iterations = 200;
    let start = Instant::now();

    for _ in 0..iterations {
        let payload = codec::encode(&message).unwrap();
        let _ = codec::decode(&payload).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Snapshot codec: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Well under a snapshot interval per round trip
    assert!(duration.as_millis() < 10_000);
}

/// Benchmarks merging a full snapshot into a participant's world
#[test]
fn benchmark_snapshot_reconcile() {
    let snapshot = populated_world().snapshot();
    let mut local = populated_world();

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        apply_full_snapshot(&mut local, snapshot.clone(), Role::Participant, Some(3), 0.0);
    }

    let duration = start.elapsed();
    println!(
        "Snapshot reconcile: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(local.actors.len(), 8);
    assert!(duration.as_millis() < 5_000);
}

/// Benchmarks a burst of actor updates
#[test]
fn benchmark_actor_updates() {
    let mut world = WorldModel::new(30, 20);

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let id = (i % 16) as ParticipantId;
        let update = Actor::new(id, (i % 30) as i32, (i % 20) as i32);
        apply_actor_update(&mut world, update, Some(0));
    }

    let duration = start.elapsed();
    println!(
        "Actor updates: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(world.actors.len(), 15);
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks authority simulation steps
#[test]
fn benchmark_world_advance() {
    let mut world = populated_world();
    let mut rng = StdRng::seed_from_u64(5);
    let limits = RoamerLimits::default();

    let iterations = 1_000;
    let start = Instant::now();

    for i in 0..iterations {
        let now = i as f32 / 30.0;
        rules::advance(&mut world, now, true, &limits, &mut rng);
    }

    let duration = start.elapsed();
    println!(
        "World advance: {} ticks in {:?} ({:.2} μs/tick)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(world.roamers.len() <= limits.cap);
    assert!(duration.as_millis() < 5_000);
}

struct Sink {
    handled: usize,
}

impl Handler for Sink {
    fn assign_participant_id(&mut self, _id: ParticipantId) {
        self.handled += 1;
    }
    fn participant_joined(&mut self, _id: ParticipantId) {
        self.handled += 1;
    }
    fn participant_left(&mut self, _id: ParticipantId) {
        self.handled += 1;
    }
    fn actor_update(&mut self, _actor: Actor) {
        self.handled += 1;
    }
    fn participant_action(&mut self, _action: ParticipantAction) {
        self.handled += 1;
    }
    fn full_snapshot(&mut self, _snapshot: WorldSnapshot) {
        self.handled += 1;
    }
}

/// Benchmarks decoding and routing small messages
#[test]
fn benchmark_dispatch() {
    let payloads = [
        codec::encode(&Message::ActorUpdate(Actor::new(4, 3, 3))).unwrap(),
        codec::encode(&Message::ParticipantAction(ParticipantAction::new(
            4,
            3,
            4,
            shared::ActionKind::Plant,
        )))
        .unwrap(),
        r#"{"type":"PING"}"#.to_string(),
    ];
    let mut sink = Sink { handled: 0 };

    let iterations = 30_000;
    let start = Instant::now();
    let mut rebroadcasts = 0;

    for i in 0..iterations {
        if dispatcher::dispatch(Role::Authority, &payloads[i % 3], &mut sink) == Disposition::Rebroadcast {
            rebroadcasts += 1;
        }
    }

    let duration = start.elapsed();
    println!(
        "Dispatch: {} messages in {:?} ({:.2} ns/msg)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(sink.handled, 20_000);
    assert_eq!(rebroadcasts, 10_000);
    assert!(duration.as_millis() < 5_000);
}
