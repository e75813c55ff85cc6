//! Outbound sync scheduling.
//!
//! Actor updates go out on change only. Full snapshots go out on a fixed
//! cadence from the authority. Nothing is marked as sent until the transport
//! accepted it, so a failed send is simply retried on the next tick.

use shared::Actor;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct SyncScheduler {
    last_sent: Option<Actor>,
    snapshot_interval: Duration,
    last_snapshot: Option<Instant>,
}

impl SyncScheduler {
    pub fn new(snapshot_interval: Duration) -> Self {
        Self {
            last_sent: None,
            snapshot_interval,
            last_snapshot: None,
        }
    }

    /// Returns the actor to emit if any observable field changed since the
    /// last successful emission. The first call always emits.
    pub fn pending_actor_update(&self, actor: &Actor) -> Option<Actor> {
        match &self.last_sent {
            Some(last) if last.id == actor.id && !last.observably_differs(actor) => None,
            _ => Some(actor.clone()),
        }
    }

    pub fn mark_actor_sent(&mut self, actor: Actor) {
        self.last_sent = Some(actor);
    }

    /// Forces the next [`Self::pending_actor_update`] to emit.
    pub fn invalidate_actor(&mut self) {
        self.last_sent = None;
    }

    pub fn snapshot_due(&self, now: Instant) -> bool {
        match self.last_snapshot {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.snapshot_interval,
        }
    }

    pub fn mark_snapshot_sent(&mut self, now: Instant) {
        self.last_snapshot = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
        self.last_snapshot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Mode;

    #[test]
    fn test_first_emission_and_change_detection() {
        let mut scheduler = SyncScheduler::new(Duration::from_millis(500));
        let mut actor = Actor::new(2, 0, 0);

        let first = scheduler.pending_actor_update(&actor).unwrap();
        scheduler.mark_actor_sent(first);
        assert!(scheduler.pending_actor_update(&actor).is_none());

        actor.display_name = "late name".to_string();
        assert!(scheduler.pending_actor_update(&actor).is_none());

        let changes: [fn(&mut Actor); 5] = [
            |a| a.x += 1,
            |a| a.mode = Mode::Chop,
            |a| a.score += 10,
            |a| a.alive = false,
            |a| a.facing_y = 1,
        ];
        for change in changes {
            change(&mut actor);
            let update = scheduler.pending_actor_update(&actor).unwrap();
            scheduler.mark_actor_sent(update);
            assert!(scheduler.pending_actor_update(&actor).is_none());
        }
    }

    #[test]
    fn test_unsent_change_stays_pending() {
        let mut scheduler = SyncScheduler::new(Duration::from_millis(500));
        let mut actor = Actor::new(2, 0, 0);
        scheduler.mark_actor_sent(actor.clone());

        actor.y = 5;
        // Send failed, nothing marked.
        assert!(scheduler.pending_actor_update(&actor).is_some());
        assert!(scheduler.pending_actor_update(&actor).is_some());
    }

    #[test]
    fn test_snapshot_cadence() {
        let mut scheduler = SyncScheduler::new(Duration::from_millis(500));
        let start = Instant::now();
        assert!(scheduler.snapshot_due(start));

        scheduler.mark_snapshot_sent(start);
        assert!(!scheduler.snapshot_due(start + Duration::from_millis(499)));
        assert!(scheduler.snapshot_due(start + Duration::from_millis(500)));

        scheduler.reset();
        assert!(scheduler.snapshot_due(start));
    }
}
