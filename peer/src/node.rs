//! A single peer of a session.
//!
//! [`Node`] owns the world model, the session, the sync scheduler and the
//! transport, and is driven by calling [`Node::tick`] once per frame. Transport
//! tasks never touch the world: they push events into the inbound queue and
//! the tick drains it, so reconciliation always runs on the caller's thread of
//! control and a half-applied snapshot can never be observed.

use crate::config::NodeConfig;
use crate::dispatcher::{self, Disposition, Handler};
use crate::reconcile;
use crate::scheduler::SyncScheduler;
use crate::session::{Role, Session, SessionError};
use crate::transport::{
    InboundReceiver, InboundSender, PeerId, Transport, TransportEvent, AUTHORITY_LINK,
};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::codec;
use shared::rules::{self, ActionOutcome};
use shared::{
    Actor, Message, ParticipantAction, ParticipantId, WorldModel, WorldSnapshot, AUTHORITY_ID,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};

/// Read-only view of the most recently published world.
///
/// Handed to status and telemetry consumers; it can be cloned freely and moved
/// to other tasks.
#[derive(Clone)]
pub struct StateHandle {
    rx: watch::Receiver<Arc<WorldModel>>,
}

impl StateHandle {
    pub fn latest(&self) -> Arc<WorldModel> {
        Arc::clone(&self.rx.borrow())
    }

    /// Waits for the next publication. Returns false once the node is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

pub struct Node {
    config: NodeConfig,
    session: Session,
    transport: Option<Box<dyn Transport>>,
    inbound_tx: InboundSender,
    inbound_rx: InboundReceiver,
    world: WorldModel,
    scheduler: SyncScheduler,
    published: watch::Sender<Arc<WorldModel>>,
    rng: StdRng,
    started: Instant,
    last_local_action: Option<Instant>,
    /// Set once the local actor exists for the current session.
    local_ready: bool,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (published, _) = watch::channel(Arc::new(WorldModel::default()));
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            scheduler: SyncScheduler::new(config.snapshot_interval),
            config,
            session: Session::new(),
            transport: None,
            inbound_tx,
            inbound_rx,
            world: WorldModel::default(),
            published,
            rng,
            started: Instant::now(),
            last_local_action: None,
            local_ready: false,
        }
    }

    /// Queue a transport must deliver into.
    pub fn inbound_sender(&self) -> InboundSender {
        self.inbound_tx.clone()
    }

    /// Opens a new session with this node as its authority.
    pub fn create_session(
        &mut self,
        name: &str,
        transport: impl Transport + 'static,
    ) -> Result<String, SessionError> {
        let session_id = self.session.create(name, &mut self.rng)?;

        self.world = shared::initial_world(
            self.config.grid_width,
            self.config.grid_height,
            self.config.shrubbery,
            &mut self.rng,
        );
        self.transport = Some(Box::new(transport));
        self.scheduler.reset();
        self.local_ready = false;
        self.ensure_local_actor();
        self.publish();

        Ok(session_id)
    }

    /// Joins an existing session. The node stays idle until the authority
    /// assigns it an id.
    pub fn join_session(
        &mut self,
        session_id: &str,
        transport: impl Transport + 'static,
    ) -> Result<(), SessionError> {
        self.session.join(session_id)?;

        self.world = WorldModel::default();
        self.transport = Some(Box::new(transport));
        self.scheduler.reset();
        self.local_ready = false;
        self.publish();
        Ok(())
    }

    /// Leaves the session. Safe to call repeatedly.
    ///
    /// The transport is shut down and awaited first, then anything still
    /// queued is discarded. The last known world stays readable.
    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }

        let mut discarded = 0;
        while self.inbound_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {} queued inbound events", discarded);
        }

        self.session.disconnect();
        self.scheduler.reset();
        self.last_local_action = None;
        self.local_ready = false;
        self.publish();
    }

    /// One frame: drain inbound, simulate, emit, publish.
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.drain_inbound();

        if self.session.is_connected() {
            let limits = self.config.roamer_limits();
            let clock = self.clock();
            rules::advance(
                &mut self.world,
                clock,
                self.session.is_authority(),
                &limits,
                &mut self.rng,
            );
            self.emit(now);
        }

        self.publish();
    }

    fn drain_inbound(&mut self) {
        while let Ok(event) = self.inbound_rx.try_recv() {
            match event {
                TransportEvent::Connected { peer } => self.link_up(peer),
                TransportEvent::Disconnected { peer } => self.link_down(peer),
                TransportEvent::Payload { from, payload } => {
                    let role = self.session.role();
                    if dispatcher::dispatch(role, &payload, self) == Disposition::Rebroadcast {
                        self.forward(&payload, from);
                    }
                }
            }
        }
    }

    fn link_up(&mut self, peer: PeerId) {
        match self.session.role() {
            Role::Authority => {
                let id = self.session.admit(peer);
                rules::spawn_actor(&mut self.world, id, &mut self.rng);

                // Assignment first, so the newcomer knows which roster entry
                // is its own before the snapshot lands.
                self.send_to(peer, &Message::assign(id));
                self.broadcast(&Message::joined(id), Some(peer));
                let snapshot = Message::FullSnapshot(self.world.snapshot());
                if self.broadcast(&snapshot, None) {
                    self.scheduler.mark_snapshot_sent(Instant::now());
                }
            }
            Role::Participant if peer == AUTHORITY_LINK => {
                // A link that comes back is a new admission on the authority
                // side, with a new id and a freshly placed actor.
                if let Some(previous) = self.session.reset_assignment() {
                    info!("Relinked to authority, dropping participant id {}", previous);
                    self.world = WorldModel::default();
                    self.local_ready = false;
                    self.scheduler.reset();
                    self.last_local_action = None;
                } else {
                    info!("Linked to authority");
                }
            }
            role => debug!("Ignoring link {} in role {:?}", peer, role),
        }
    }

    fn link_down(&mut self, peer: PeerId) {
        match self.session.role() {
            Role::Authority => {
                if let Some(id) = self.session.release(peer) {
                    self.world.actors.remove(&id);
                    self.broadcast(&Message::left(id), None);
                }
            }
            Role::Participant if peer == AUTHORITY_LINK => {
                warn!("Lost link to authority; waiting for an explicit disconnect");
            }
            _ => {}
        }
    }

    /// Passes an action on, byte for byte, to everyone but its sender.
    fn forward(&self, payload: &str, from: PeerId) {
        if let Some(transport) = &self.transport {
            if let Err(e) = transport.broadcast(payload, Some(from)) {
                warn!("Failed to forward action from link {}: {}", from, e);
            }
        }
    }

    fn emit(&mut self, now: Instant) {
        self.flush_actor_update();

        if self.session.is_authority() && self.scheduler.snapshot_due(now) {
            let snapshot = Message::FullSnapshot(self.world.snapshot());
            if self.broadcast(&snapshot, None) {
                self.scheduler.mark_snapshot_sent(now);
            }
        }
    }

    fn flush_actor_update(&mut self) {
        let Some(actor) = self.local_actor() else {
            return;
        };
        let Some(update) = self.scheduler.pending_actor_update(actor) else {
            return;
        };

        if self.broadcast(&Message::ActorUpdate(update.clone()), None) {
            self.scheduler.mark_actor_sent(update);
        }
    }

    fn broadcast(&self, message: &Message, exclude: Option<PeerId>) -> bool {
        let Some(transport) = &self.transport else {
            return false;
        };
        let payload = match codec::encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {}: {}", message.kind(), e);
                return false;
            }
        };

        match transport.broadcast(&payload, exclude) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to broadcast {}: {}", message.kind(), e);
                false
            }
        }
    }

    fn send_to(&self, peer: PeerId, message: &Message) -> bool {
        let Some(transport) = &self.transport else {
            return false;
        };
        let payload = match codec::encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode {}: {}", message.kind(), e);
                return false;
            }
        };

        match transport.send_to(peer, &payload) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {} to link {}: {}", message.kind(), peer, e);
                false
            }
        }
    }

    /// Creates the local actor once there is an id and a grid to stand on.
    ///
    /// An actor the authority already placed for us is adopted as-is.
    fn ensure_local_actor(&mut self) {
        if self.local_ready {
            return;
        }
        let Some(id) = self.session.local_id() else {
            return;
        };
        if self.world.grid.cells.is_empty() {
            debug!("Holding local actor {} until a world arrives", id);
            return;
        }

        if !self.world.actors.contains_key(&id) {
            rules::spawn_actor(&mut self.world, id, &mut self.rng);
        }
        if let Some(actor) = self.world.actor_mut(id) {
            if !self.config.display_name.is_empty() {
                actor.display_name = self.config.display_name.clone();
            }
            info!("Local actor {} at ({}, {})", id, actor.x, actor.y);
        }
        self.session.set_display_name(id, &self.config.display_name);
        self.scheduler.invalidate_actor();
        self.local_ready = true;
    }

    /// Steps the local actor by one cell. Returns true if it moved.
    pub fn move_local(&mut self, dx: i32, dy: i32) -> bool {
        let (dx, dy) = (dx.signum(), dy.signum());
        if dx == 0 && dy == 0 {
            return false;
        }
        let Some(id) = self.session.local_id().filter(|_| self.local_ready) else {
            return false;
        };

        let grid = &self.world.grid;
        let Some(actor) = self.world.actors.get_mut(&id) else {
            return false;
        };
        if !actor.alive || !grid.contains(actor.x + dx, actor.y + dy) {
            return false;
        }

        actor.x += dx;
        actor.y += dy;
        actor.facing_x = dx;
        actor.facing_y = dy;
        true
    }

    pub fn cycle_mode(&mut self) {
        if let Some(actor) = self.local_actor_mut() {
            actor.mode = actor.mode.next();
        }
    }

    /// Applies the local actor's current mode where it stands and tells the
    /// session about it.
    ///
    /// Returns `None` when there is no local actor or the action cooldown has
    /// not elapsed.
    pub fn perform_action(&mut self) -> Option<ActionOutcome> {
        let now = Instant::now();
        if let Some(last) = self.last_local_action {
            if now.saturating_duration_since(last) < self.config.action_cooldown {
                return None;
            }
        }

        let actor = self.local_actor()?;
        let (id, x, y) = (actor.id, actor.x, actor.y);
        let kind = actor.mode.into();

        let clock = self.clock();
        let outcome = rules::apply_action(&mut self.world, &ParticipantAction::in_place(id, kind), clock);
        self.last_local_action = Some(now);

        if !matches!(outcome, ActionOutcome::Rejected(_)) {
            // Recipients check reach against where they think we stand.
            self.flush_actor_update();
            self.broadcast(
                &Message::ParticipantAction(ParticipantAction::new(id, x, y, kind)),
                None,
            );
        }
        Some(outcome)
    }

    pub fn set_display_name(&mut self, name: &str) {
        self.config.display_name = name.to_string();
        if let Some(id) = self.session.local_id() {
            self.session.set_display_name(id, name);
        }
        if let Some(actor) = self.local_actor_mut() {
            actor.display_name = name.to_string();
            self.scheduler.invalidate_actor();
        }
    }

    fn publish(&self) {
        self.published.send_replace(Arc::new(self.world.clone()));
    }

    pub fn state_handle(&self) -> StateHandle {
        StateHandle {
            rx: self.published.subscribe(),
        }
    }

    /// Game time in seconds since the node was created.
    fn clock(&self) -> f32 {
        self.started.elapsed().as_secs_f32()
    }

    pub fn world(&self) -> &WorldModel {
        &self.world
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn role(&self) -> Role {
        self.session.role()
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.session.local_id()
    }

    pub fn local_actor(&self) -> Option<&Actor> {
        if !self.local_ready {
            return None;
        }
        self.session.local_id().and_then(|id| self.world.actor(id))
    }

    fn local_actor_mut(&mut self) -> Option<&mut Actor> {
        if !self.local_ready {
            return None;
        }
        let id = self.session.local_id()?;
        self.world.actor_mut(id)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }
}

impl Handler for Node {
    fn assign_participant_id(&mut self, id: ParticipantId) {
        if self.session.accept_assignment(id) {
            self.ensure_local_actor();
        }
    }

    fn participant_joined(&mut self, id: ParticipantId) {
        if self.session.is_authority() || Some(id) == self.session.local_id() {
            return;
        }
        if self.session.add_participant(id) {
            info!("Participant {} joined", id);
        }
    }

    fn participant_left(&mut self, id: ParticipantId) {
        if self.session.is_authority() || Some(id) == self.session.local_id() {
            return;
        }
        self.session.remove_participant(id);
        if self.world.actors.remove(&id).is_some() {
            info!("Participant {} left", id);
        }
    }

    fn actor_update(&mut self, actor: Actor) {
        let id = actor.id;
        if self.session.is_authority() && self.session.participant(id).is_none() {
            debug!("Ignoring update for participant {} outside the roster", id);
            return;
        }
        let name = actor.display_name.clone();
        if reconcile::apply_actor_update(&mut self.world, actor, self.session.local_id()) {
            if !self.session.is_authority() {
                self.session.add_participant(id);
            }
            self.session.set_display_name(id, &name);
        }
    }

    fn participant_action(&mut self, action: ParticipantAction) {
        let clock = self.clock();
        match rules::apply_action(&mut self.world, &action, clock) {
            ActionOutcome::Rejected(reason) => {
                debug!("Action from {} rejected: {:?}", action.actor_id, reason)
            }
            outcome => debug!("Action from {}: {:?}", action.actor_id, outcome),
        }
    }

    fn full_snapshot(&mut self, snapshot: WorldSnapshot) {
        let clock = self.clock();
        let merged = reconcile::apply_full_snapshot(
            &mut self.world,
            snapshot,
            self.session.role(),
            self.session.local_id(),
            clock,
        );
        if !merged {
            return;
        }

        for actor in self.world.actors.values() {
            self.session.add_participant(actor.id);
            self.session.set_display_name(actor.id, &actor.display_name);
        }
        self.ensure_local_actor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackHub;
    use shared::rules::Rejection;
    use shared::Mode;
    use std::time::Duration;

    fn config(name: &str) -> NodeConfig {
        NodeConfig {
            seed: Some(42),
            action_cooldown: Duration::ZERO,
            ..NodeConfig::named(name)
        }
    }

    fn hosted(hub: &LoopbackHub) -> Node {
        let mut node = Node::new(config("host"));
        let transport = hub.host(node.inbound_sender()).unwrap();
        node.create_session("Room", transport).unwrap();
        node
    }

    fn joined(hub: &LoopbackHub, name: &str) -> Node {
        let mut node = Node::new(config(name));
        let transport = hub.connect(node.inbound_sender()).unwrap();
        node.join_session("Room_0000", transport).unwrap();
        node
    }

    #[tokio::test]
    async fn test_authority_spawns_itself_on_a_corner() {
        let hub = LoopbackHub::new();
        let node = hosted(&hub);

        assert_eq!(node.role(), Role::Authority);
        assert_eq!(node.local_id(), Some(0));
        let actor = node.local_actor().unwrap();
        assert!(node.world().grid.corners().contains(&(actor.x, actor.y)));
        assert_eq!(actor.display_name, "host");
        assert!(node.session().session_id().unwrap().starts_with("Room_"));
    }

    #[tokio::test]
    async fn test_participant_idle_until_assigned() {
        let hub = LoopbackHub::new();
        let _host = hosted(&hub);
        let mut node = joined(&hub, "guest");

        assert!(node.is_connected());
        assert_eq!(node.local_id(), None);
        assert!(!node.move_local(1, 0));
        assert!(node.perform_action().is_none());
        node.cycle_mode();
        assert!(node.world().actors.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_assignment_does_not_respawn() {
        let hub = LoopbackHub::new();
        let _host = hosted(&hub);
        let mut node = joined(&hub, "guest");

        node.assign_participant_id(5);
        assert_eq!(node.local_id(), Some(5));
        assert!(node.local_actor().is_none());

        // The actor appears with the first world.
        node.full_snapshot(WorldModel::new(10, 10).snapshot());
        let first = node.local_actor().unwrap().clone();
        assert_eq!(first.display_name, "guest");
        assert!(node.world().grid.corners().contains(&(first.x, first.y)));

        let step = if first.x == 0 { 1 } else { -1 };
        assert!(node.move_local(step, 0));
        let moved = node.local_actor().unwrap().clone();

        node.assign_participant_id(5);
        node.assign_participant_id(6);
        assert_eq!(node.local_id(), Some(5));
        assert_eq!(node.local_actor().unwrap(), &moved);
        assert_eq!(node.world().actors.len(), 1);
    }

    #[tokio::test]
    async fn test_movement_stays_on_grid_and_sets_facing() {
        let hub = LoopbackHub::new();
        let mut node = hosted(&hub);
        let start = node.local_actor().unwrap().clone();

        // From a corner exactly two of the four directions stay on the grid.
        let mut moves = 0;
        for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            if node.move_local(dx, dy) {
                moves += 1;
                assert!(node.move_local(-dx, -dy));
            }
        }
        assert_eq!(moves, 2);

        let actor = node.local_actor().unwrap();
        assert_eq!((actor.x, actor.y), (start.x, start.y));
        assert!(actor.facing_x != 0 || actor.facing_y != 0);
    }

    #[tokio::test]
    async fn test_local_action_and_throttle() {
        let hub = LoopbackHub::new();
        let mut node = Node::new(NodeConfig {
            seed: Some(1),
            action_cooldown: Duration::from_secs(60),
            ..NodeConfig::named("host")
        });
        let transport = hub.host(node.inbound_sender()).unwrap();
        node.create_session("Room", transport).unwrap();

        let (x, y) = {
            let actor = node.local_actor().unwrap();
            (actor.x, actor.y)
        };
        assert_eq!(node.perform_action(), Some(ActionOutcome::Planted { x, y }));
        assert_eq!(node.perform_action(), None);
    }

    #[tokio::test]
    async fn test_mode_cycle_drives_action_kind() {
        let hub = LoopbackHub::new();
        let mut node = hosted(&hub);

        node.cycle_mode();
        assert_eq!(node.local_actor().unwrap().mode, Mode::Shoot);
        assert_eq!(node.perform_action(), Some(ActionOutcome::Fired));
        assert_eq!(node.world().projectiles.len(), 1);

        node.cycle_mode();
        assert_eq!(node.perform_action(), Some(ActionOutcome::NoEffect));
    }

    #[tokio::test]
    async fn test_remote_chop_out_of_reach() {
        let hub = LoopbackHub::new();
        let mut node = hosted(&hub);
        let (x, y) = {
            let actor = node.local_actor().unwrap();
            (actor.x, actor.y)
        };
        let target_x = if x == 0 { 2 } else { x - 2 };
        node.world.grid.cell_mut(target_x, y).unwrap().kind = shared::CellKind::TreeMature;
        let before = node.world().clone();

        node.participant_action(ParticipantAction::new(0, target_x, y, shared::ActionKind::Chop));
        assert_eq!(node.world(), &before);

        let outcome = rules::apply_action(
            &mut node.world,
            &ParticipantAction::new(0, target_x, y, shared::ActionKind::Chop),
            0.0,
        );
        assert_eq!(outcome, ActionOutcome::Rejected(Rejection::OutOfReach));
    }

    #[tokio::test]
    async fn test_relinked_participant_takes_new_id() {
        let hub = LoopbackHub::new();
        let mut host = hosted(&hub);
        let mut guest = joined(&hub, "guest");
        host.tick();
        guest.tick();
        host.tick();
        assert_eq!(guest.local_id(), Some(1));
        let link = host.session().participant(1).and_then(|p| p.link).unwrap();

        // Both ends time the link out, then it comes back.
        host.link_down(link);
        let guest_events = guest.inbound_sender();
        guest_events
            .send(TransportEvent::Disconnected { peer: AUTHORITY_LINK })
            .unwrap();
        guest_events
            .send(TransportEvent::Connected { peer: AUTHORITY_LINK })
            .unwrap();
        host.link_up(link);

        guest.tick();
        host.tick();

        assert_eq!(guest.local_id(), Some(2));
        let me = guest.local_actor().unwrap();
        let on_host = host.world().actor(2).unwrap();
        assert_eq!((me.x, me.y), (on_host.x, on_host.y));
        assert_eq!(on_host.display_name, "guest");

        let actors: Vec<_> = host.world().actors.keys().copied().collect();
        let roster: Vec<_> = host.session().roster().map(|p| p.id).collect();
        assert_eq!(actors, vec![0, 2]);
        assert_eq!(roster, vec![0, 2]);
        let guest_actors: Vec<_> = guest.world().actors.keys().copied().collect();
        assert_eq!(guest_actors, vec![0, 2]);

        let step = if me.x == 0 { 1 } else { -1 };
        assert!(guest.move_local(step, 0));
        guest.tick();
        host.tick();
        let actors: Vec<_> = host.world().actors.keys().copied().collect();
        assert_eq!(actors, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_authority_ignores_updates_outside_roster() {
        let hub = LoopbackHub::new();
        let mut host = hosted(&hub);
        let stale = codec::encode(&Message::ActorUpdate(Actor::new(1, 3, 3))).unwrap();
        host.inbound_sender()
            .send(TransportEvent::Payload {
                from: 1,
                payload: stale,
            })
            .unwrap();
        host.tick();
        assert!(host.world().actor(1).is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_drains() {
        let hub = LoopbackHub::new();
        let mut node = hosted(&hub);
        node.inbound_sender()
            .send(TransportEvent::Payload {
                from: 3,
                payload: "{}".to_string(),
            })
            .unwrap();

        node.disconnect().await;
        assert_eq!(node.role(), Role::None);
        assert!(!node.is_connected());
        assert!(node.local_id().is_none());
        assert!(node.session().session_id().is_none());
        assert!(node.inbound_rx.try_recv().is_err());

        node.disconnect().await;
        assert_eq!(node.role(), Role::None);

        // The hub is free for a new authority.
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(hub.host(tx).is_ok());
    }

    #[tokio::test]
    async fn test_state_handle_sees_published_world() {
        let hub = LoopbackHub::new();
        let mut node = hosted(&hub);
        let handle = node.state_handle();

        assert_eq!(handle.latest().actors.len(), 1);
        node.move_local(if node.local_actor().unwrap().x == 0 { 1 } else { -1 }, 0);
        let moved = node.local_actor().unwrap().clone();
        node.tick();
        assert_eq!(handle.latest().actor(0).unwrap().x, moved.x);
    }
}
