//! Inbound message dispatch.
//!
//! Every payload drained from the inbound queue passes through [`dispatch`]
//! exactly once. It is decoded, routed to the matching [`Handler`] method and
//! classified so the caller knows whether the authority must forward it.

use crate::session::Role;
use log::{debug, warn};
use shared::codec;
use shared::{Actor, Message, ParticipantAction, ParticipantId, WorldSnapshot};

/// One method per inbound message kind.
///
/// Handlers run synchronously on the tick that drains the queue and must
/// tolerate duplicate delivery.
pub trait Handler {
    fn assign_participant_id(&mut self, id: ParticipantId);
    fn participant_joined(&mut self, id: ParticipantId);
    fn participant_left(&mut self, id: ParticipantId);
    fn actor_update(&mut self, actor: Actor);
    fn participant_action(&mut self, action: ParticipantAction);
    fn full_snapshot(&mut self, snapshot: WorldSnapshot);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    /// Handled locally; the authority must forward the original payload to
    /// every other peer.
    Rebroadcast,
    Dropped(DropReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    UnknownKind,
    NoSession,
}

pub fn dispatch<H: Handler + ?Sized>(role: Role, payload: &str, handler: &mut H) -> Disposition {
    match codec::decode(payload) {
        Ok(message) => route(role, message, handler),
        Err(e) if e.is_forward_compatible() => {
            debug!("Dropping message: {}", e);
            Disposition::Dropped(DropReason::UnknownKind)
        }
        Err(e) => {
            warn!("Dropping malformed message: {}", e);
            Disposition::Dropped(DropReason::Malformed)
        }
    }
}

/// Routes an already decoded message.
pub fn route<H: Handler + ?Sized>(role: Role, message: Message, handler: &mut H) -> Disposition {
    if role == Role::None {
        debug!("Dropping {} outside a session", message.kind());
        return Disposition::Dropped(DropReason::NoSession);
    }

    match message {
        Message::AssignParticipantId(r) => handler.assign_participant_id(r.participant_id),
        Message::ParticipantJoined(r) => handler.participant_joined(r.participant_id),
        Message::ParticipantLeft(r) => handler.participant_left(r.participant_id),
        // Never forwarded: every peer hears updates straight from the source
        // or from the next snapshot.
        Message::ActorUpdate(actor) => handler.actor_update(actor),
        Message::ParticipantAction(action) => {
            handler.participant_action(action);
            if role == Role::Authority {
                return Disposition::Rebroadcast;
            }
        }
        Message::FullSnapshot(snapshot) => {
            debug!(
                "Snapshot with {} actors, {} roamers",
                snapshot.actor_roster.len(),
                snapshot.roamer_list.len()
            );
            handler.full_snapshot(snapshot);
        }
    }

    Disposition::Handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::codec::encode;
    use shared::ActionKind;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl Handler for Recorder {
        fn assign_participant_id(&mut self, id: ParticipantId) {
            self.calls.push(format!("assign {}", id));
        }
        fn participant_joined(&mut self, id: ParticipantId) {
            self.calls.push(format!("joined {}", id));
        }
        fn participant_left(&mut self, id: ParticipantId) {
            self.calls.push(format!("left {}", id));
        }
        fn actor_update(&mut self, actor: Actor) {
            self.calls.push(format!("update {}", actor.id));
        }
        fn participant_action(&mut self, action: ParticipantAction) {
            self.calls.push(format!("action {}", action.actor_id));
        }
        fn full_snapshot(&mut self, snapshot: WorldSnapshot) {
            self.calls.push(format!("snapshot {}", snapshot.actor_roster.len()));
        }
    }

    fn action_payload() -> String {
        encode(&Message::ParticipantAction(ParticipantAction::in_place(
            2,
            ActionKind::Chop,
        )))
        .unwrap()
    }

    #[test]
    fn test_authority_rebroadcasts_actions_only() {
        let mut recorder = Recorder::default();

        let action = dispatch(Role::Authority, &action_payload(), &mut recorder);
        assert_eq!(action, Disposition::Rebroadcast);

        let update = encode(&Message::ActorUpdate(Actor::new(2, 1, 1))).unwrap();
        assert_eq!(
            dispatch(Role::Authority, &update, &mut recorder),
            Disposition::Handled
        );

        assert_eq!(recorder.calls, vec!["action 2", "update 2"]);
    }

    #[test]
    fn test_participant_never_rebroadcasts() {
        let mut recorder = Recorder::default();
        assert_eq!(
            dispatch(Role::Participant, &action_payload(), &mut recorder),
            Disposition::Handled
        );
        assert_eq!(recorder.calls, vec!["action 2"]);
    }

    #[test]
    fn test_routes_every_kind() {
        let mut recorder = Recorder::default();
        let messages = vec![
            Message::assign(4),
            Message::joined(5),
            Message::left(5),
            Message::FullSnapshot(WorldSnapshot::default()),
        ];
        for message in messages {
            route(Role::Participant, message, &mut recorder);
        }
        assert_eq!(
            recorder.calls,
            vec!["assign 4", "joined 5", "left 5", "snapshot 0"]
        );
    }

    #[test]
    fn test_unknown_and_malformed_are_dropped() {
        let mut recorder = Recorder::default();
        assert_eq!(
            dispatch(Role::Participant, r#"{"type":"WEATHER","rain":true}"#, &mut recorder),
            Disposition::Dropped(DropReason::UnknownKind)
        );
        assert_eq!(
            dispatch(Role::Authority, r#"{"type":"ACTOR_UPDATE""#, &mut recorder),
            Disposition::Dropped(DropReason::Malformed)
        );
        assert_eq!(
            dispatch(Role::Authority, "{}", &mut recorder),
            Disposition::Dropped(DropReason::Malformed)
        );
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn test_nothing_routed_without_session() {
        let mut recorder = Recorder::default();
        assert_eq!(
            dispatch(Role::None, &action_payload(), &mut recorder),
            Disposition::Dropped(DropReason::NoSession)
        );
        assert!(recorder.calls.is_empty());
    }
}
