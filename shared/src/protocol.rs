//! Wire messages exchanged between peers of a session.
//!
//! Every message is a JSON object whose `"type"` field names the kind and whose
//! remaining fields are looked up by name. Fields added by later protocol
//! revisions are optional so older payloads still decode.

use crate::world::{Actor, Mode, ParticipantId, WorldSnapshot, USE_CURRENT_LOCATION};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Authority to one participant: the id it will use for the session.
    AssignParticipantId(ParticipantRef),
    ParticipantJoined(ParticipantRef),
    ParticipantLeft(ParticipantRef),
    /// Echo of the sender's own actor.
    ActorUpdate(Actor),
    /// Discrete world action, rebroadcast by the authority.
    ParticipantAction(ParticipantAction),
    /// Replicated world state. Never carries projectiles.
    FullSnapshot(WorldSnapshot),
}

impl Message {
    /// Tags this decoder understands.
    pub const KINDS: [&'static str; 6] = [
        "ASSIGN_PARTICIPANT_ID",
        "PARTICIPANT_JOINED",
        "PARTICIPANT_LEFT",
        "ACTOR_UPDATE",
        "PARTICIPANT_ACTION",
        "FULL_SNAPSHOT",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            Message::AssignParticipantId(_) => Self::KINDS[0],
            Message::ParticipantJoined(_) => Self::KINDS[1],
            Message::ParticipantLeft(_) => Self::KINDS[2],
            Message::ActorUpdate(_) => Self::KINDS[3],
            Message::ParticipantAction(_) => Self::KINDS[4],
            Message::FullSnapshot(_) => Self::KINDS[5],
        }
    }

    pub fn assign(participant_id: ParticipantId) -> Self {
        Message::AssignParticipantId(ParticipantRef { participant_id })
    }

    pub fn joined(participant_id: ParticipantId) -> Self {
        Message::ParticipantJoined(ParticipantRef { participant_id })
    }

    pub fn left(participant_id: ParticipantId) -> Self {
        Message::ParticipantLeft(ParticipantRef { participant_id })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRef {
    pub participant_id: ParticipantId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Plant,
    Shoot,
    Chop,
}

impl From<Mode> for ActionKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Plant => ActionKind::Plant,
            Mode::Shoot => ActionKind::Shoot,
            Mode::Chop => ActionKind::Chop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAction {
    pub actor_id: ParticipantId,
    /// Target cell, or [`USE_CURRENT_LOCATION`] for the actor's own cell.
    #[serde(default = "current_location")]
    pub target_x: i32,
    #[serde(default = "current_location")]
    pub target_y: i32,
    pub action_kind: ActionKind,
}

fn current_location() -> i32 {
    USE_CURRENT_LOCATION
}

impl ParticipantAction {
    pub fn new(actor_id: ParticipantId, target_x: i32, target_y: i32, action_kind: ActionKind) -> Self {
        Self {
            actor_id,
            target_x,
            target_y,
            action_kind,
        }
    }

    /// Action aimed at wherever the actor currently stands.
    pub fn in_place(actor_id: ParticipantId, action_kind: ActionKind) -> Self {
        Self::new(actor_id, USE_CURRENT_LOCATION, USE_CURRENT_LOCATION, action_kind)
    }
}
