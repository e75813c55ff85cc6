//! Session and role bookkeeping.
//!
//! Tracks whether this process is hosting, joined or idle, the shareable
//! session id, the local participant id and the roster. The authority is the
//! only one that hands out participant ids, and it maps each transport link to
//! the participant behind it.

use crate::transport::PeerId;
use log::{debug, info};
use rand::Rng;
use shared::{ParticipantId, AUTHORITY_ID};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    None,
    Authority,
    Participant,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("already connected to a session")]
    AlreadyConnected,
    #[error("session id is empty")]
    EmptySessionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    /// Transport link, known only on the authority
    pub link: Option<PeerId>,
}

#[derive(Debug)]
pub struct Session {
    session_id: Option<String>,
    role: Role,
    connected: bool,
    local_id: Option<ParticipantId>,
    roster: BTreeMap<ParticipantId, Participant>,
    next_participant_id: ParticipantId,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: None,
            role: Role::None,
            connected: false,
            local_id: None,
            roster: BTreeMap::new(),
            next_participant_id: AUTHORITY_ID + 1,
        }
    }

    /// Opens a session as its authority and returns the shareable id.
    pub fn create<R: Rng>(&mut self, name: &str, rng: &mut R) -> Result<String, SessionError> {
        if self.connected {
            return Err(SessionError::AlreadyConnected);
        }

        let base = if name.trim().is_empty() { "session" } else { name.trim() };
        let session_id = format!("{}_{}", base, rng.gen_range(1000..10000));

        self.session_id = Some(session_id.clone());
        self.role = Role::Authority;
        self.connected = true;
        self.next_participant_id = AUTHORITY_ID + 1;
        self.local_id = Some(AUTHORITY_ID);
        self.roster.insert(
            AUTHORITY_ID,
            Participant {
                id: AUTHORITY_ID,
                display_name: String::new(),
                link: None,
            },
        );

        info!("Created session {} as authority", session_id);
        Ok(session_id)
    }

    /// Joins an existing session. The participant id arrives later.
    pub fn join(&mut self, session_id: &str) -> Result<(), SessionError> {
        if self.connected {
            return Err(SessionError::AlreadyConnected);
        }
        if session_id.trim().is_empty() {
            return Err(SessionError::EmptySessionId);
        }

        self.session_id = Some(session_id.trim().to_string());
        self.role = Role::Participant;
        self.connected = true;
        self.local_id = None;

        info!("Joined session {}, waiting for participant id", session_id.trim());
        Ok(())
    }

    /// Resets to the idle state. Calling it while idle does nothing.
    pub fn disconnect(&mut self) {
        if !self.connected && self.role == Role::None {
            return;
        }
        if let Some(session_id) = &self.session_id {
            info!("Left session {}", session_id);
        }

        self.session_id = None;
        self.role = Role::None;
        self.connected = false;
        self.local_id = None;
        self.roster.clear();
        self.next_participant_id = AUTHORITY_ID + 1;
    }

    /// Accepts an id handed out by the authority.
    ///
    /// Returns true only for the first assignment. Repeats of the same id and
    /// late conflicting ids are ignored.
    pub fn accept_assignment(&mut self, id: ParticipantId) -> bool {
        if self.role != Role::Participant {
            debug!("Ignoring id assignment {} outside participant role", id);
            return false;
        }
        match self.local_id {
            Some(current) if current == id => {
                debug!("Duplicate id assignment {}", id);
                false
            }
            Some(current) => {
                debug!("Ignoring id assignment {}, already using {}", id, current);
                false
            }
            None => {
                self.local_id = Some(id);
                self.add_participant(id);
                info!("Assigned participant id {}", id);
                true
            }
        }
    }

    /// Participant side: gives up the assigned id and the roster after the
    /// authority link came back, so the authority's next assignment is taken.
    ///
    /// Returns the id that was dropped, if any.
    pub fn reset_assignment(&mut self) -> Option<ParticipantId> {
        if self.role != Role::Participant {
            return None;
        }
        let previous = self.local_id.take()?;
        self.roster.clear();
        info!("Released participant id {} after relinking", previous);
        Some(previous)
    }

    /// Authority side: registers a new link and returns the participant id
    /// allocated for it.
    pub fn admit(&mut self, link: PeerId) -> ParticipantId {
        if let Some(existing) = self.participant_for_link(link) {
            return existing;
        }

        let id = self.next_participant_id;
        self.next_participant_id += 1;
        self.roster.insert(
            id,
            Participant {
                id,
                display_name: String::new(),
                link: Some(link),
            },
        );
        info!("Admitted participant {} on link {}", id, link);
        id
    }

    /// Authority side: forgets the participant behind a link.
    pub fn release(&mut self, link: PeerId) -> Option<ParticipantId> {
        let id = self.participant_for_link(link)?;
        self.roster.remove(&id);
        info!("Participant {} left", id);
        Some(id)
    }

    pub fn participant_for_link(&self, link: PeerId) -> Option<ParticipantId> {
        self.roster
            .values()
            .find(|p| p.link == Some(link))
            .map(|p| p.id)
    }

    /// Adds a roster entry if missing. Returns true if it was new.
    pub fn add_participant(&mut self, id: ParticipantId) -> bool {
        if self.roster.contains_key(&id) {
            return false;
        }
        self.roster.insert(
            id,
            Participant {
                id,
                display_name: String::new(),
                link: None,
            },
        );
        true
    }

    pub fn remove_participant(&mut self, id: ParticipantId) -> bool {
        self.roster.remove(&id).is_some()
    }

    pub fn set_display_name(&mut self, id: ParticipantId, name: &str) {
        if name.is_empty() {
            return;
        }
        if let Some(participant) = self.roster.get_mut(&id) {
            participant.display_name = name.to_string();
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }

    pub fn local_id(&self) -> Option<ParticipantId> {
        self.local_id
    }

    pub fn roster(&self) -> impl Iterator<Item = &Participant> {
        self.roster.values()
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.roster.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_create_session() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut session = Session::new();
        let id = session.create("Room", &mut rng).unwrap();

        let (name, suffix) = id.split_once('_').unwrap();
        assert_eq!(name, "Room");
        assert_eq!(suffix.len(), 4);
        assert!(suffix.parse::<u32>().is_ok());

        assert_eq!(session.role(), Role::Authority);
        assert!(session.is_connected());
        assert_eq!(session.local_id(), Some(AUTHORITY_ID));
        assert!(session.participant(AUTHORITY_ID).is_some());
    }

    #[test]
    fn test_cannot_open_twice() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut session = Session::new();
        session.create("Room", &mut rng).unwrap();
        assert_eq!(
            session.create("Other", &mut rng),
            Err(SessionError::AlreadyConnected)
        );
        assert_eq!(session.join("Room_1234"), Err(SessionError::AlreadyConnected));
    }

    #[test]
    fn test_join_waits_for_id() {
        let mut session = Session::new();
        assert_eq!(session.join("  "), Err(SessionError::EmptySessionId));

        session.join("Room_4821").unwrap();
        assert_eq!(session.role(), Role::Participant);
        assert!(session.is_connected());
        assert_eq!(session.local_id(), None);
        assert_eq!(session.session_id(), Some("Room_4821"));
    }

    #[test]
    fn test_assignment_is_idempotent() {
        let mut session = Session::new();
        session.join("Room_4821").unwrap();

        assert!(session.accept_assignment(5));
        assert!(!session.accept_assignment(5));
        assert!(!session.accept_assignment(6));
        assert_eq!(session.local_id(), Some(5));
        assert_eq!(session.roster().count(), 1);
    }

    #[test]
    fn test_authority_ignores_assignment() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut session = Session::new();
        session.create("Room", &mut rng).unwrap();
        assert!(!session.accept_assignment(3));
        assert_eq!(session.local_id(), Some(AUTHORITY_ID));
    }

    #[test]
    fn test_ids_stay_unique_under_churn() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut session = Session::new();
        session.create("Room", &mut rng).unwrap();

        let first = session.admit(10);
        let second = session.admit(11);
        assert_eq!((first, second), (1, 2));
        assert_eq!(session.admit(10), first);

        assert_eq!(session.release(10), Some(first));
        assert_eq!(session.release(10), None);

        let third = session.admit(12);
        assert_eq!(third, 3);
        assert_eq!(session.participant(third).and_then(|p| p.link), Some(12));
        assert_eq!(session.participant_for_link(11), Some(second));
    }

    #[test]
    fn test_reset_assignment_after_relink() {
        let mut session = Session::new();
        session.join("Room_1234").unwrap();
        assert_eq!(session.reset_assignment(), None);

        assert!(session.accept_assignment(1));
        session.add_participant(0);
        assert!(!session.accept_assignment(2));

        assert_eq!(session.reset_assignment(), Some(1));
        assert_eq!(session.local_id(), None);
        assert_eq!(session.roster().count(), 0);
        assert!(session.is_connected());

        assert!(session.accept_assignment(2));
        assert_eq!(session.local_id(), Some(2));
    }

    #[test]
    fn test_authority_keeps_its_id_on_reset() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut session = Session::new();
        session.create("Room", &mut rng).unwrap();
        assert_eq!(session.reset_assignment(), None);
        assert_eq!(session.local_id(), Some(0));
    }

    #[test]
    fn test_disconnect_clears_everything() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut session = Session::new();
        session.create("Room", &mut rng).unwrap();
        session.admit(1);

        session.disconnect();
        assert_eq!(session.role(), Role::None);
        assert!(!session.is_connected());
        assert!(session.session_id().is_none());
        assert!(session.local_id().is_none());
        assert_eq!(session.roster().count(), 0);

        session.disconnect();
        assert_eq!(session.role(), Role::None);

        // Ids restart for the next session.
        session.create("Again", &mut rng).unwrap();
        assert_eq!(session.admit(7), 1);
    }

    #[test]
    fn test_display_names() {
        let mut session = Session::new();
        session.join("Room_1000").unwrap();
        session.add_participant(2);
        session.set_display_name(2, "kim");
        session.set_display_name(2, "");
        assert_eq!(session.participant(2).unwrap().display_name, "kim");
        assert!(session.remove_participant(2));
        assert!(!session.remove_participant(2));
    }
}
