//! In-process transport.
//!
//! A [`LoopbackHub`] plays the part of the network: one endpoint registers as
//! the authority, any number of endpoints link to it. The topology is a star,
//! the same shape the UDP transport uses, so participants only ever talk to the
//! authority and rely on its rebroadcasts.

use super::{InboundSender, PeerId, Transport, TransportError, TransportEvent, AUTHORITY_LINK};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct HubState {
    authority: Option<InboundSender>,
    participants: BTreeMap<PeerId, InboundSender>,
    next_peer: PeerId,
}

/// Shared in-process "network". Cheap to clone.
#[derive(Clone)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                next_peer: AUTHORITY_LINK + 1,
                ..HubState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers the authority endpoint.
    pub fn host(&self, inbound: InboundSender) -> Result<LoopbackTransport, TransportError> {
        let mut state = self.lock();
        if state.authority.is_some() {
            return Err(TransportError::Unavailable(
                "hub already has an authority".to_string(),
            ));
        }
        state.authority = Some(inbound);
        info!("Loopback authority registered");

        Ok(LoopbackTransport {
            hub: self.clone(),
            side: Side::Authority,
            closed: false,
        })
    }

    /// Links a new endpoint to the authority.
    ///
    /// Both sides see a `Connected` event before any payload.
    pub fn connect(&self, inbound: InboundSender) -> Result<LoopbackTransport, TransportError> {
        let mut state = self.lock();
        let Some(authority) = state.authority.clone() else {
            return Err(TransportError::Unavailable(
                "no authority on this hub".to_string(),
            ));
        };

        let peer = state.next_peer;
        state.next_peer += 1;

        let _ = inbound.send(TransportEvent::Connected {
            peer: AUTHORITY_LINK,
        });
        let _ = authority.send(TransportEvent::Connected { peer });
        state.participants.insert(peer, inbound);
        info!("Loopback peer {} linked", peer);

        Ok(LoopbackTransport {
            hub: self.clone(),
            side: Side::Participant(peer),
            closed: false,
        })
    }

    pub fn linked_peers(&self) -> usize {
        self.lock().participants.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Authority,
    Participant(PeerId),
}

pub struct LoopbackTransport {
    hub: LoopbackHub,
    side: Side,
    closed: bool,
}

impl LoopbackTransport {
    /// Link id the other side of this endpoint knows it by.
    pub fn local_peer(&self) -> PeerId {
        match self.side {
            Side::Authority => AUTHORITY_LINK,
            Side::Participant(peer) => peer,
        }
    }

    fn deliver(sender: &InboundSender, from: PeerId, payload: &str) -> Result<(), TransportError> {
        sender
            .send(TransportEvent::Payload {
                from,
                payload: payload.to_string(),
            })
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn broadcast(&self, payload: &str, exclude: Option<PeerId>) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let state = self.hub.lock();

        match self.side {
            Side::Authority => {
                for (peer, sender) in &state.participants {
                    if Some(*peer) == exclude {
                        continue;
                    }
                    if Self::deliver(sender, AUTHORITY_LINK, payload).is_err() {
                        debug!("Loopback peer {} stopped listening", peer);
                    }
                }
                Ok(())
            }
            Side::Participant(peer) => {
                if exclude == Some(AUTHORITY_LINK) {
                    return Ok(());
                }
                let authority = state.authority.as_ref().ok_or(TransportError::Closed)?;
                Self::deliver(authority, peer, payload)
            }
        }
    }

    fn send_to(&self, peer: PeerId, payload: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let state = self.hub.lock();

        match self.side {
            Side::Authority => {
                let sender = state
                    .participants
                    .get(&peer)
                    .ok_or(TransportError::UnknownPeer(peer))?;
                Self::deliver(sender, AUTHORITY_LINK, payload)
            }
            Side::Participant(own) => {
                if peer != AUTHORITY_LINK {
                    return Err(TransportError::UnknownPeer(peer));
                }
                let authority = state.authority.as_ref().ok_or(TransportError::Closed)?;
                Self::deliver(authority, own, payload)
            }
        }
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.hub.lock();

        match self.side {
            Side::Authority => {
                for (_, sender) in std::mem::take(&mut state.participants) {
                    let _ = sender.send(TransportEvent::Disconnected {
                        peer: AUTHORITY_LINK,
                    });
                }
                state.authority = None;
                info!("Loopback authority closed");
            }
            Side::Participant(peer) => {
                state.participants.remove(&peer);
                if let Some(authority) = &state.authority {
                    let _ = authority.send(TransportEvent::Disconnected { peer });
                }
                info!("Loopback peer {} closed", peer);
            }
        }
    }
}
