//! Transport adapters.
//!
//! A transport moves opaque text payloads between the peers of a session and
//! owns no game logic. Inbound traffic is never handed back through the
//! transport itself: every adapter is constructed with an [`InboundSender`]
//! and pushes [`TransportEvent`]s into it from whatever task receives them.
//! The node drains that queue once per tick.
//!
//! Links are identified by [`PeerId`], a transport-level handle. It is not a
//! participant id; the session roster maps between the two.

mod links;
pub mod loopback;
pub mod udp;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use links::{Link, LinkTable};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use udp::UdpTransport;

/// Transport-level link handle.
pub type PeerId = u64;

/// Link id a participant uses for its connection to the authority.
pub const AUTHORITY_LINK: PeerId = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { peer: PeerId },
    Disconnected { peer: PeerId },
    Payload { from: PeerId, payload: String },
}

pub type InboundSender = mpsc::UnboundedSender<TransportEvent>;
pub type InboundReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("no link to peer {0}")]
    UnknownPeer(PeerId),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(String),
}

/// Fire-and-forget message delivery.
///
/// Sends never block on the network. A returned error means the payload was
/// not queued; the caller decides whether to try again on a later tick.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends to every linked peer except `exclude`.
    fn broadcast(&self, payload: &str, exclude: Option<PeerId>) -> Result<(), TransportError>;

    fn send_to(&self, peer: PeerId, payload: &str) -> Result<(), TransportError>;

    /// Tears down links and waits for background activity to stop.
    async fn shutdown(&mut self);
}
