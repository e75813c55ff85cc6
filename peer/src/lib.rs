//! Host-authoritative state sync for grovesync sessions.
//!
//! One peer opens a session and becomes its authority; everybody else joins
//! and reconciles toward the authority's world. The pieces, inbound first:
//!
//! - [`transport`]: moves text payloads between peers and queues inbound events
//! - [`dispatcher`]: decodes payloads and routes them to typed handlers
//! - [`reconcile`]: merges snapshots and actor updates into the local world
//! - [`session`]: role, session id, participant ids and roster
//! - [`scheduler`]: decides when actor updates and snapshots go out
//! - [`node`]: ties the above together behind a per-frame `tick`
//!
//! ```no_run
//! use peer::{Node, NodeConfig};
//! use peer::transport::LoopbackHub;
//!
//! let hub = LoopbackHub::new();
//! let mut host = Node::new(NodeConfig::named("ana"));
//! let transport = hub.host(host.inbound_sender()).unwrap();
//! let session_id = host.create_session("Grove", transport).unwrap();
//! host.tick();
//! # let _ = session_id;
//! ```

pub mod config;
pub mod dispatcher;
pub mod node;
pub mod reconcile;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use config::{NodeConfig, UdpConfig};
pub use node::{Node, StateHandle};
pub use session::{Role, Session, SessionError};
pub use transport::{Transport, TransportError, TransportEvent};
