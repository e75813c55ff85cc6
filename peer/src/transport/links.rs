//! Link bookkeeping for the UDP transport
//!
//! This module tracks the remote endpoints a UDP transport talks to:
//! - Link lifecycle (hello, bye, silence timeout)
//! - Address lookup for routing inbound datagrams to a link id
//! - Capacity limits on the authority side
//!
//! The table knows nothing about participants or game state. It only maps
//! transport link ids to socket addresses and remembers when each link was
//! last heard from.

use super::PeerId;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A remote endpoint reachable over the socket
#[derive(Debug)]
pub struct Link {
    /// Link id assigned by the local transport
    pub id: PeerId,
    /// Where datagrams for this link are sent
    pub addr: SocketAddr,
    /// Last time any frame arrived from this link
    pub last_seen: Instant,
}

impl Link {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Returns true if nothing has arrived from this link within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// All live links of one transport
///
/// Link ids are handed out from a counter and never reused while the table
/// exists, so a late frame from a dropped link can never be mistaken for a
/// newer one.
pub struct LinkTable {
    /// Live links indexed by id
    links: HashMap<PeerId, Link>,
    /// Next id handed to a new link
    next_id: PeerId,
    /// Maximum number of concurrent links
    max_links: usize,
}

impl LinkTable {
    /// Creates an empty table whose ids start at `first_id`
    pub fn new(first_id: PeerId, max_links: usize) -> Self {
        Self {
            links: HashMap::new(),
            next_id: first_id,
            max_links,
        }
    }

    /// Attempts to register a new link
    ///
    /// Returns `None` when the table is full.
    pub fn add(&mut self, addr: SocketAddr) -> Option<PeerId> {
        if self.links.len() >= self.max_links {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        info!("Link {} opened to {}", id, addr);
        self.links.insert(id, Link::new(id, addr));
        Some(id)
    }

    /// Registers a link under a fixed id, replacing any previous entry
    pub fn insert(&mut self, id: PeerId, addr: SocketAddr) {
        info!("Link {} opened to {}", id, addr);
        self.links.insert(id, Link::new(id, addr));
    }

    /// Removes a link. Returns false if it was already gone.
    pub fn remove(&mut self, id: PeerId) -> bool {
        if let Some(link) = self.links.remove(&id) {
            info!("Link {} to {} closed", link.id, link.addr);
            true
        } else {
            false
        }
    }

    /// Finds the link a datagram from `addr` belongs to
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.links
            .iter()
            .find(|(_, link)| link.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, id: PeerId) -> Option<SocketAddr> {
        self.links.get(&id).map(|link| link.addr)
    }

    /// Refreshes the activity timestamp of a link
    pub fn touch(&mut self, id: PeerId) -> bool {
        if let Some(link) = self.links.get_mut(&id) {
            link.last_seen = Instant::now();
            true
        } else {
            false
        }
    }

    /// Removes every link that has been silent longer than `timeout`
    ///
    /// Returns the removed ids so the caller can report them upstream.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<PeerId> {
        let timed_out: Vec<PeerId> = self
            .links
            .iter()
            .filter(|(_, link)| link.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for id in &timed_out {
            self.remove(*id);
        }

        timed_out
    }

    /// All link ids with their addresses, for broadcasting
    pub fn addrs(&self) -> Vec<(PeerId, SocketAddr)> {
        self.links
            .iter()
            .map(|(id, link)| (*id, link.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Drains the table, returning every link that was open
    pub fn clear(&mut self) -> Vec<(PeerId, SocketAddr)> {
        let all = self.addrs();
        self.links.clear();
        all
    }
}
