//! UDP transport handling datagram I/O for one node
//!
//! The authority binds a socket and accepts links; participants bind an
//! ephemeral socket and link to the authority only. Game payloads travel inside
//! bincode-encoded [`Frame`]s alongside a small amount of link control traffic.
//! Everything runs on background tasks so no call made by the node ever waits
//! on the network.

use super::{
    InboundSender, LinkTable, PeerId, Transport, TransportError, TransportEvent, AUTHORITY_LINK,
};
use crate::config::UdpConfig;
use async_trait::async_trait;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Largest datagram the receiver accepts
const MAX_DATAGRAM: usize = 65_536;

/// Link-level frames. Only `Data` carries game traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Hello,
    Welcome,
    Data(String),
    Heartbeat,
    Bye,
}

/// Work queued for the sender task
#[derive(Debug)]
enum Outbound {
    ToAddr { addr: SocketAddr, frame: Frame },
    ToPeer { peer: PeerId, frame: Frame },
    Broadcast { frame: Frame, exclude: Option<PeerId> },
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Authority,
    Participant { host: SocketAddr },
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    links: Arc<RwLock<LinkTable>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl UdpTransport {
    /// Binds the authority socket and starts accepting links.
    pub async fn host(config: &UdpConfig, inbound: InboundSender) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(config.bind.as_str()).await?;
        info!("Authority listening on {}", socket.local_addr()?);

        let links = LinkTable::new(AUTHORITY_LINK + 1, config.max_peers);
        Ok(Self::start(socket, links, Mode::Authority, config, inbound))
    }

    /// Binds a local socket and links to the authority at `host`.
    ///
    /// Returns immediately. The authority link is reported as a `Connected`
    /// event once the authority answers; until then `Hello` is repeated on
    /// every heartbeat.
    pub async fn connect(
        config: &UdpConfig,
        host: SocketAddr,
        inbound: InboundSender,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(config.bind.as_str()).await?;
        info!("Linking to authority at {} from {}", host, socket.local_addr()?);

        let links = LinkTable::new(AUTHORITY_LINK, 1);
        Ok(Self::start(
            socket,
            links,
            Mode::Participant { host },
            config,
            inbound,
        ))
    }

    fn start(
        socket: UdpSocket,
        links: LinkTable,
        mode: Mode,
        config: &UdpConfig,
        inbound: InboundSender,
    ) -> Self {
        let socket = Arc::new(socket);
        let links = Arc::new(RwLock::new(links));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(run_receiver(
                Arc::clone(&socket),
                Arc::clone(&links),
                inbound.clone(),
                outbound.clone(),
                mode,
                shutdown.subscribe(),
            )),
            tokio::spawn(run_sender(
                Arc::clone(&socket),
                Arc::clone(&links),
                outbound_rx,
                shutdown.subscribe(),
            )),
            tokio::spawn(run_heartbeat(
                Arc::clone(&links),
                outbound.clone(),
                mode,
                config.heartbeat_interval,
                shutdown.subscribe(),
            )),
            tokio::spawn(run_timeout_checker(
                Arc::clone(&links),
                inbound,
                config.link_timeout,
                config.heartbeat_interval,
                shutdown.subscribe(),
            )),
        ];

        Self {
            socket,
            links,
            outbound,
            shutdown,
            tasks,
            closed: false,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn link_count(&self) -> usize {
        self.links.read().await.len()
    }

    fn queue(&self, message: Outbound) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.outbound.send(message).map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn broadcast(&self, payload: &str, exclude: Option<PeerId>) -> Result<(), TransportError> {
        self.queue(Outbound::Broadcast {
            frame: Frame::Data(payload.to_string()),
            exclude,
        })
    }

    /// Unknown links are detected by the sender task and logged there.
    fn send_to(&self, peer: PeerId, payload: &str) -> Result<(), TransportError> {
        self.queue(Outbound::ToPeer {
            peer,
            frame: Frame::Data(payload.to_string()),
        })
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let links = self.links.write().await.clear();
        match serialize(&Frame::Bye) {
            Ok(bye) => {
                for (peer, addr) in links {
                    if let Err(e) = self.socket.send_to(&bye, addr).await {
                        warn!("Failed to say goodbye to link {}: {}", peer, e);
                    }
                }
            }
            Err(e) => error!("Failed to encode goodbye frame: {}", e),
        }

        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Transport task ended abnormally: {}", e);
            }
        }
        info!("UDP transport closed");
    }
}

async fn send_frame(socket: &UdpSocket, frame: &Frame, addr: SocketAddr) -> Result<(), TransportError> {
    let data = serialize(frame).map_err(|e| TransportError::Frame(e.to_string()))?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

/// Receives datagrams and turns them into transport events
async fn run_receiver(
    socket: Arc<UdpSocket>,
    links: Arc<RwLock<LinkTable>>,
    inbound: InboundSender,
    outbound: mpsc::UnboundedSender<Outbound>,
    mode: Mode,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((len, addr)) => {
                        let frame = match deserialize::<Frame>(&buffer[..len]) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!("Dropping undecodable datagram from {}: {}", addr, e);
                                continue;
                            }
                        };

                        if let Some(event) = handle_frame(frame, addr, &links, &outbound, mode).await {
                            if inbound.send(event).is_err() {
                                debug!("Inbound queue closed, stopping receiver");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }
    }
}

async fn handle_frame(
    frame: Frame,
    addr: SocketAddr,
    links: &RwLock<LinkTable>,
    outbound: &mpsc::UnboundedSender<Outbound>,
    mode: Mode,
) -> Option<TransportEvent> {
    let mut table = links.write().await;

    match (mode, frame) {
        (Mode::Authority, Frame::Hello) => {
            if let Some(peer) = table.find_by_addr(addr) {
                // Repeated hello, our welcome was probably lost.
                table.touch(peer);
                let _ = outbound.send(Outbound::ToAddr {
                    addr,
                    frame: Frame::Welcome,
                });
                return None;
            }

            match table.add(addr) {
                Some(peer) => {
                    let _ = outbound.send(Outbound::ToAddr {
                        addr,
                        frame: Frame::Welcome,
                    });
                    Some(TransportEvent::Connected { peer })
                }
                None => {
                    warn!("Refusing link from {}: table full", addr);
                    let _ = outbound.send(Outbound::ToAddr {
                        addr,
                        frame: Frame::Bye,
                    });
                    None
                }
            }
        }
        (Mode::Participant { host }, Frame::Welcome) if addr == host => {
            if table.touch(AUTHORITY_LINK) {
                return None;
            }
            table.insert(AUTHORITY_LINK, addr);
            Some(TransportEvent::Connected {
                peer: AUTHORITY_LINK,
            })
        }
        (_, Frame::Data(payload)) => {
            let Some(peer) = table.find_by_addr(addr) else {
                debug!("Dropping data from unlinked address {}", addr);
                return None;
            };
            table.touch(peer);
            Some(TransportEvent::Payload {
                from: peer,
                payload,
            })
        }
        (_, Frame::Heartbeat) => {
            if let Some(peer) = table.find_by_addr(addr) {
                table.touch(peer);
            }
            None
        }
        (_, Frame::Bye) => {
            let peer = table.find_by_addr(addr)?;
            table.remove(peer);
            Some(TransportEvent::Disconnected { peer })
        }
        (_, frame) => {
            debug!("Ignoring unexpected {:?} frame from {}", frame, addr);
            None
        }
    }
}

/// Drains the outbound queue onto the socket
async fn run_sender(
    socket: Arc<UdpSocket>,
    links: Arc<RwLock<LinkTable>>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match message {
            Outbound::ToAddr { addr, frame } => {
                if let Err(e) = send_frame(&socket, &frame, addr).await {
                    warn!("Failed to send to {}: {}", addr, e);
                }
            }
            Outbound::ToPeer { peer, frame } => {
                let addr = links.read().await.addr_of(peer);
                match addr {
                    Some(addr) => {
                        if let Err(e) = send_frame(&socket, &frame, addr).await {
                            warn!("Failed to send to link {}: {}", peer, e);
                        }
                    }
                    None => warn!("Dropping frame for unknown link {}", peer),
                }
            }
            Outbound::Broadcast { frame, exclude } => {
                let targets = links.read().await.addrs();
                let data = match serialize(&frame) {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to encode frame: {}", e);
                        continue;
                    }
                };

                for (peer, addr) in targets {
                    if Some(peer) == exclude {
                        continue;
                    }
                    if let Err(e) = socket.send_to(&data, addr).await {
                        warn!("Failed to send to link {}: {}", peer, e);
                    }
                }
            }
        }
    }
}

/// Keeps links alive, and keeps knocking until the authority answers
async fn run_heartbeat(
    links: Arc<RwLock<LinkTable>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    mode: Mode,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let unlinked = links.read().await.is_empty();
                let message = match mode {
                    Mode::Participant { host } if unlinked => Outbound::ToAddr {
                        addr: host,
                        frame: Frame::Hello,
                    },
                    _ => Outbound::Broadcast {
                        frame: Frame::Heartbeat,
                        exclude: None,
                    },
                };
                if outbound.send(message).is_err() {
                    break;
                }
            }
        }
    }
}

/// Drops links that went silent and reports them upstream
async fn run_timeout_checker(
    links: Arc<RwLock<LinkTable>>,
    inbound: InboundSender,
    timeout: Duration,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let timed_out = links.write().await.check_timeouts(timeout);
                for peer in timed_out {
                    info!("Link {} timed out", peer);
                    if inbound.send(TransportEvent::Disconnected { peer }).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
