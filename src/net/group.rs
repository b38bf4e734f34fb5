//! The peer group: a pool of outbound connections kept at a target size,
//! fed from DNS seeds or user-supplied addresses, with per-address failure
//! accounting.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chainparams::ChainParams;
use crate::net::message::{NetMessage, VersionMessage};
use crate::net::peer::{spawn_peer, PeerCommand, PeerHandle};

pub type PeerId = u64;

/// Cap on addresses taken from discovery in one round.
const MAX_DISCOVERED: usize = 64;
/// Addresses failing this often are dropped from the pool.
const MAX_ADDR_FAILURES: u32 = 3;
/// Misbehavior score at which a peer is disconnected.
pub const MISBEHAVE_LIMIT: u32 = 100;

/// Why a peer task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ConnectFailed,
    HandshakeTimeout,
    IdleTimeout,
    Protocol,
    Remote,
    Shutdown,
}

/// Events flowing from peer tasks into the engine loop.
#[derive(Debug)]
pub enum PeerEvent {
    Ready { id: PeerId, version: VersionMessage },
    Message { id: PeerId, msg: NetMessage },
    Closed { id: PeerId, reason: CloseReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Connecting,
    Ready,
}

/// Group-side bookkeeping for one peer.
pub struct PeerSlot {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub state: SlotState,
    pub best_height: i32,
    /// Outstanding `getheaders`, stamped when sent.
    pub headers_requested_at: Option<Instant>,
    /// Outstanding block fetches.
    pub blocks_in_flight: usize,
    pub misbehavior: u32,
    handle: PeerHandle,
}

#[derive(Debug, Clone, Copy)]
pub struct GroupConfig {
    pub max_nodes: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig { max_nodes: 8 }
    }
}

impl GroupConfig {
    fn clamped_max(&self) -> usize {
        self.max_nodes.clamp(1, 128)
    }
}

/// Owns the peer pool. Lives inside the SPV engine loop task; peer tasks
/// talk back through the event channel handed out at construction.
pub struct PeerGroup {
    params: &'static ChainParams,
    config: GroupConfig,
    peers: HashMap<PeerId, PeerSlot>,
    addr_pool: VecDeque<SocketAddr>,
    failures: HashMap<SocketAddr, u32>,
    next_id: PeerId,
    events_tx: mpsc::Sender<PeerEvent>,
    /// Tip height advertised in our `version` messages.
    pub start_height: i32,
}

impl PeerGroup {
    pub fn new(
        params: &'static ChainParams,
        config: GroupConfig,
    ) -> (PeerGroup, mpsc::Receiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        (
            PeerGroup {
                params,
                config,
                peers: HashMap::new(),
                addr_pool: VecDeque::new(),
                failures: HashMap::new(),
                next_id: 1,
                events_tx,
                start_height: 0,
            },
            events_rx,
        )
    }

    /// Fill the address pool. `seeds` of `None` resolves the chain's DNS
    /// seeds; otherwise a comma-separated `ip[:port]` list is parsed.
    pub async fn discover(&mut self, seeds: Option<&str>) {
        let mut found: Vec<SocketAddr> = Vec::new();
        match seeds {
            Some(list) => {
                for entry in list.split(',') {
                    let entry = entry.trim();
                    if entry.is_empty() {
                        continue;
                    }
                    if let Ok(addr) = entry.parse::<SocketAddr>() {
                        found.push(addr);
                    } else if let Ok(ip) = entry.parse::<std::net::IpAddr>() {
                        found.push(SocketAddr::new(ip, self.params.default_port));
                    } else {
                        warn!(target: "net", entry, "unparseable peer address");
                    }
                }
            }
            None => {
                for seed in self.params.dns_seeds {
                    match tokio::net::lookup_host((*seed, self.params.default_port)).await {
                        Ok(addrs) => found.extend(addrs.filter(|a| a.is_ipv4())),
                        Err(e) => debug!(target: "net", seed, error = %e, "dns seed lookup failed"),
                    }
                }
            }
        }
        found.shuffle(&mut rand::thread_rng());
        found.truncate(MAX_DISCOVERED);
        info!(target: "net", count = found.len(), "discovered peer addresses");
        for addr in found {
            if !self.addr_pool.contains(&addr) {
                self.addr_pool.push_back(addr);
            }
        }
    }

    pub fn peer(&self, id: PeerId) -> Option<&PeerSlot> {
        self.peers.get(&id)
    }

    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut PeerSlot> {
        self.peers.get_mut(&id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerSlot> {
        self.peers.values()
    }

    pub fn peers_mut(&mut self) -> impl Iterator<Item = &mut PeerSlot> {
        self.peers.values_mut()
    }

    pub fn ready_count(&self) -> usize {
        self.peers
            .values()
            .filter(|p| p.state == SlotState::Ready)
            .count()
    }

    /// Open connections until the pool reaches its target size.
    pub fn connect_next(&mut self) {
        let max = self.config.clamped_max();
        while self.peers.len() < max {
            let Some(addr) = self.addr_pool.pop_front() else {
                break;
            };
            let id = self.next_id;
            self.next_id += 1;
            let handle = spawn_peer(
                id,
                addr,
                self.params.netmagic,
                self.start_height,
                self.events_tx.clone(),
            );
            debug!(target: "net", peer = id, %addr, "connecting");
            self.peers.insert(
                id,
                PeerSlot {
                    id,
                    addr,
                    state: SlotState::Connecting,
                    best_height: 0,
                    headers_requested_at: None,
                    blocks_in_flight: 0,
                    misbehavior: 0,
                    handle,
                },
            );
        }
    }

    /// Mark a peer's handshake complete.
    pub fn mark_ready(&mut self, id: PeerId, version: &VersionMessage) {
        if let Some(slot) = self.peers.get_mut(&id) {
            slot.state = SlotState::Ready;
            slot.best_height = version.start_height;
            self.failures.remove(&slot.addr);
        }
    }

    /// Queue a message to one peer.
    pub fn send(&self, id: PeerId, msg: NetMessage) {
        if let Some(slot) = self.peers.get(&id) {
            if slot.handle.tx.try_send(PeerCommand::Send(msg)).is_err() {
                warn!(target: "net", peer = id, "send queue full, dropping message");
            }
        }
    }

    /// Send to every READY peer matching the predicate. Returns how many
    /// peers were addressed.
    pub fn broadcast<F>(&self, msg: &NetMessage, mut predicate: F) -> usize
    where
        F: FnMut(&PeerSlot) -> bool,
    {
        let mut sent = 0;
        for slot in self.peers.values() {
            if slot.state == SlotState::Ready && predicate(slot) {
                if slot
                    .handle
                    .tx
                    .try_send(PeerCommand::Send(msg.clone()))
                    .is_ok()
                {
                    sent += 1;
                }
            }
        }
        sent
    }

    /// Ask a peer task to close; removal happens on its `Closed` event.
    pub fn disconnect(&self, id: PeerId) {
        if let Some(slot) = self.peers.get(&id) {
            let _ = slot.handle.tx.try_send(PeerCommand::Close);
        }
    }

    /// Raise a peer's misbehavior score, disconnecting past the limit.
    pub fn misbehaving(&mut self, id: PeerId, score: u32, what: &str) {
        if let Some(slot) = self.peers.get_mut(&id) {
            slot.misbehavior += score;
            warn!(
                target: "net",
                peer = id,
                score = slot.misbehavior,
                what,
                "peer misbehaving"
            );
            if slot.misbehavior >= MISBEHAVE_LIMIT {
                let _ = slot.handle.tx.try_send(PeerCommand::Close);
            }
        }
    }

    /// Drop a closed peer from the pool. Returns the slot so callers can
    /// requeue its in-flight work. The address returns to the pool unless
    /// it keeps failing.
    pub fn on_peer_disconnect(&mut self, id: PeerId, reason: CloseReason) -> Option<PeerSlot> {
        let slot = self.peers.remove(&id)?;
        let counted_failure = !matches!(reason, CloseReason::Shutdown | CloseReason::Remote);
        if counted_failure {
            let entry = self.failures.entry(slot.addr).or_insert(0);
            *entry += 1;
            if *entry < MAX_ADDR_FAILURES {
                self.addr_pool.push_back(slot.addr);
            } else {
                debug!(target: "net", addr = %slot.addr, "address dropped after repeated failures");
            }
        } else if reason == CloseReason::Remote {
            self.addr_pool.push_back(slot.addr);
        }
        debug!(target: "net", peer = id, reason = ?reason, "peer removed");
        Some(slot)
    }

    /// Close every peer and forget the address pool.
    pub fn shutdown(&mut self) {
        for slot in self.peers.values() {
            let _ = slot.handle.tx.try_send(PeerCommand::Close);
        }
        self.addr_pool.clear();
    }

    /// Register an address learned from an `addr` message.
    pub fn add_address(&mut self, addr: SocketAddr) {
        if self.addr_pool.len() < 1000 && !self.addr_pool.contains(&addr) {
            self.addr_pool.push_back(addr);
        }
    }
}
