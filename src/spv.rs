//! The SPV client: checkpoint bootstrap, locator-driven header sync over
//! the peer group, optional full-block fetching for transaction callbacks.
//!
//! The engine is cooperative and single-threaded: one `select!` loop owns
//! the headers database and the peer pool, draining peer events and running
//! periodic checks. Callbacks fire on the loop and must not block.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, trace, warn};

use crate::block::Block;
use crate::chainparams::{hash_from_hex, ChainKind, ChainParams};
use crate::error::{ConsensusError, Error};
use crate::headersdb::{BlockIndex, ConnectOutcome, HeadersDb};
use crate::net::message::{InvItem, InvType, NetMessage, MAX_HEADERS_RESULTS};
use crate::net::{GroupConfig, PeerEvent, PeerGroup, PeerId};
use crate::serialize::Reader;
use crate::tx::Transaction;
use crate::Hash256;

/// Header chain is behind some peer's advertised best.
pub const HEADER_SYNC_FLAG: u32 = 1 << 0;
/// Full blocks are being fetched for transaction filtering.
pub const FULLBLOCK_SYNC_FLAG: u32 = 1 << 1;

/// A `getheaders` answer older than this is stale.
const HEADERS_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
/// Re-request interval while header sync is active.
const HEADERS_REQUEST_INTERVAL: Duration = Duration::from_secs(30);
/// State flags are refreshed this often.
const STATECHECK_INTERVAL: Duration = Duration::from_secs(5);
/// Cap on concurrently fetched blocks per peer.
const BLOCKS_IN_FLIGHT_PER_PEER: usize = 16;
/// Slack when deciding whether a header is recent enough to fetch.
const TIMESTAMP_SLACK: u32 = 2 * 60 * 60;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpvConfig {
    pub chain: ChainKind,
    /// Skip file persistence entirely.
    pub headers_memonly: bool,
    /// Bootstrap from the newest usable hard-coded checkpoint.
    pub use_checkpoints: bool,
    /// Request full blocks, not just headers.
    pub full_sync: bool,
    /// Target connection count, clamped to `[1, 128]`.
    pub max_nodes: usize,
    /// Unix timestamp of the oldest wallet item; drives block fetching and
    /// checkpoint choice. Zero means "everything".
    pub oldest_item_of_interest: u64,
}

impl SpvConfig {
    pub fn new(chain: ChainKind) -> SpvConfig {
        SpvConfig {
            chain,
            headers_memonly: false,
            use_checkpoints: false,
            full_sync: false,
            max_nodes: 8,
            oldest_item_of_interest: 0,
        }
    }
}

/// User callbacks, invoked on the loop thread. All methods default to
/// no-ops; panics inside them are the caller's responsibility.
pub trait SpvEvents {
    /// A header extended the best chain.
    fn header_connected(&mut self, _tip: &BlockIndex) {}
    /// Header sync caught up with the network.
    fn sync_completed(&mut self, _tip: &BlockIndex) {}
    /// A whole `headers` message was processed. Return `false` to drop the
    /// peer that sent it.
    fn header_message_processed(&mut self, _new_tip: Option<&BlockIndex>) -> bool {
        true
    }
    /// One transaction of a fetched block, in block order, 0-based.
    fn sync_transaction(&mut self, _tx: &Transaction, _pos: u32, _block: &BlockIndex) {}
}

/// Requests the engine loop to exit at the next tick.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct SpvClient<E: SpvEvents> {
    params: &'static ChainParams,
    config: SpvConfig,
    pub headers_db: HeadersDb,
    group: PeerGroup,
    events_rx: mpsc::Receiver<PeerEvent>,
    handler: E,
    state_flags: u32,
    last_headers_request: Option<Instant>,
    last_statecheck: Instant,
    called_sync_completed: bool,
    /// Blocks requested or received, keyed to the peer serving them.
    requested_blocks: HashMap<Hash256, PeerId>,
    quit_tx: Arc<watch::Sender<bool>>,
    quit_rx: watch::Receiver<bool>,
}

impl<E: SpvEvents> SpvClient<E> {
    pub fn new(config: SpvConfig, handler: E) -> SpvClient<E> {
        let params = config.chain.params();
        let (group, events_rx) = PeerGroup::new(
            params,
            GroupConfig {
                max_nodes: config.max_nodes,
            },
        );
        let (quit_tx, quit_rx) = watch::channel(false);
        SpvClient {
            params,
            config,
            headers_db: HeadersDb::new(params),
            group,
            events_rx,
            handler,
            state_flags: HEADER_SYNC_FLAG,
            last_headers_request: None,
            last_statecheck: Instant::now(),
            called_sync_completed: false,
            requested_blocks: HashMap::new(),
            quit_tx: Arc::new(quit_tx),
            quit_rx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.quit_tx.clone(),
        }
    }

    pub fn state_flags(&self) -> u32 {
        self.state_flags
    }

    /// Attach persistence (unless memory-only) and apply checkpoint
    /// bootstrap on an otherwise empty database.
    pub fn load(&mut self, path: Option<&Path>) -> Result<(), Error> {
        if !self.config.headers_memonly {
            if let Some(path) = path {
                self.headers_db.load(path)?;
            }
        }
        if self.config.use_checkpoints
            && self.headers_db.is_empty()
            && !self.headers_db.has_checkpoint_start()
        {
            let cutoff = if self.config.oldest_item_of_interest == 0 {
                u64::MAX
            } else {
                self.config.oldest_item_of_interest
            };
            let chosen = self
                .params
                .checkpoints
                .iter()
                .filter(|c| c.height > 0 && (c.timestamp as u64) < cutoff)
                .last();
            if let Some(cp) = chosen {
                self.headers_db
                    .set_checkpoint_start(hash_from_hex(cp.hash), cp.height);
                info!(
                    target: "spv",
                    height = cp.height,
                    "bootstrapping from checkpoint"
                );
            }
        }
        Ok(())
    }

    /// Resolve peer addresses; `None` uses the chain's DNS seeds.
    pub async fn discover_peers(&mut self, seeds: Option<&str>) {
        self.group.discover(seeds).await;
    }

    /// Drive the engine until shutdown. Owns the headers database and the
    /// peer pool for the duration.
    pub async fn run(&mut self) {
        self.group.start_height = self.headers_db.chaintip().height as i32;
        self.group.connect_next();
        let mut tick = interval(Duration::from_secs(1));
        let mut quit_rx = self.quit_rx.clone();

        info!(
            target: "spv",
            chain = self.params.name,
            tip = self.headers_db.chaintip().height,
            "spv client entering runloop"
        );

        loop {
            tokio::select! {
                changed = quit_rx.changed() => {
                    if changed.is_err() || *quit_rx.borrow() {
                        break;
                    }
                }
                event = self.events_rx.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
                _ = tick.tick() => self.periodic(),
            }
        }

        self.group.shutdown();
        // drain peer shutdown notifications without blocking forever
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.group.peers().next().is_some() && Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(200), self.events_rx.recv()).await {
                Ok(Some(event)) => {
                    if let PeerEvent::Closed { id, reason } = event {
                        self.group.on_peer_disconnect(id, reason);
                    }
                }
                _ => break,
            }
        }
        info!(target: "spv", "spv client runloop finished");
    }

    /// Handle one peer event. Exposed for scripted tests.
    pub fn dispatch(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Ready { id, version } => {
                debug!(target: "spv", peer = id, height = version.start_height, "peer ready");
                self.group.mark_ready(id, &version);
                self.update_state_flags();
                if self.state_flags & HEADER_SYNC_FLAG != 0 {
                    self.request_headers();
                }
            }
            PeerEvent::Message { id, msg } => self.on_message(id, msg),
            PeerEvent::Closed { id, reason } => {
                if let Some(slot) = self.group.on_peer_disconnect(id, reason) {
                    if slot.headers_requested_at.is_some() {
                        // give the next peer a chance immediately
                        self.last_headers_request = None;
                    }
                    self.requested_blocks.retain(|_, peer| *peer != id);
                }
                self.group.connect_next();
            }
        }
    }

    fn on_message(&mut self, id: PeerId, msg: NetMessage) {
        match msg {
            NetMessage::Headers(payload) => self.on_headers(id, &payload),
            NetMessage::Block(payload) => self.on_block(id, &payload),
            NetMessage::Inv(items) => self.on_inv(id, &items),
            NetMessage::Addr(entries) => {
                for (_, addr) in entries.iter().take(64) {
                    if let Some(sock) = netaddr_to_socketaddr(&addr.ip, addr.port) {
                        self.group.add_address(sock);
                    }
                }
            }
            NetMessage::Reject {
                message, reason, ..
            } => {
                warn!(
                    target: "spv",
                    peer = id,
                    command = %message,
                    reason = %reason,
                    "peer rejected our message"
                );
            }
            NetMessage::GetData(_) | NetMessage::GetHeaders { .. } => {
                // thin client serves nothing
                trace!(target: "spv", peer = id, "ignoring data request");
            }
            other => trace!(target: "spv", peer = id, command = other.command(), "ignored"),
        }
    }

    /// Feed a `headers` payload through the database. The first failing
    /// header closes the peer; remaining headers are dropped with it.
    fn on_headers(&mut self, id: PeerId, payload: &[u8]) {
        let mut r = Reader::new(payload);
        let count = match r.read_varint() {
            Ok(c) if c as usize <= MAX_HEADERS_RESULTS => c as usize,
            _ => {
                self.group.misbehaving(id, 100, "malformed headers message");
                return;
            }
        };
        trace!(target: "spv", peer = id, count, "headers batch");

        let mut new_tip: Option<BlockIndex> = None;
        let mut failed = false;
        for _ in 0..count {
            match self.headers_db.connect_header(&mut r, false) {
                Ok(ConnectOutcome::Connected { index, new_tip: promoted }) => {
                    if promoted {
                        self.handler.header_connected(&index);
                        new_tip = Some(index);
                    }
                }
                Ok(ConnectOutcome::AlreadyKnown(_)) => {}
                Err(Error::Consensus(ConsensusError::OrphanHeader)) => {
                    debug!(target: "spv", peer = id, "orphan header, closing peer");
                    self.group.misbehaving(id, 100, "orphan header");
                    failed = true;
                    break;
                }
                Err(e) => {
                    warn!(target: "spv", peer = id, error = %e, "header rejected, closing peer");
                    self.group.misbehaving(id, 100, "invalid header");
                    failed = true;
                    break;
                }
            }
            // per-entry transaction count, always zero in headers messages
            if r.remaining() > 0 {
                let _ = r.read_varint();
            }
        }

        if let Some(slot) = self.group.peer_mut(id) {
            slot.headers_requested_at = None;
        }
        self.group.start_height = self.headers_db.chaintip().height as i32;

        if !self.handler.header_message_processed(new_tip.as_ref()) {
            self.group.disconnect(id);
            return;
        }
        if failed {
            return;
        }

        if count < MAX_HEADERS_RESULTS {
            // caught up with this peer
            self.state_flags &= !HEADER_SYNC_FLAG;
            if !self.called_sync_completed {
                self.called_sync_completed = true;
                let tip = self.headers_db.chaintip().clone();
                info!(target: "spv", height = tip.height, "header sync completed");
                self.handler.sync_completed(&tip);
            }
            self.update_state_flags();
        } else {
            // more to come, keep the pipeline on the same peer
            self.send_getheaders(id);
        }
    }

    fn on_block(&mut self, id: PeerId, payload: &[u8]) {
        let mut r = Reader::new(payload);
        let block = match Block::deserialize(&mut r, self.params) {
            Ok(b) => b,
            Err(e) => {
                warn!(target: "spv", peer = id, error = %e, "undecodable block");
                self.group.misbehaving(id, 100, "malformed block");
                return;
            }
        };
        let hash = block.header.block_hash();
        self.requested_blocks.remove(&hash);
        if let Some(slot) = self.group.peer_mut(id) {
            slot.blocks_in_flight = slot.blocks_in_flight.saturating_sub(1);
        }
        let Some(index) = self.headers_db.find(&hash).cloned() else {
            debug!(target: "spv", peer = id, "block without connected header, dropped");
            return;
        };
        trace!(
            target: "spv",
            height = index.height,
            txs = block.transactions.len(),
            "processing block"
        );
        for (pos, tx) in block.transactions.iter().enumerate() {
            self.handler.sync_transaction(tx, pos as u32, &index);
        }
    }

    fn on_inv(&mut self, id: PeerId, items: &[InvItem]) {
        let block_items: Vec<&InvItem> = items
            .iter()
            .filter(|i| i.kind == InvType::Block)
            .collect();
        if block_items.is_empty() {
            return;
        }
        let unknown = block_items
            .iter()
            .any(|i| self.headers_db.find(&i.hash).is_none());
        if unknown {
            // an announcement ahead of our chain restarts header sync
            self.state_flags |= HEADER_SYNC_FLAG;
            self.called_sync_completed = false;
            self.request_headers();
        }
    }

    /// Pick one READY peer without an outstanding request and ask it for
    /// headers after our locator.
    fn request_headers(&mut self) {
        if self
            .group
            .peers()
            .any(|p| p.headers_requested_at.is_some())
        {
            return;
        }
        let candidate = self
            .group
            .peers()
            .find(|p| {
                p.state == crate::net::group::SlotState::Ready
                    && p.headers_requested_at.is_none()
            })
            .map(|p| p.id);
        if let Some(id) = candidate {
            self.send_getheaders(id);
        }
    }

    fn send_getheaders(&mut self, id: PeerId) {
        let locator = self.headers_db.fill_block_locator();
        trace!(target: "spv", peer = id, locator_len = locator.len(), "getheaders");
        self.group.send(
            id,
            NetMessage::GetHeaders {
                locator,
                stop: [0u8; 32],
            },
        );
        if let Some(slot) = self.group.peer_mut(id) {
            slot.headers_requested_at = Some(Instant::now());
        }
        self.last_headers_request = Some(Instant::now());
    }

    /// Ask for connected blocks newer than the wallet's oldest item that
    /// have not been fetched yet.
    fn request_blocks(&mut self) {
        let cutoff = self
            .config
            .oldest_item_of_interest
            .saturating_sub(TIMESTAMP_SLACK as u64) as u32;
        let mut wanted: Vec<Hash256> = Vec::new();
        let mut cursor = Some(self.headers_db.chaintip().clone());
        while let Some(index) = cursor {
            if index.header.timestamp < cutoff || index.prev.is_none() {
                break;
            }
            if !self.requested_blocks.contains_key(&index.hash) {
                wanted.push(index.hash);
            }
            cursor = index.prev.and_then(|p| self.headers_db.find(&p)).cloned();
        }
        if wanted.is_empty() {
            return;
        }
        wanted.reverse(); // oldest first

        let peers: Vec<PeerId> = self
            .group
            .peers()
            .filter(|p| {
                p.state == crate::net::group::SlotState::Ready
                    && p.blocks_in_flight < BLOCKS_IN_FLIGHT_PER_PEER
            })
            .map(|p| p.id)
            .collect();
        if peers.is_empty() {
            return;
        }
        let mut peer_cursor = 0usize;
        let mut batches: HashMap<PeerId, Vec<InvItem>> = HashMap::new();
        for hash in wanted {
            let id = peers[peer_cursor % peers.len()];
            peer_cursor += 1;
            let batch = batches.entry(id).or_default();
            if batch.len() >= BLOCKS_IN_FLIGHT_PER_PEER {
                continue;
            }
            batch.push(InvItem {
                kind: InvType::Block,
                hash,
            });
            self.requested_blocks.insert(hash, id);
        }
        for (id, items) in batches {
            let count = items.len();
            self.group.send(id, NetMessage::GetData(items));
            if let Some(slot) = self.group.peer_mut(id) {
                slot.blocks_in_flight += count;
            }
            debug!(target: "spv", peer = id, count, "blocks requested");
        }
    }

    /// Periodic tick: refresh flags, keep the header pipeline moving,
    /// expire stale requests, top up connections.
    fn periodic(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_statecheck) >= STATECHECK_INTERVAL {
            self.last_statecheck = now;
            self.update_state_flags();
        }

        if self.state_flags & HEADER_SYNC_FLAG != 0 && self.group.ready_count() > 0 {
            let due = match self.last_headers_request {
                Some(at) => now.duration_since(at) > HEADERS_REQUEST_INTERVAL,
                None => true,
            };
            if due {
                self.request_headers();
            }
        }

        if self.state_flags & FULLBLOCK_SYNC_FLAG != 0
            && self.state_flags & HEADER_SYNC_FLAG == 0
        {
            self.request_blocks();
        }

        // expire stale header requests
        let stale: Vec<PeerId> = self
            .group
            .peers()
            .filter(|p| {
                p.headers_requested_at
                    .map(|at| now.duration_since(at) > HEADERS_REQUEST_TIMEOUT)
                    .unwrap_or(false)
            })
            .map(|p| p.id)
            .collect();
        for id in stale {
            warn!(target: "spv", peer = id, "headers request timed out");
            self.group.disconnect(id);
        }

        self.group.connect_next();
    }

    fn update_state_flags(&mut self) {
        let tip_height = self.headers_db.chaintip().height as i32;
        let lagging = self
            .group
            .peers()
            .any(|p| p.state == crate::net::group::SlotState::Ready && p.best_height > tip_height);
        if lagging {
            if self.state_flags & HEADER_SYNC_FLAG == 0 {
                debug!(target: "spv", tip = tip_height, "behind a peer, resuming header sync");
            }
            self.state_flags |= HEADER_SYNC_FLAG;
            self.called_sync_completed = false;
        }

        let tip_time = self.headers_db.chaintip().header.timestamp as u64;
        let fullblocks = self.config.full_sync
            && (self.config.oldest_item_of_interest == 0
                || tip_time + TIMESTAMP_SLACK as u64 >= self.config.oldest_item_of_interest);
        if fullblocks {
            self.state_flags |= FULLBLOCK_SYNC_FLAG;
        } else {
            self.state_flags &= !FULLBLOCK_SYNC_FLAG;
        }
    }
}

fn netaddr_to_socketaddr(ip: &[u8; 16], port: u16) -> Option<SocketAddr> {
    // accept only v4-mapped addresses
    let (prefix, v4) = ip.split_at(12);
    if prefix != [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff] {
        return None;
    }
    let addr = Ipv4Addr::new(v4[0], v4[1], v4[2], v4[3]);
    if addr.is_unspecified() || addr.is_broadcast() {
        return None;
    }
    Some(SocketAddr::new(IpAddr::V4(addr), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::WriteExt;
    use crate::testutil::mine_child;

    #[derive(Default)]
    struct Recorder {
        connected: Vec<u32>,
        completed: bool,
    }

    impl SpvEvents for Recorder {
        fn header_connected(&mut self, tip: &BlockIndex) {
            self.connected.push(tip.height);
        }
        fn sync_completed(&mut self, _tip: &BlockIndex) {
            self.completed = true;
        }
    }

    fn headers_payload(headers: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.put_varint(headers.len() as u64);
        for raw in headers {
            payload.extend_from_slice(raw);
            payload.put_u8(0); // tx count
        }
        payload
    }

    fn client() -> SpvClient<Recorder> {
        let mut config = SpvConfig::new(ChainKind::Regtest);
        config.headers_memonly = true;
        SpvClient::new(config, Recorder::default())
    }

    #[tokio::test]
    async fn headers_message_advances_tip_and_completes() {
        let mut client = client();
        let genesis = client.headers_db.chaintip().hash;
        let h1 = mine_child(genesis, 1);
        let mut r = Reader::new(&h1);
        let hash1 = crate::block::BlockHeader::deserialize(&mut r)
            .unwrap()
            .block_hash();
        let h2 = mine_child(hash1, 2);

        let payload = headers_payload(&[h1, h2]);
        client.dispatch(PeerEvent::Message {
            id: 1,
            msg: NetMessage::Headers(payload),
        });

        assert_eq!(client.headers_db.chaintip().height, 2);
        assert_eq!(client.handler.connected, vec![1, 2]);
        assert!(client.handler.completed, "short batch completes sync");
        assert_eq!(client.state_flags() & HEADER_SYNC_FLAG, 0);
    }

    #[tokio::test]
    async fn unknown_block_inv_restarts_header_sync() {
        let mut client = client();
        // drain the initial sync state first
        client.dispatch(PeerEvent::Message {
            id: 1,
            msg: NetMessage::Headers(headers_payload(&[])),
        });
        assert_eq!(client.state_flags() & HEADER_SYNC_FLAG, 0);

        client.dispatch(PeerEvent::Message {
            id: 1,
            msg: NetMessage::Inv(vec![InvItem {
                kind: InvType::Block,
                hash: [0xab; 32],
            }]),
        });
        assert_ne!(client.state_flags() & HEADER_SYNC_FLAG, 0);
    }

    #[tokio::test]
    async fn block_message_drives_transaction_callbacks() {
        struct TxRecorder {
            seen: Vec<(u32, u32)>,
        }
        impl SpvEvents for TxRecorder {
            fn sync_transaction(&mut self, _tx: &Transaction, pos: u32, block: &BlockIndex) {
                self.seen.push((block.height, pos));
            }
        }

        let mut config = SpvConfig::new(ChainKind::Regtest);
        config.headers_memonly = true;
        let mut client = SpvClient::new(config, TxRecorder { seen: vec![] });

        let genesis = client.headers_db.chaintip().hash;
        let h1 = mine_child(genesis, 1);
        client.dispatch(PeerEvent::Message {
            id: 1,
            msg: NetMessage::Headers(headers_payload(&[h1.clone()])),
        });

        // block payload: the connected header plus two transactions
        let mut payload = h1.clone();
        payload.put_varint(2);
        crate::tx::coinbase_with_script(vec![0x51]).serialize(&mut payload);
        crate::tx::coinbase_with_script(vec![0x52]).serialize(&mut payload);
        client.dispatch(PeerEvent::Message {
            id: 1,
            msg: NetMessage::Block(payload),
        });

        assert_eq!(client.handler.seen, vec![(1, 0), (1, 1)]);
    }

    #[test]
    fn netaddr_mapping() {
        let mut ip = [0u8; 16];
        ip[10] = 0xff;
        ip[11] = 0xff;
        ip[12..].copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(
            netaddr_to_socketaddr(&ip, 22556),
            Some("1.2.3.4:22556".parse().unwrap())
        );
        assert_eq!(netaddr_to_socketaddr(&[0u8; 16], 22556), None);
    }
}
