//! A single peer connection: TCP connect, version handshake, framed
//! message I/O and keep-alive.
//!
//! Each peer is a pair of tasks: a reader that decodes frames off the
//! socket and a control task that owns the write half, answers pings and
//! enforces timeouts. Commands arrive over a channel from the peer group;
//! everything the peer produces flows back to the engine loop as
//! `PeerEvent`s, so all protocol state above the handshake lives in one
//! place.

use std::net::SocketAddr;
use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, trace, warn};

use crate::error::NetError;
use crate::net::group::{CloseReason, PeerEvent, PeerId};
use crate::net::message::{
    decode_frame_header, encode_frame, verify_checksum, NetMessage, VersionMessage,
    FRAME_HEADER_SIZE,
};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const PING_TIMEOUT: Duration = Duration::from_secs(30);

/// Instructions from the group to a running peer task.
#[derive(Debug)]
pub enum PeerCommand {
    Send(NetMessage),
    Close,
}

/// Channel end used by the group to drive a peer task.
#[derive(Debug)]
pub struct PeerHandle {
    pub tx: mpsc::Sender<PeerCommand>,
}

/// Spawn the connection task for one outbound peer.
pub fn spawn_peer(
    id: PeerId,
    addr: SocketAddr,
    netmagic: [u8; 4],
    start_height: i32,
    events: mpsc::Sender<PeerEvent>,
) -> PeerHandle {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(run_peer(id, addr, netmagic, start_height, events, rx));
    PeerHandle { tx }
}

async fn read_frame(
    read: &mut OwnedReadHalf,
    netmagic: &[u8; 4],
) -> Result<NetMessage, NetError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    read.read_exact(&mut header)
        .await
        .map_err(|_| NetError::ConnectFailed)?;
    let (command, length, checksum) =
        decode_frame_header(netmagic, &header).map_err(|_| NetError::Protocol)?;
    let mut payload = vec![0u8; length as usize];
    read.read_exact(&mut payload)
        .await
        .map_err(|_| NetError::ConnectFailed)?;
    if !verify_checksum(&payload, &checksum) {
        return Err(NetError::Protocol);
    }
    NetMessage::decode(&command, &payload).map_err(|_| NetError::Protocol)
}

async fn write_message(
    write: &mut OwnedWriteHalf,
    netmagic: &[u8; 4],
    msg: &NetMessage,
) -> Result<(), NetError> {
    let frame = encode_frame(netmagic, msg);
    // a frozen peer must not wedge the sender
    timeout(Duration::from_secs(5), write.write_all(&frame))
        .await
        .map_err(|_| NetError::IdleTimeout)?
        .map_err(|_| NetError::ConnectFailed)?;
    Ok(())
}

async fn run_peer(
    id: PeerId,
    addr: SocketAddr,
    netmagic: [u8; 4],
    start_height: i32,
    events: mpsc::Sender<PeerEvent>,
    mut commands: mpsc::Receiver<PeerCommand>,
) {
    let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(s)) => s,
        _ => {
            debug!(target: "net", %addr, "connect failed");
            let _ = events
                .send(PeerEvent::Closed {
                    id,
                    reason: CloseReason::ConnectFailed,
                })
                .await;
            return;
        }
    };
    let _ = stream.set_nodelay(true);
    let (mut read, mut write) = stream.into_split();

    // frames arrive through a dedicated reader task; read_exact must not
    // race the select loop or partial frames would be lost
    let (frame_tx, mut frames) = mpsc::channel::<Result<NetMessage, NetError>>(64);
    let reader = tokio::spawn(async move {
        loop {
            let item = read_frame(&mut read, &netmagic).await;
            let failed = item.is_err();
            if frame_tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });

    // our side of the handshake goes out first
    let nonce = rand::thread_rng().next_u64();
    let now_ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let version = NetMessage::Version(VersionMessage::new(nonce, start_height, now_ts));
    if write_message(&mut write, &netmagic, &version).await.is_err() {
        reader.abort();
        let _ = events
            .send(PeerEvent::Closed {
                id,
                reason: CloseReason::ConnectFailed,
            })
            .await;
        return;
    }

    let handshake_deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    let mut last_activity = Instant::now();
    let mut remote_version: Option<VersionMessage> = None;
    let mut verack_received = false;
    let mut ready = false;
    let mut ping_sent: Option<(u64, Instant)> = None;
    let mut tick = interval(Duration::from_secs(1));

    let reason = loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(PeerCommand::Send(msg)) => {
                    trace!(target: "net", peer = id, command = msg.command(), "send");
                    if write_message(&mut write, &netmagic, &msg).await.is_err() {
                        break CloseReason::Remote;
                    }
                }
                Some(PeerCommand::Close) | None => break CloseReason::Shutdown,
            },
            frame = frames.recv() => {
                let msg = match frame {
                    Some(Ok(m)) => m,
                    Some(Err(NetError::Protocol)) => {
                        warn!(target: "net", peer = id, %addr, "protocol violation");
                        break CloseReason::Protocol;
                    }
                    Some(Err(_)) | None => break CloseReason::Remote,
                };
                last_activity = Instant::now();
                match msg {
                    NetMessage::Version(v) => {
                        if v.nonce == nonce {
                            // connected to ourselves
                            break CloseReason::Protocol;
                        }
                        remote_version = Some(v);
                        if write_message(&mut write, &netmagic, &NetMessage::Verack).await.is_err() {
                            break CloseReason::Remote;
                        }
                    }
                    NetMessage::Verack => verack_received = true,
                    NetMessage::Ping(n) => {
                        if write_message(&mut write, &netmagic, &NetMessage::Pong(n)).await.is_err() {
                            break CloseReason::Remote;
                        }
                    }
                    NetMessage::Pong(n) => {
                        match ping_sent {
                            Some((expected, _)) if expected == n => ping_sent = None,
                            _ => trace!(target: "net", peer = id, "unsolicited pong"),
                        }
                    }
                    other => {
                        if events.send(PeerEvent::Message { id, msg: other }).await.is_err() {
                            break CloseReason::Shutdown;
                        }
                    }
                }
                if !ready && verack_received {
                    if let Some(v) = remote_version.clone() {
                        ready = true;
                        debug!(
                            target: "net",
                            peer = id,
                            %addr,
                            agent = %v.user_agent,
                            height = v.start_height,
                            "handshake complete"
                        );
                        if events.send(PeerEvent::Ready { id, version: v }).await.is_err() {
                            break CloseReason::Shutdown;
                        }
                    }
                }
            },
            _ = tick.tick() => {
                let now = Instant::now();
                if !ready && now >= handshake_deadline {
                    warn!(target: "net", peer = id, %addr, "handshake timeout");
                    break CloseReason::HandshakeTimeout;
                }
                if let Some((_, sent_at)) = ping_sent {
                    if now.duration_since(sent_at) > PING_TIMEOUT {
                        break CloseReason::IdleTimeout;
                    }
                } else if ready && now.duration_since(last_activity) > IDLE_TIMEOUT {
                    let n = rand::thread_rng().next_u64();
                    if write_message(&mut write, &netmagic, &NetMessage::Ping(n)).await.is_err() {
                        break CloseReason::Remote;
                    }
                    ping_sent = Some((n, now));
                }
            },
        }
    };

    reader.abort();
    let _ = write.shutdown().await;
    let _ = events.send(PeerEvent::Closed { id, reason }).await;
}
