//! SPV client against a scripted peer: full TCP handshake, locator-driven
//! getheaders, headers delivery, sync-completed shutdown.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use dogecoin_spv::block::BlockHeader;
use dogecoin_spv::headersdb::BlockIndex;
use dogecoin_spv::net::message::{
    decode_frame_header, encode_frame, verify_checksum, NetMessage, VersionMessage,
    FRAME_HEADER_SIZE,
};
use dogecoin_spv::serialize::WriteExt;
use dogecoin_spv::spv::{SpvClient, SpvConfig, SpvEvents};
use dogecoin_spv::{ChainKind, Hash256, Uint256, REGTEST};

const MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

fn mine(parent: Hash256, salt: u32) -> BlockHeader {
    let mut merkle_root = [0u8; 32];
    merkle_root[..4].copy_from_slice(&salt.to_le_bytes());
    let mut header = BlockHeader {
        version: 2,
        prev_block: parent,
        merkle_root,
        timestamp: 1_600_000_000 + salt,
        bits: REGTEST.pow_limit_bits,
        nonce: 0,
    };
    let target = REGTEST.pow_limit();
    while Uint256::from_le_bytes(&header.pow_hash()) > target {
        header.nonce += 1;
    }
    header
}

fn chain_of(len: u32) -> Vec<BlockHeader> {
    let mut parent = REGTEST.genesis();
    let mut out = Vec::new();
    for i in 0..len {
        let header = mine(parent, i);
        parent = header.block_hash();
        out.push(header);
    }
    out
}

fn headers_message(headers: &[BlockHeader]) -> NetMessage {
    let mut payload = Vec::new();
    payload.put_varint(headers.len() as u64);
    for h in headers {
        h.serialize(&mut payload);
        payload.put_u8(0);
    }
    NetMessage::Headers(payload)
}

async fn read_message(stream: &mut TcpStream) -> NetMessage {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    stream.read_exact(&mut header).await.expect("frame header");
    let (command, length, checksum) =
        decode_frame_header(&MAGIC, &header).expect("well-formed frame");
    let mut payload = vec![0u8; length as usize];
    stream.read_exact(&mut payload).await.expect("payload");
    assert!(verify_checksum(&payload, &checksum), "checksum");
    NetMessage::decode(&command, &payload).expect("decodable message")
}

async fn send_message(stream: &mut TcpStream, msg: &NetMessage) {
    let frame = encode_frame(&MAGIC, msg);
    stream.write_all(&frame).await.expect("send");
}

/// Serve one scripted peer session: handshake, then answer the first
/// getheaders with the supplied chain.
async fn scripted_peer(listener: TcpListener, chain: Vec<BlockHeader>) {
    let (mut stream, _) = listener.accept().await.expect("accept");

    // client speaks first
    let first = read_message(&mut stream).await;
    let client_version = match first {
        NetMessage::Version(v) => v,
        other => panic!("expected version, got {other:?}"),
    };
    assert!(!client_version.user_agent.is_empty());

    let version = VersionMessage::new(0x5eed, chain.len() as i32, 1_600_000_100);
    send_message(&mut stream, &NetMessage::Version(version)).await;
    send_message(&mut stream, &NetMessage::Verack).await;

    loop {
        match read_message(&mut stream).await {
            NetMessage::Verack => continue,
            NetMessage::GetHeaders { locator, .. } => {
                assert_eq!(
                    *locator.last().unwrap(),
                    REGTEST.genesis(),
                    "locator ends at the chain bottom"
                );
                send_message(&mut stream, &headers_message(&chain)).await;
                break;
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    // linger so the client can finish processing before we vanish
    let mut scratch = [0u8; 1024];
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut scratch)).await;
}

struct SyncDone {
    tx: mpsc::UnboundedSender<u32>,
    connected: u32,
}

impl SpvEvents for SyncDone {
    fn header_connected(&mut self, _tip: &BlockIndex) {
        self.connected += 1;
    }
    fn sync_completed(&mut self, tip: &BlockIndex) {
        let _ = self.tx.send(tip.height);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn syncs_headers_from_scripted_peer() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let chain = chain_of(5);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(scripted_peer(listener, chain));

    let mut config = SpvConfig::new(ChainKind::Regtest);
    config.headers_memonly = true;
    config.max_nodes = 1;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut client = SpvClient::new(
        config,
        SyncDone {
            tx: done_tx,
            connected: 0,
        },
    );
    client
        .discover_peers(Some(&format!("127.0.0.1:{port}")))
        .await;

    let handle = client.shutdown_handle();
    let stopper = tokio::spawn(async move {
        let height = tokio::time::timeout(Duration::from_secs(20), done_rx.recv())
            .await
            .expect("sync must complete")
            .expect("handler alive");
        handle.shutdown();
        height
    });

    client.run().await;

    let synced_height = stopper.await.unwrap();
    assert_eq!(synced_height, 5);
    assert_eq!(client.headers_db.chaintip().height, 5);
    server.abort();
}
