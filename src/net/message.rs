//! Dogecoin P2P wire format (protocol v70015).
//!
//! Frames are `magic(4) | command(12, null-padded) | length(4) |
//! checksum(4) | payload`, the checksum being the first four bytes of the
//! payload's double-SHA256. Payload codecs cover the commands the SPV core
//! speaks; anything else decodes to `Unknown` and is ignored upstream.

use crate::error::ParseError;
use crate::hashing::double_sha256;
use crate::serialize::{Reader, WriteExt};
use crate::Hash256;

pub const PROTOCOL_VERSION: u32 = 70015;
pub const USER_AGENT: &str = "/dogecoin-spv:0.1.0/";
/// Node services we advertise: none (we are a thin client).
pub const NODE_SERVICES: u64 = 0;
/// Upper bound a `headers` response may carry.
pub const MAX_HEADERS_RESULTS: usize = 2000;
/// Frames larger than this are a protocol violation.
pub const MAX_PAYLOAD_SIZE: u32 = 0x0200_0000;

pub const FRAME_HEADER_SIZE: usize = 24;

const MAX_INV_ITEMS: u64 = 50_000;
const MAX_ADDR_ITEMS: u64 = 1000;
const MAX_LOCATOR_HASHES: u64 = 101;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Tx,
    Block,
    Other(u32),
}

impl InvType {
    fn to_u32(self) -> u32 {
        match self {
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::Other(v) => v,
        }
    }

    fn from_u32(v: u32) -> InvType {
        match v {
            1 => InvType::Tx,
            2 => InvType::Block,
            other => InvType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvItem {
    pub kind: InvType,
    pub hash: Hash256,
}

/// Network address as embedded in `version` (no timestamp) and `addr`
/// (with timestamp). IPv4 travels v6-mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddress {
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

impl NetAddress {
    pub fn unspecified() -> NetAddress {
        NetAddress {
            services: 0,
            ip: [0u8; 16],
            port: 0,
        }
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        out.put_u64(self.services);
        out.extend_from_slice(&self.ip);
        out.extend_from_slice(&self.port.to_be_bytes());
    }

    fn deserialize(r: &mut Reader) -> Result<NetAddress, ParseError> {
        let services = r.read_u64()?;
        let mut ip = [0u8; 16];
        ip.copy_from_slice(r.read_bytes(16)?);
        let port_bytes = r.read_bytes(2)?;
        Ok(NetAddress {
            services,
            ip,
            port: u16::from_be_bytes([port_bytes[0], port_bytes[1]]),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: NetAddress,
    pub addr_from: NetAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl VersionMessage {
    pub fn new(nonce: u64, start_height: i32, timestamp: i64) -> VersionMessage {
        VersionMessage {
            version: PROTOCOL_VERSION,
            services: NODE_SERVICES,
            timestamp,
            addr_recv: NetAddress::unspecified(),
            addr_from: NetAddress::unspecified(),
            nonce,
            user_agent: USER_AGENT.to_string(),
            start_height,
            relay: false,
        }
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        out.put_u32(self.version);
        out.put_u64(self.services);
        out.put_i64(self.timestamp);
        self.addr_recv.serialize(out);
        self.addr_from.serialize(out);
        out.put_u64(self.nonce);
        out.put_var_bytes(self.user_agent.as_bytes());
        out.put_i32(self.start_height);
        out.put_u8(self.relay as u8);
    }

    fn deserialize(r: &mut Reader) -> Result<VersionMessage, ParseError> {
        let version = r.read_u32()?;
        let services = r.read_u64()?;
        let timestamp = r.read_i64()?;
        let addr_recv = NetAddress::deserialize(r)?;
        let addr_from = NetAddress::deserialize(r)?;
        let nonce = r.read_u64()?;
        let agent_bytes = r.read_var_bytes(256)?;
        let user_agent = String::from_utf8_lossy(&agent_bytes).into_owned();
        let start_height = r.read_i32()?;
        // relay flag is optional in old serializations
        let relay = if r.remaining() > 0 {
            r.read_u8()? != 0
        } else {
            false
        };
        Ok(VersionMessage {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

/// Decoded wire messages the SPV core understands. `headers` and `block`
/// payloads stay raw because decoding them needs chain parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetMessage {
    Version(VersionMessage),
    Verack,
    Ping(u64),
    Pong(u64),
    Addr(Vec<(u32, NetAddress)>),
    Inv(Vec<InvItem>),
    GetData(Vec<InvItem>),
    GetHeaders { locator: Vec<Hash256>, stop: Hash256 },
    Headers(Vec<u8>),
    Block(Vec<u8>),
    Reject { message: String, code: u8, reason: String },
    Unknown { command: String },
}

impl NetMessage {
    pub fn command(&self) -> &str {
        match self {
            NetMessage::Version(_) => "version",
            NetMessage::Verack => "verack",
            NetMessage::Ping(_) => "ping",
            NetMessage::Pong(_) => "pong",
            NetMessage::Addr(_) => "addr",
            NetMessage::Inv(_) => "inv",
            NetMessage::GetData(_) => "getdata",
            NetMessage::GetHeaders { .. } => "getheaders",
            NetMessage::Headers(_) => "headers",
            NetMessage::Block(_) => "block",
            NetMessage::Reject { .. } => "reject",
            NetMessage::Unknown { command } => command,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            NetMessage::Version(v) => v.serialize(&mut out),
            NetMessage::Verack | NetMessage::Unknown { .. } => {}
            NetMessage::Ping(nonce) | NetMessage::Pong(nonce) => out.put_u64(*nonce),
            NetMessage::Addr(entries) => {
                out.put_varint(entries.len() as u64);
                for (time, addr) in entries {
                    out.put_u32(*time);
                    addr.serialize(&mut out);
                }
            }
            NetMessage::Inv(items) | NetMessage::GetData(items) => {
                out.put_varint(items.len() as u64);
                for item in items {
                    out.put_u32(item.kind.to_u32());
                    out.put_hash(&item.hash);
                }
            }
            NetMessage::GetHeaders { locator, stop } => {
                out.put_u32(PROTOCOL_VERSION);
                out.put_varint(locator.len() as u64);
                for hash in locator {
                    out.put_hash(hash);
                }
                out.put_hash(stop);
            }
            NetMessage::Headers(raw) | NetMessage::Block(raw) => out.extend_from_slice(raw),
            NetMessage::Reject {
                message,
                code,
                reason,
            } => {
                out.put_var_bytes(message.as_bytes());
                out.put_u8(*code);
                out.put_var_bytes(reason.as_bytes());
            }
        }
        out
    }

    pub fn decode(command: &str, payload: &[u8]) -> Result<NetMessage, ParseError> {
        let mut r = Reader::new(payload);
        let msg = match command {
            "version" => NetMessage::Version(VersionMessage::deserialize(&mut r)?),
            "verack" => NetMessage::Verack,
            "ping" => NetMessage::Ping(r.read_u64()?),
            "pong" => NetMessage::Pong(r.read_u64()?),
            "addr" => {
                let count = r.read_varint()?;
                if count > MAX_ADDR_ITEMS {
                    return Err(ParseError::InvalidVarint);
                }
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let time = r.read_u32()?;
                    entries.push((time, NetAddress::deserialize(&mut r)?));
                }
                NetMessage::Addr(entries)
            }
            "inv" | "getdata" => {
                let count = r.read_varint()?;
                if count > MAX_INV_ITEMS {
                    return Err(ParseError::InvalidVarint);
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let kind = InvType::from_u32(r.read_u32()?);
                    items.push(InvItem {
                        kind,
                        hash: r.read_hash()?,
                    });
                }
                if command == "inv" {
                    NetMessage::Inv(items)
                } else {
                    NetMessage::GetData(items)
                }
            }
            "getheaders" => {
                let _version = r.read_u32()?;
                let count = r.read_varint()?;
                if count > MAX_LOCATOR_HASHES {
                    return Err(ParseError::InvalidVarint);
                }
                let mut locator = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    locator.push(r.read_hash()?);
                }
                let stop = r.read_hash()?;
                NetMessage::GetHeaders { locator, stop }
            }
            "headers" => NetMessage::Headers(payload.to_vec()),
            "block" => NetMessage::Block(payload.to_vec()),
            "reject" => {
                let message = String::from_utf8_lossy(&r.read_var_bytes(64)?).into_owned();
                let code = r.read_u8()?;
                let reason = String::from_utf8_lossy(&r.read_var_bytes(256)?).into_owned();
                NetMessage::Reject {
                    message,
                    code,
                    reason,
                }
            }
            other => NetMessage::Unknown {
                command: other.to_string(),
            },
        };
        Ok(msg)
    }
}

/// Assemble a complete frame for a message.
pub fn encode_frame(netmagic: &[u8; 4], msg: &NetMessage) -> Vec<u8> {
    let payload = msg.encode_payload();
    let checksum = double_sha256(&payload);
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(netmagic);
    let mut command = [0u8; 12];
    let name = msg.command().as_bytes();
    command[..name.len()].copy_from_slice(name);
    out.extend_from_slice(&command);
    out.put_u32(payload.len() as u32);
    out.extend_from_slice(&checksum[..4]);
    out.extend_from_slice(&payload);
    out
}

/// Parsed frame header: command string and expected payload length and
/// checksum. Magic mismatch is a protocol violation.
pub fn decode_frame_header(
    netmagic: &[u8; 4],
    header: &[u8; FRAME_HEADER_SIZE],
) -> Result<(String, u32, [u8; 4]), ParseError> {
    if &header[..4] != netmagic {
        return Err(ParseError::InvalidEncoding);
    }
    let command_raw = &header[4..16];
    let end = command_raw
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(command_raw.len());
    if command_raw[end..].iter().any(|&b| b != 0) {
        return Err(ParseError::InvalidEncoding);
    }
    let command = std::str::from_utf8(&command_raw[..end])
        .map_err(|_| ParseError::InvalidEncoding)?
        .to_string();
    let length = u32::from_le_bytes([header[16], header[17], header[18], header[19]]);
    if length > MAX_PAYLOAD_SIZE {
        return Err(ParseError::InvalidEncoding);
    }
    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&header[20..24]);
    Ok((command, length, checksum))
}

/// Verify a payload against the checksum from its frame header.
pub fn verify_checksum(payload: &[u8], checksum: &[u8; 4]) -> bool {
    double_sha256(payload)[..4] == checksum[..]
}
