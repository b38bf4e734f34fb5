//! Peer-to-peer networking: wire message codec, a per-peer connection task
//! and the peer group that owns the pool.

pub mod group;
pub mod message;
pub mod peer;

pub use group::{GroupConfig, PeerEvent, PeerGroup, PeerId};
pub use message::{InvItem, InvType, NetMessage, VersionMessage, PROTOCOL_VERSION};
