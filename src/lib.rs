//! Dogecoin protocol core: wallet primitives, AuxPoW header validation and
//! an SPV header-synchronisation engine.
//!
//! The crate splits into two halves sharing the arithmetic and hashing
//! primitives:
//!
//! - the wallet half: keys and WIF ([`keys`]), BIP-32/BIP-44 derivation
//!   ([`bip32`], [`bip44`]), addresses ([`address`]) and signed messages
//!   ([`signmsg`]);
//! - the chain half: header codec ([`block`]), merge-mining validation
//!   ([`auxpow`]), proof-of-work ([`pow`]), the headers database
//!   ([`headersdb`]) and the networked SPV client ([`spv`] over [`net`]).
//!
//! Consensus rules follow Dogecoin bit-for-bit: scrypt proof of work,
//! AuxPoW after the fork, compact targets and cumulative-chainwork tip
//! selection.

pub mod address;
pub mod auxpow;
pub mod base58;
pub mod bip32;
pub mod bip44;
pub mod block;
pub mod chainparams;
pub mod error;
pub mod hashing;
pub mod headersdb;
pub mod keys;
pub mod koinu;
pub mod net;
pub mod pow;
pub mod serialize;
pub mod signmsg;
pub mod spv;
pub mod tx;
pub mod uint256;

#[cfg(test)]
pub(crate) mod testutil;

/// A raw 32-byte hash in internal (little-endian) byte order.
pub type Hash256 = [u8; 32];

pub use chainparams::{ChainKind, ChainParams, MAINNET, REGTEST, TESTNET};
pub use error::{Error, Result};
pub use headersdb::{BlockIndex, HeadersDb};
pub use keys::{PrivateKey, PublicKey};
pub use spv::{SpvClient, SpvConfig, SpvEvents};
pub use uint256::Uint256;
