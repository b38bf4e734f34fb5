//! Error taxonomy for the crate.
//!
//! Parse and key errors are returned to the caller. Consensus errors during
//! header connection close the offending peer. Network errors drop the peer
//! and trigger a reconnect attempt.

use thiserror::Error;

/// Errors raised while decoding wire or address data.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("input truncated")]
    Truncated,
    #[error("invalid varint encoding")]
    InvalidVarint,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("unknown address prefix")]
    UnknownPrefix,
    #[error("merkle branch too long")]
    ExcessiveBranch,
    #[error("invalid encoding")]
    InvalidEncoding,
}

/// Errors raised by key handling and signatures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid private key")]
    InvalidKey,
    #[error("derived child key out of range")]
    InvalidChild,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("public key recovery failed")]
    RecoveryFailed,
    #[error("recovered address does not match")]
    AddressMismatch,
}

/// AuxPoW rejection sub-reasons.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxPowError {
    #[error("wrong chain id")]
    WrongChainId,
    #[error("merkle branch too long")]
    BranchTooLong,
    #[error("merged-mining magic missing or duplicated")]
    MagicMissing,
    #[error("chain merkle index mismatch")]
    IndexMismatch,
    #[error("merkle root mismatch")]
    MerkleMismatch,
}

/// Consensus-level failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("proof of work check failed")]
    PowFailed,
    #[error("auxpow check failed: {0}")]
    AuxPow(#[from] AuxPowError),
    #[error("header does not connect to a known parent")]
    OrphanHeader,
    #[error("headers database corrupt")]
    CorruptDatabase,
}

/// Network-level failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    #[error("protocol violation")]
    Protocol,
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("connection idle timeout")]
    IdleTimeout,
    #[error("connect failed")]
    ConnectFailed,
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Net(#[from] NetError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AuxPowError> for Error {
    fn from(e: AuxPowError) -> Self {
        Error::Consensus(ConsensusError::AuxPow(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
