//! Shared helpers for unit tests.

use crate::block::BlockHeader;
use crate::chainparams::REGTEST;
use crate::uint256::Uint256;
use crate::Hash256;

/// Grind a regtest header on `parent` until its scrypt digest meets the
/// regtest target, returning the serialized 80 bytes.
pub(crate) fn mine_child(parent: Hash256, salt: u32) -> Vec<u8> {
    let mut merkle_root = [0u8; 32];
    merkle_root[..4].copy_from_slice(&salt.to_le_bytes());
    merkle_root[4] = 0xaa;
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
    header.to_bytes().to_vec()
}
