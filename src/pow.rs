//! Proof-of-work checks and chainwork accounting.

use crate::chainparams::ChainParams;
use crate::error::ConsensusError;
use crate::uint256::Uint256;
use crate::Hash256;

/// Validate a PoW digest against a compact target. The digest is
/// scrypt(header) for legacy headers and scrypt(parent header) for AuxPoW
/// headers. Returns the work contributed by the block.
pub fn check_pow(
    pow_hash: &Hash256,
    bits: u32,
    params: &ChainParams,
) -> Result<Uint256, ConsensusError> {
    let (target, negative, overflow) = Uint256::from_compact(bits);
    if negative || overflow || target.is_zero() || target > params.pow_limit() {
        return Err(ConsensusError::PowFailed);
    }
    if Uint256::from_le_bytes(pow_hash) > target {
        return Err(ConsensusError::PowFailed);
    }
    Ok(target.work_from_target())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::{MAINNET, REGTEST};

    #[test]
    fn zero_hash_meets_any_valid_target() {
        let work = check_pow(&[0u8; 32], 0x1e0fffff, &MAINNET).unwrap();
        assert!(!work.is_zero());
    }

    #[test]
    fn hash_above_target_rejected() {
        // all-ones digest is numerically maximal
        assert_eq!(
            check_pow(&[0xff; 32], 0x1e0fffff, &MAINNET),
            Err(ConsensusError::PowFailed)
        );
    }

    #[test]
    fn target_above_pow_limit_rejected() {
        // regtest limit is far looser than mainnet's
        assert_eq!(
            check_pow(&[0u8; 32], REGTEST.pow_limit_bits, &MAINNET),
            Err(ConsensusError::PowFailed)
        );
        assert!(check_pow(&[0u8; 32], REGTEST.pow_limit_bits, &REGTEST).is_ok());
    }

    #[test]
    fn degenerate_bits_rejected() {
        // zero target
        assert_eq!(
            check_pow(&[0u8; 32], 0, &MAINNET),
            Err(ConsensusError::PowFailed)
        );
        // negative
        assert_eq!(
            check_pow(&[0u8; 32], 0x01803456, &MAINNET),
            Err(ConsensusError::PowFailed)
        );
        // overflowing
        assert_eq!(
            check_pow(&[0u8; 32], 0x23000001, &MAINNET),
            Err(ConsensusError::PowFailed)
        );
    }

    #[test]
    fn harder_target_contributes_more_work() {
        let easy = check_pow(&[0u8; 32], 0x1e0fffff, &MAINNET).unwrap();
        let hard = check_pow(&[0u8; 32], 0x1d00ffff, &MAINNET).unwrap();
        assert!(hard > easy);
    }

    #[test]
    fn boundary_hash_accepted() {
        // digest exactly equal to the target passes
        let (target, _, _) = Uint256::from_compact(0x1e0fffff);
        let digest = target.to_le_bytes();
        assert!(check_pow(&digest, 0x1e0fffff, &MAINNET).is_ok());
    }
}
