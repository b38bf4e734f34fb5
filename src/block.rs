//! Block header codec, legacy and AuxPoW-tagged.
//!
//! The fixed 80-byte layout is
//! `version | prev | merkle_root | time | bits | nonce`, all little-endian.
//! When the chain allows merge mining and the version carries the AuxPoW
//! bit, the header is followed on the wire by the parent coinbase, the
//! parent hash, two merkle branches and the parent header.

use crate::chainparams::ChainParams;
use crate::error::ParseError;
use crate::hashing::{double_sha256, scrypt_hash};
use crate::serialize::{Reader, WriteExt};
use crate::tx::Transaction;
use crate::Hash256;

/// Version bit flagging an attached merge-mining proof.
pub const VERSION_AUXPOW_BIT: i32 = 0x100;

/// Merkle branches above this length are rejected.
pub const MAX_MERKLE_BRANCH: usize = 30;

pub const HEADER_SIZE: usize = 80;

/// Chain id embedded in the upper 16 bits of a header version.
pub fn version_chain_id(version: i32) -> i32 {
    version >> 16
}

pub fn version_is_auxpow(version: i32) -> bool {
    version & VERSION_AUXPOW_BIT != 0
}

/// Pre-fork headers: base version below 2, or no chain id at all.
pub fn version_is_legacy(version: i32) -> bool {
    version < (2 << 16) || version_chain_id(version) == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn deserialize(r: &mut Reader) -> Result<BlockHeader, ParseError> {
        Ok(BlockHeader {
            version: r.read_i32()?,
            prev_block: r.read_hash()?,
            merkle_root: r.read_hash()?,
            timestamp: r.read_u32()?,
            bits: r.read_u32()?,
            nonce: r.read_u32()?,
        })
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        out.put_i32(self.version);
        out.put_hash(&self.prev_block);
        out.put_hash(&self.merkle_root);
        out.put_u32(self.timestamp);
        out.put_u32(self.bits);
        out.put_u32(self.nonce);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        self.serialize(&mut buf);
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Block id: double-SHA256 of the 80 bytes.
    pub fn block_hash(&self) -> Hash256 {
        double_sha256(&self.to_bytes())
    }

    /// Proof-of-work digest: scrypt of the 80 bytes.
    pub fn pow_hash(&self) -> Hash256 {
        scrypt_hash(&self.to_bytes())
    }

    pub fn is_auxpow(&self) -> bool {
        version_is_auxpow(self.version)
    }

    pub fn chain_id(&self) -> i32 {
        version_chain_id(self.version)
    }
}

/// A merkle path plus the leaf position it proves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBranch {
    pub hashes: Vec<Hash256>,
    pub index: u32,
}

impl MerkleBranch {
    fn deserialize(r: &mut Reader) -> Result<MerkleBranch, ParseError> {
        let count = r.read_varint()? as usize;
        if count > MAX_MERKLE_BRANCH {
            return Err(ParseError::ExcessiveBranch);
        }
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            hashes.push(r.read_hash()?);
        }
        let index = r.read_u32()?;
        Ok(MerkleBranch { hashes, index })
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        out.put_varint(self.hashes.len() as u64);
        for h in &self.hashes {
            out.put_hash(h);
        }
        out.put_u32(self.index);
    }
}

/// The merge-mining proof attached to an AuxPoW header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxPow {
    pub parent_coinbase: Transaction,
    pub parent_hash: Hash256,
    pub coinbase_branch: MerkleBranch,
    pub aux_branch: MerkleBranch,
    pub parent_header: BlockHeader,
}

/// A header with its optional merge-mining proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxPowBlock {
    pub header: BlockHeader,
    pub aux: Option<AuxPow>,
}

impl AuxPowBlock {
    /// Decode a header, consuming the AuxPoW extension when the chain
    /// declares merge mining and the version flags it.
    pub fn deserialize(r: &mut Reader, params: &ChainParams) -> Result<AuxPowBlock, ParseError> {
        let header = BlockHeader::deserialize(r)?;
        let aux = if params.auxpow_id && header.is_auxpow() {
            let parent_coinbase = Transaction::deserialize(r)?;
            let parent_hash = r.read_hash()?;
            let coinbase_branch = MerkleBranch::deserialize(r)?;
            let aux_branch = MerkleBranch::deserialize(r)?;
            let parent_header = BlockHeader::deserialize(r)?;
            Some(AuxPow {
                parent_coinbase,
                parent_hash,
                coinbase_branch,
                aux_branch,
                parent_header,
            })
        } else {
            None
        };
        Ok(AuxPowBlock { header, aux })
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        self.header.serialize(out);
        if let Some(aux) = &self.aux {
            aux.parent_coinbase.serialize(out);
            out.put_hash(&aux.parent_hash);
            aux.coinbase_branch.serialize(out);
            aux.aux_branch.serialize(out);
            aux.parent_header.serialize(out);
        }
    }
}

/// A full block: header plus transactions, as delivered by a `block`
/// message.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub aux: Option<AuxPow>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn deserialize(r: &mut Reader, params: &ChainParams) -> Result<Block, ParseError> {
        let AuxPowBlock { header, aux } = AuxPowBlock::deserialize(r, params)?;
        let count = r.read_varint()? as usize;
        let mut transactions = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            transactions.push(Transaction::deserialize(r)?);
        }
        Ok(Block {
            header,
            aux,
            transactions,
        })
    }
}
