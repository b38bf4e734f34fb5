//! Headers database: an in-memory index of block headers keyed by hash,
//! with parent links, cumulative chainwork, optional file persistence and
//! reorg support.
//!
//! The best tip is the index with the highest chainwork; ties preserve the
//! incumbent. Records are appended to the persistence file whenever a
//! connected header becomes the new tip, and `disconnect_tip` truncates the
//! last record again.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::auxpow::check_auxpow;
use crate::block::{AuxPowBlock, BlockHeader};
use crate::chainparams::{hash_from_hex, ChainParams};
use crate::error::{ConsensusError, Error};
use crate::pow::check_pow;
use crate::serialize::{Reader, WriteExt};
use crate::uint256::Uint256;
use crate::Hash256;

/// Persistence file magic.
const FILE_MAGIC: u32 = 0xa8b0_fb61;
const FILE_VERSION: u32 = 1;
/// hash(32) + header(80) + height(4) + chainwork(32)
const RECORD_SIZE: u64 = 148;
const FILE_HEADER_SIZE: u64 = 12;

/// One node of the header tree. `prev` is `None` only for the chain bottom
/// (genesis or an explicit checkpoint start).
#[derive(Debug, Clone)]
pub struct BlockIndex {
    pub hash: Hash256,
    pub header: BlockHeader,
    pub height: u32,
    pub chainwork: Uint256,
    pub prev: Option<Hash256>,
}

/// Result of connecting a serialized header.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Newly validated and inserted; flag tells whether it became the tip.
    Connected { index: BlockIndex, new_tip: bool },
    /// Hash already present; the existing index is returned.
    AlreadyKnown(BlockIndex),
}

fn zero_header() -> BlockHeader {
    BlockHeader {
        version: 0,
        prev_block: [0u8; 32],
        merkle_root: [0u8; 32],
        timestamp: 0,
        bits: 0,
        nonce: 0,
    }
}

/// Hash-keyed header index. File-backed when `load` has attached a path,
/// memory-only otherwise.
pub struct HeadersDb {
    params: &'static ChainParams,
    index: HashMap<Hash256, BlockIndex>,
    tip: Hash256,
    bottom: Hash256,
    has_checkpoint_start: bool,
    file: Option<File>,
}

impl HeadersDb {
    /// Memory-only database seeded with the chain's genesis as bottom.
    pub fn new(params: &'static ChainParams) -> HeadersDb {
        let genesis = BlockIndex {
            hash: hash_from_hex(params.genesis_hash),
            header: zero_header(),
            height: 0,
            chainwork: Uint256::ZERO,
            prev: None,
        };
        let mut index = HashMap::new();
        let hash = genesis.hash;
        index.insert(hash, genesis);
        HeadersDb {
            params,
            index,
            tip: hash,
            bottom: hash,
            has_checkpoint_start: false,
            file: None,
        }
    }

    pub fn chaintip(&self) -> &BlockIndex {
        self.index.get(&self.tip).expect("tip is always indexed")
    }

    pub fn chain_bottom(&self) -> &BlockIndex {
        self.index
            .get(&self.bottom)
            .expect("bottom is always indexed")
    }

    pub fn find(&self, hash: &Hash256) -> Option<&BlockIndex> {
        self.index.get(hash)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.len() <= 1
    }

    pub fn has_checkpoint_start(&self) -> bool {
        self.has_checkpoint_start
    }

    /// Replace the chain bottom with a hard-coded checkpoint, assigning it
    /// the chain's minimum chainwork.
    pub fn set_checkpoint_start(&mut self, hash: Hash256, height: u32) {
        self.index.clear();
        let bottom = BlockIndex {
            hash,
            header: zero_header(),
            height,
            chainwork: self.params.min_chainwork(),
            prev: None,
        };
        self.index.insert(hash, bottom);
        self.tip = hash;
        self.bottom = hash;
        self.has_checkpoint_start = true;
        info!(target: "headersdb", height, "checkpoint start installed");
    }

    /// Attach a persistence file, replaying any existing records. A fresh
    /// file gets the preamble written immediately.
    pub fn load(&mut self, path: &Path) -> Result<u32, Error> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();

        if len == 0 {
            let mut preamble = Vec::with_capacity(FILE_HEADER_SIZE as usize);
            preamble.put_u32(FILE_MAGIC);
            preamble.put_u32(FILE_VERSION);
            preamble.extend_from_slice(&self.params.netmagic);
            file.write_all(&preamble)?;
            file.sync_data()?;
            self.file = Some(file);
            return Ok(0);
        }

        if len < FILE_HEADER_SIZE || (len - FILE_HEADER_SIZE) % RECORD_SIZE != 0 {
            return Err(ConsensusError::CorruptDatabase.into());
        }
        let mut preamble = [0u8; FILE_HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut preamble)?;
        let mut r = Reader::new(&preamble);
        let magic = r.read_u32().map_err(|_| ConsensusError::CorruptDatabase)?;
        let version = r.read_u32().map_err(|_| ConsensusError::CorruptDatabase)?;
        if magic != FILE_MAGIC || version != FILE_VERSION {
            return Err(ConsensusError::CorruptDatabase.into());
        }
        if preamble[8..12] != self.params.netmagic {
            warn!(target: "headersdb", "headers file belongs to a different chain");
            return Err(ConsensusError::CorruptDatabase.into());
        }

        let record_count = (len - FILE_HEADER_SIZE) / RECORD_SIZE;
        let mut loaded = 0u32;
        let mut buf = [0u8; RECORD_SIZE as usize];
        for _ in 0..record_count {
            file.read_exact(&mut buf)?;
            self.load_record(&buf)?;
            loaded += 1;
        }

        file.seek(SeekFrom::End(0))?;
        self.file = Some(file);
        info!(
            target: "headersdb",
            loaded,
            tip_height = self.chaintip().height,
            "headers database loaded"
        );
        Ok(loaded)
    }

    /// Reconstruct one persisted index entry. Parents must appear before
    /// children; the stored hash and chainwork are cross-checked.
    fn load_record(&mut self, buf: &[u8]) -> Result<(), Error> {
        let mut r = Reader::new(buf);
        let hash = r.read_hash().map_err(|_| ConsensusError::CorruptDatabase)?;
        let header =
            BlockHeader::deserialize(&mut r).map_err(|_| ConsensusError::CorruptDatabase)?;
        let height = r.read_u32().map_err(|_| ConsensusError::CorruptDatabase)?;
        let chainwork_bytes = r.read_hash().map_err(|_| ConsensusError::CorruptDatabase)?;
        let chainwork = Uint256::from_le_bytes(&chainwork_bytes);

        if header.block_hash() != hash {
            return Err(ConsensusError::CorruptDatabase.into());
        }
        if self.index.contains_key(&hash) {
            // replayed tip records may repeat after crashes; tolerate
            return Ok(());
        }
        let parent = self
            .index
            .get(&header.prev_block)
            .ok_or(ConsensusError::CorruptDatabase)?;
        if height != parent.height + 1 {
            return Err(ConsensusError::CorruptDatabase.into());
        }
        let (target, negative, overflow) = Uint256::from_compact(header.bits);
        if negative || overflow || target.is_zero() {
            return Err(ConsensusError::CorruptDatabase.into());
        }
        if parent.chainwork + target.work_from_target() != chainwork {
            return Err(ConsensusError::CorruptDatabase.into());
        }

        let prev = Some(header.prev_block);
        self.index.insert(
            hash,
            BlockIndex {
                hash,
                header,
                height,
                chainwork,
                prev,
            },
        );
        if chainwork > self.chaintip().chainwork {
            self.tip = hash;
        }
        Ok(())
    }

    /// Decode, validate and insert one serialized header (AuxPoW-aware).
    /// The reader is left positioned after the consumed header so callers
    /// can stream a `headers` payload through it.
    pub fn connect_header(
        &mut self,
        r: &mut Reader,
        load_phase: bool,
    ) -> Result<ConnectOutcome, Error> {
        let block = AuxPowBlock::deserialize(r, self.params)?;
        let header = block.header;
        let hash = header.block_hash();

        if let Some(existing) = self.index.get(&hash) {
            return Ok(ConnectOutcome::AlreadyKnown(existing.clone()));
        }
        let parent = self
            .index
            .get(&header.prev_block)
            .cloned()
            .ok_or(ConsensusError::OrphanHeader)?;

        let work = if self.params.auxpow_id && header.is_auxpow() {
            let aux = block.aux.as_ref().ok_or(ConsensusError::PowFailed)?;
            check_auxpow(&header, aux, self.params)?;
            check_pow(&aux.parent_header.pow_hash(), header.bits, self.params)?
        } else {
            check_pow(&header.pow_hash(), header.bits, self.params)?
        };

        let height = parent.height + 1;
        let chainwork = parent.chainwork + work;
        let entry = BlockIndex {
            hash,
            header,
            height,
            chainwork,
            prev: Some(header.prev_block),
        };
        self.index.insert(hash, entry.clone());

        let new_tip = chainwork > self.chaintip().chainwork;
        if new_tip {
            self.tip = hash;
            debug!(
                target: "headersdb",
                height,
                chainwork = %chainwork,
                "new chain tip"
            );
            if !load_phase {
                self.append_record(&entry)?;
            }
        }
        Ok(ConnectOutcome::Connected {
            index: entry,
            new_tip,
        })
    }

    fn append_record(&mut self, entry: &BlockIndex) -> Result<(), Error> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let mut buf = Vec::with_capacity(RECORD_SIZE as usize);
        buf.put_hash(&entry.hash);
        entry.header.serialize(&mut buf);
        buf.put_u32(entry.height);
        buf.put_hash(&entry.chainwork.to_le_bytes());
        file.write_all(&buf)?;
        file.sync_data()?;
        Ok(())
    }

    /// Unlink the current tip and fall back to its parent. Returns `false`
    /// at the chain bottom.
    pub fn disconnect_tip(&mut self) -> Result<bool, Error> {
        if self.tip == self.bottom {
            return Ok(false);
        }
        let removed = self
            .index
            .remove(&self.tip)
            .expect("tip is always indexed");
        let parent = removed.prev.expect("non-bottom index has a parent");
        self.tip = parent;
        if let Some(file) = self.file.as_mut() {
            let len = file.metadata()?.len();
            if len >= FILE_HEADER_SIZE + RECORD_SIZE {
                file.set_len(len - RECORD_SIZE)?;
                file.seek(SeekFrom::End(0))?;
                file.sync_data()?;
            }
        }
        debug!(
            target: "headersdb",
            height = self.chaintip().height,
            "tip disconnected"
        );
        Ok(true)
    }

    /// Sparse locator from the tip: one-by-one for the first ten, then a
    /// doubling stride, always terminated by the chain bottom.
    pub fn fill_block_locator(&self) -> Vec<Hash256> {
        let mut locator = Vec::new();
        let mut step = 1u32;
        let mut cursor = self.chaintip();
        loop {
            locator.push(cursor.hash);
            if cursor.hash == self.bottom {
                return locator;
            }
            if locator.len() >= 10 {
                step = step.saturating_mul(2);
            }
            for _ in 0..step {
                match cursor.prev.and_then(|p| self.index.get(&p)) {
                    Some(parent) => cursor = parent,
                    None => break,
                }
                if cursor.hash == self.bottom {
                    break;
                }
            }
        }
    }
}
