//! Minimal Bitcoin transaction codec. The SPV core needs this for two
//! things: the parent-chain coinbase inside an AuxPoW proof and the
//! transactions of fetched full blocks. Script execution is out of scope;
//! scripts are opaque byte strings here.

use crate::error::ParseError;
use crate::hashing::double_sha256;
use crate::serialize::{Reader, WriteExt};
use crate::Hash256;

/// Scripts above this size are rejected outright.
const MAX_SCRIPT_LEN: usize = 10_000;
/// Sanity cap on input/output/witness counts.
const MAX_ITEMS: u64 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub locktime: u32,
}

impl Transaction {
    /// Decode from wire form. Handles the segwit marker/flag layout used by
    /// parent chains; witness stacks are parsed and kept on the inputs.
    pub fn deserialize(r: &mut Reader) -> Result<Transaction, ParseError> {
        let version = r.read_i32()?;

        let mut in_count = r.read_varint()?;
        let mut segwit = false;
        if in_count == 0 {
            // marker 0x00 followed by flag 0x01
            let flag = r.read_u8()?;
            if flag != 0x01 {
                return Err(ParseError::InvalidEncoding);
            }
            segwit = true;
            in_count = r.read_varint()?;
        }
        if in_count > MAX_ITEMS {
            return Err(ParseError::InvalidVarint);
        }

        let mut inputs = Vec::with_capacity(in_count as usize);
        for _ in 0..in_count {
            let hash = r.read_hash()?;
            let index = r.read_u32()?;
            let script_sig = r.read_var_bytes(MAX_SCRIPT_LEN)?;
            let sequence = r.read_u32()?;
            inputs.push(TxIn {
                prevout: OutPoint { hash, index },
                script_sig,
                sequence,
                witness: Vec::new(),
            });
        }

        let out_count = r.read_varint()?;
        if out_count > MAX_ITEMS {
            return Err(ParseError::InvalidVarint);
        }
        let mut outputs = Vec::with_capacity(out_count as usize);
        for _ in 0..out_count {
            let value = r.read_i64()?;
            let script_pubkey = r.read_var_bytes(MAX_SCRIPT_LEN)?;
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }

        if segwit {
            for input in &mut inputs {
                let items = r.read_varint()?;
                if items > MAX_ITEMS {
                    return Err(ParseError::InvalidVarint);
                }
                for _ in 0..items {
                    input.witness.push(r.read_var_bytes(MAX_SCRIPT_LEN)?);
                }
            }
        }

        let locktime = r.read_u32()?;
        Ok(Transaction {
            version,
            inputs,
            outputs,
            locktime,
        })
    }

    /// Serialize without witness data: the legacy layout the txid is
    /// computed over.
    pub fn serialize_legacy(&self, out: &mut Vec<u8>) {
        out.put_i32(self.version);
        out.put_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            out.put_hash(&input.prevout.hash);
            out.put_u32(input.prevout.index);
            out.put_var_bytes(&input.script_sig);
            out.put_u32(input.sequence);
        }
        out.put_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            out.put_i64(output.value);
            out.put_var_bytes(&output.script_pubkey);
        }
        out.put_u32(self.locktime);
    }

    /// Full wire serialization; emits the marker/flag and witness stacks
    /// when any input carries witness data.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        let has_witness = self.inputs.iter().any(|i| !i.witness.is_empty());
        if !has_witness {
            return self.serialize_legacy(out);
        }
        out.put_i32(self.version);
        out.put_u8(0x00);
        out.put_u8(0x01);
        out.put_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            out.put_hash(&input.prevout.hash);
            out.put_u32(input.prevout.index);
            out.put_var_bytes(&input.script_sig);
            out.put_u32(input.sequence);
        }
        out.put_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            out.put_i64(output.value);
            out.put_var_bytes(&output.script_pubkey);
        }
        for input in &self.inputs {
            out.put_varint(input.witness.len() as u64);
            for item in &input.witness {
                out.put_var_bytes(item);
            }
        }
        out.put_u32(self.locktime);
    }

    /// Double-SHA256 of the legacy serialization.
    pub fn txid(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(256);
        self.serialize_legacy(&mut buf);
        double_sha256(&buf)
    }

    /// True when the single input spends the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prevout.hash == [0u8; 32]
            && self.inputs[0].prevout.index == u32::MAX
    }
}

/// A coinbase skeleton used by tests and proof construction.
pub fn coinbase_with_script(script_sig: Vec<u8>) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            prevout: OutPoint {
                hash: [0u8; 32],
                index: u32::MAX,
            },
            script_sig,
            sequence: u32::MAX,
            witness: Vec::new(),
        }],
        outputs: vec![TxOut {
            value: 0,
            script_pubkey: Vec::new(),
        }],
        locktime: 0,
    }
}
