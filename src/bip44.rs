//! BIP-44 account and address derivation:
//! `m / 44' / coin' / account' / change / index`.

use crate::bip32::HdNode;
use crate::chainparams::ChainParams;
use crate::error::{Error, ParseError};

/// Coin type 3 on mainnet (SLIP-44), 1 on test networks.
pub const COIN_TYPE_MAIN: u32 = 3;
pub const COIN_TYPE_TEST: u32 = 1;

/// Path strings are bounded to this many characters.
pub const MAX_PATH_LEN: usize = 255;

/// Highest derivable address index.
pub const MAX_ADDRESS_INDEX: u32 = 0x7fff_ffff;

/// External (receive) or internal (change) branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    External,
    Internal,
}

impl Change {
    fn digit(self) -> u32 {
        match self {
            Change::External => 0,
            Change::Internal => 1,
        }
    }
}

fn coin_type(params: &ChainParams) -> u32 {
    if params.name == "main" {
        COIN_TYPE_MAIN
    } else {
        COIN_TYPE_TEST
    }
}

/// Build the BIP-44 path string. `address_index` of `None` stops at the
/// account level.
pub fn bip44_path(
    params: &ChainParams,
    account: u32,
    change: Change,
    address_index: Option<u32>,
) -> Result<String, Error> {
    if account > MAX_ADDRESS_INDEX {
        return Err(ParseError::InvalidEncoding.into());
    }
    let mut path = format!("m/44'/{}'/{}'/{}", coin_type(params), account, change.digit());
    if let Some(index) = address_index {
        if index > MAX_ADDRESS_INDEX {
            return Err(ParseError::InvalidEncoding.into());
        }
        path.push('/');
        path.push_str(&index.to_string());
    }
    if path.len() > MAX_PATH_LEN {
        return Err(ParseError::InvalidEncoding.into());
    }
    Ok(path)
}

/// Derive a BIP-44 extended private key from a master node. A custom path
/// overrides `account` and `change`. Returns the path used alongside the
/// derived node.
pub fn derive_bip44_extended_private_key(
    master: &HdNode,
    params: &ChainParams,
    account: u32,
    change: Change,
    address_index: Option<u32>,
    custom_path: Option<&str>,
) -> Result<(String, HdNode), Error> {
    if !master.is_private() {
        return Err(crate::error::KeyError::InvalidKey.into());
    }
    derive_with_path(master, params, account, change, address_index, custom_path)
}

/// Public-key variant: derives the same path but returns a neutered node.
/// Hardened segments still require the master private key.
pub fn derive_bip44_extended_public_key(
    master: &HdNode,
    params: &ChainParams,
    account: u32,
    change: Change,
    address_index: Option<u32>,
    custom_path: Option<&str>,
) -> Result<(String, HdNode), Error> {
    let (path, node) =
        derive_with_path(master, params, account, change, address_index, custom_path)?;
    Ok((path, node.neutered()))
}

/// Derive a BIP-44 leaf and render its P2PKH address in one step.
pub fn derive_bip44_address(
    master: &HdNode,
    params: &ChainParams,
    account: u32,
    change: Change,
    index: u32,
) -> Result<(String, String), Error> {
    let (path, node) =
        derive_bip44_extended_private_key(master, params, account, change, Some(index), None)?;
    Ok((path, node.p2pkh_address(params)))
}

fn derive_with_path(
    master: &HdNode,
    params: &ChainParams,
    account: u32,
    change: Change,
    address_index: Option<u32>,
    custom_path: Option<&str>,
) -> Result<(String, HdNode), Error> {
    let path = match custom_path {
        Some(p) => {
            if p.len() > MAX_PATH_LEN {
                return Err(ParseError::InvalidEncoding.into());
            }
            p.to_string()
        }
        None => bip44_path(params, account, change, address_index)?,
    };
    let node = master.derive_path(&path)?;
    Ok((path, node))
}
