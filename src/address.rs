//! Address encoding: legacy Base58Check P2PKH/P2SH and bech32 P2WPKH.

use bech32::{ToBase32, Variant};

use crate::base58::{base58check_decode, base58check_encode};
use crate::chainparams::ChainParams;
use crate::error::ParseError;
use crate::hashing::hash160;

/// Shortest plausible Base58Check address (prefix + hash160 + checksum).
const MIN_ADDRESS_LEN: usize = 25;

/// P2PKH address for a serialized public key.
pub fn p2pkh_address(pubkey: &[u8], params: &ChainParams) -> String {
    let h160 = hash160(pubkey);
    let mut payload = Vec::with_capacity(21);
    payload.push(params.pubkey_prefix);
    payload.extend_from_slice(&h160);
    base58check_encode(&payload)
}

/// P2SH address for a 20-byte script hash.
pub fn p2sh_address(script_hash: &[u8; 20], params: &ChainParams) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(params.script_prefix);
    payload.extend_from_slice(script_hash);
    base58check_encode(&payload)
}

/// P2WPKH (witness v0) address for a serialized public key.
pub fn p2wpkh_address(pubkey: &[u8], params: &ChainParams) -> Result<String, ParseError> {
    let program = hash160(pubkey);
    let mut data = vec![bech32::u5::try_from_u8(0).expect("witness version 0")];
    data.extend(program.to_base32());
    bech32::encode(params.bech32_hrp, data, Variant::Bech32)
        .map_err(|_| ParseError::InvalidEncoding)
}

/// Length-and-checksum address validation. Decodes Base58Check, requires a
/// plausible payload length and a prefix byte known to the chain. No key
/// material is involved.
pub fn verify_p2pkh_address(address: &str, params: &ChainParams) -> bool {
    if address.len() < MIN_ADDRESS_LEN {
        return false;
    }
    match base58check_decode(address) {
        Ok(payload) => {
            payload.len() == 21
                && (payload[0] == params.pubkey_prefix || payload[0] == params.script_prefix)
        }
        Err(_) => false,
    }
}

/// Decode a P2PKH address back to its hash160, checking the chain prefix.
pub fn p2pkh_payload(address: &str, params: &ChainParams) -> Result<[u8; 20], ParseError> {
    let payload = base58check_decode(address)?;
    if payload.len() != 21 {
        return Err(ParseError::Truncated);
    }
    if payload[0] != params.pubkey_prefix {
        return Err(ParseError::UnknownPrefix);
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&payload[1..]);
    Ok(out)
}
