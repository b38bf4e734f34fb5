//! Bitcoin-compatible signed messages over a Dogecoin-prefixed digest.
//!
//! The signature is 65 bytes, `{header, r, s}`, Base64-encoded. The header
//! byte carries the recovery id plus the compression flag, so verification
//! recovers the public key and compares its P2PKH address against the
//! claimed one.

use base64::{engine::general_purpose, Engine as _};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};

use crate::address::p2pkh_address;
use crate::chainparams::chain_from_b58_prefix;
use crate::error::{Error, KeyError};
use crate::hashing::double_sha256;
use crate::keys::PrivateKey;
use crate::serialize::WriteExt;
use crate::Hash256;

const MESSAGE_PREFIX: &[u8] = b"Dogecoin Signed Message:\n";

/// Double-SHA256 of the varint-framed prefix and message.
pub fn message_digest(msg: &[u8]) -> Hash256 {
    let mut data = Vec::with_capacity(MESSAGE_PREFIX.len() + msg.len() + 4);
    data.put_varint(MESSAGE_PREFIX.len() as u64);
    data.extend_from_slice(MESSAGE_PREFIX);
    data.put_varint(msg.len() as u64);
    data.extend_from_slice(msg);
    double_sha256(&data)
}

/// Sign a message, producing the Base64 form.
pub fn sign_message(key: &PrivateKey, msg: &str) -> Result<String, Error> {
    let digest = message_digest(msg.as_bytes());
    let secp = Secp256k1::new();
    let m = Message::from_slice(&digest).map_err(|_| KeyError::InvalidSignature)?;
    let sig = secp.sign_ecdsa_recoverable(&m, &key.secp_secret());
    let (rec_id, compact) = sig.serialize_compact();

    let mut out = [0u8; 65];
    out[0] = 27 + rec_id.to_i32() as u8 + if key.compressed { 4 } else { 0 };
    out[1..].copy_from_slice(&compact);
    Ok(general_purpose::STANDARD.encode(out))
}

/// Verify a Base64 signature against a message and a P2PKH address. The
/// chain is inferred from the address prefix.
pub fn verify_message(sig_b64: &str, msg: &str, address: &str) -> Result<(), Error> {
    let raw = general_purpose::STANDARD
        .decode(sig_b64)
        .map_err(|_| KeyError::InvalidSignature)?;
    if raw.len() != 65 {
        return Err(KeyError::InvalidSignature.into());
    }
    let header = raw[0];
    if !(27..27 + 8).contains(&header) {
        return Err(KeyError::InvalidSignature.into());
    }
    let compressed = (header - 27) & 4 != 0;
    let rec_id = RecoveryId::from_i32(((header - 27) & 3) as i32)
        .map_err(|_| KeyError::InvalidSignature)?;
    let sig = RecoverableSignature::from_compact(&raw[1..], rec_id)
        .map_err(|_| KeyError::InvalidSignature)?;

    let digest = message_digest(msg.as_bytes());
    let secp = Secp256k1::new();
    let m = Message::from_slice(&digest).map_err(|_| KeyError::InvalidSignature)?;
    let pubkey = secp
        .recover_ecdsa(&m, &sig)
        .map_err(|_| KeyError::RecoveryFailed)?;

    let params = chain_from_b58_prefix(address)?;
    let serialized = if compressed {
        pubkey.serialize().to_vec()
    } else {
        pubkey.serialize_uncompressed().to_vec()
    };
    if p2pkh_address(&serialized, params) != address {
        return Err(KeyError::AddressMismatch.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::{MAINNET, TESTNET};
    use crate::error::KeyError;

    const WIF: &str = "QWCcckTzUBiY1g3GFixihAscwHAKXeXY76v7Gcxhp3HUEAcBv33i";
    const ADDRESS: &str = "D8mQ2sKYpLbFCQLhGeHCPBmkLJRi6kRoSg";

    #[test]
    fn sign_then_verify() {
        let (key, _) = PrivateKey::from_wif(WIF).unwrap();
        let sig = sign_message(&key, "Hello World!").unwrap();
        verify_message(&sig, "Hello World!", ADDRESS).unwrap();
    }

    #[test]
    fn altered_message_fails() {
        let (key, _) = PrivateKey::from_wif(WIF).unwrap();
        let sig = sign_message(&key, "Hello World!").unwrap();
        let res = verify_message(&sig, "This is a new test message", ADDRESS);
        assert!(matches!(
            res,
            Err(Error::Key(KeyError::AddressMismatch)) | Err(Error::Key(KeyError::RecoveryFailed))
        ));
        // original message still verifies afterwards
        verify_message(&sig, "Hello World!", ADDRESS).unwrap();
    }

    #[test]
    fn wrong_address_fails() {
        let (key, _) = PrivateKey::from_wif(WIF).unwrap();
        let other = PrivateKey::generate();
        let sig = sign_message(&key, "bleh").unwrap();
        let res = verify_message(&sig, "bleh", &other.p2pkh_address(&MAINNET));
        assert!(matches!(res, Err(Error::Key(KeyError::AddressMismatch))));
    }

    #[test]
    fn fresh_keys_round_trip() {
        for _ in 0..4 {
            let key = PrivateKey::generate();
            let addr = key.p2pkh_address(&MAINNET);
            let sig = sign_message(&key, "This is a test message").unwrap();
            verify_message(&sig, "This is a test message", &addr).unwrap();
        }
    }

    #[test]
    fn testnet_address_verifies() {
        let key = PrivateKey::generate();
        let addr = key.p2pkh_address(&TESTNET);
        let sig = sign_message(&key, "bleh").unwrap();
        verify_message(&sig, "bleh", &addr).unwrap();
    }

    #[test]
    fn uncompressed_flag_respected() {
        let mut key = PrivateKey::generate();
        key.compressed = false;
        let addr = key.p2pkh_address(&MAINNET);
        let sig = sign_message(&key, "uncompressed").unwrap();
        verify_message(&sig, "uncompressed", &addr).unwrap();
    }

    #[test]
    fn malformed_signature_rejected() {
        assert!(verify_message("not-base64!!", "x", ADDRESS).is_err());
        let short = general_purpose::STANDARD.encode([0u8; 10]);
        assert!(verify_message(&short, "x", ADDRESS).is_err());
    }
}
