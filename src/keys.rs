//! EC keypairs and the Wallet Import Format.
//!
//! Secret bytes live in a zeroize-on-drop container; `secp256k1::SecretKey`
//! values are constructed transiently at the call sites that need them.

use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{PublicKey as SecpPublicKey, Secp256k1, SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::address::{p2pkh_address, verify_p2pkh_address};
use crate::base58::{base58check_decode, base58check_encode};
use crate::chainparams::{chain_from_b58_prefix, ChainParams};
use crate::error::{Error, KeyError, ParseError};

/// 32 secret bytes, zeroed on drop along every exit path.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(pub(crate) [u8; 32]);

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBytes(<redacted>)")
    }
}

/// A private key plus its compression preference.
#[derive(Debug, Clone)]
pub struct PrivateKey {
    secret: SecretBytes,
    pub compressed: bool,
}

/// A serialized public point: 33 bytes compressed or 65 uncompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

impl PrivateKey {
    /// Draw 32 random bytes, rejecting values outside `[1, n-1]`.
    pub fn generate() -> PrivateKey {
        let mut buf = [0u8; 32];
        loop {
            OsRng.fill_bytes(&mut buf);
            if SecretKey::from_slice(&buf).is_ok() {
                let key = PrivateKey {
                    secret: SecretBytes(buf),
                    compressed: true,
                };
                buf.zeroize();
                return key;
            }
        }
    }

    /// Build from raw secret bytes; rejects zero and out-of-range scalars.
    pub fn from_bytes(bytes: [u8; 32], compressed: bool) -> Result<PrivateKey, Error> {
        SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidKey)?;
        Ok(PrivateKey {
            secret: SecretBytes(bytes),
            compressed,
        })
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret.0
    }

    pub(crate) fn secp_secret(&self) -> SecretKey {
        SecretKey::from_slice(&self.secret.0).expect("validated at construction")
    }

    /// `Base58Check({secret_prefix} || secret || 0x01-if-compressed)`.
    pub fn to_wif(&self, params: &ChainParams) -> String {
        let mut payload = Vec::with_capacity(34);
        payload.push(params.secret_prefix);
        payload.extend_from_slice(&self.secret.0);
        if self.compressed {
            payload.push(0x01);
        }
        let wif = base58check_encode(&payload);
        payload.zeroize();
        wif
    }

    /// Decode WIF, detecting the chain from the prefix byte.
    pub fn from_wif(wif: &str) -> Result<(PrivateKey, &'static ChainParams), Error> {
        let mut payload = base58check_decode(wif)?;
        let params = chain_from_b58_prefix(wif).map_err(|_| ParseError::UnknownPrefix)?;
        if payload.first() != Some(&params.secret_prefix) {
            payload.zeroize();
            return Err(ParseError::UnknownPrefix.into());
        }
        let compressed = match payload.len() {
            33 => false,
            34 if payload[33] == 0x01 => true,
            _ => {
                payload.zeroize();
                return Err(KeyError::InvalidKey.into());
            }
        };
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&payload[1..33]);
        payload.zeroize();
        let key = PrivateKey::from_bytes(secret, compressed);
        secret.zeroize();
        key.map(|k| (k, params))
    }

    /// Derive `secret · G`.
    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        let pk = SecpPublicKey::from_secret_key(&secp, &self.secp_secret());
        let bytes = if self.compressed {
            pk.serialize().to_vec()
        } else {
            pk.serialize_uncompressed().to_vec()
        };
        PublicKey { bytes }
    }

    pub fn p2pkh_address(&self, params: &ChainParams) -> String {
        p2pkh_address(self.public_key().as_bytes(), params)
    }
}

impl PublicKey {
    pub fn from_slice(bytes: &[u8]) -> Result<PublicKey, Error> {
        SecpPublicKey::from_slice(bytes).map_err(|_| KeyError::InvalidKey)?;
        Ok(PublicKey {
            bytes: bytes.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// Generate a fresh WIF private key and its P2PKH address in one step.
pub fn generate_keypair(params: &ChainParams) -> (String, String) {
    let key = PrivateKey::generate();
    (key.to_wif(params), key.p2pkh_address(params))
}

/// Pair-check: the WIF secret must derive the given public key.
pub fn verify_keypair(wif: &str, pubkey_hex: &str) -> Result<(), Error> {
    let (key, _) = PrivateKey::from_wif(wif)?;
    let derived = key.public_key();
    let claimed = hex::decode(pubkey_hex).map_err(|_| ParseError::InvalidEncoding)?;
    if derived.as_bytes() != claimed.as_slice() {
        return Err(KeyError::InvalidKey.into());
    }
    Ok(())
}

/// Pair-check against an address: WIF → pubkey → P2PKH must equal it, and
/// the address itself must pass the checksum test.
pub fn verify_wif_address(wif: &str, address: &str) -> Result<(), Error> {
    let (key, params) = PrivateKey::from_wif(wif)?;
    if !verify_p2pkh_address(address, params) {
        return Err(KeyError::AddressMismatch.into());
    }
    if key.p2pkh_address(params) != address {
        return Err(KeyError::AddressMismatch.into());
    }
    Ok(())
}
