//! BIP-32 hierarchical deterministic keys.
//!
//! An `HdNode` carries either a private key (full derivation) or only a
//! public key (non-hardened derivation). Secret material, including the
//! chain code, is zeroed on drop.

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey as SecpPublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;
use zeroize::Zeroize;

use crate::base58::{base58check_decode, base58check_encode};
use crate::chainparams::ChainParams;
use crate::error::{Error, KeyError, ParseError};
use crate::hashing::hash160;
use crate::keys::SecretBytes;

type HmacSha512 = Hmac<Sha512>;

/// Child indices at or above this bit are hardened.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// One node of a BIP-32 tree.
#[derive(Clone)]
pub struct HdNode {
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_index: u32,
    chain_code: SecretBytes,
    private_key: Option<SecretBytes>,
    public_key: [u8; 33],
}

impl HdNode {
    /// Seed a master node. The seed must be 16–64 bytes.
    pub fn from_seed(seed: &[u8]) -> Result<HdNode, Error> {
        if seed.len() < 16 || seed.len() > 64 {
            return Err(KeyError::InvalidKey.into());
        }
        let mut mac =
            HmacSha512::new_from_slice(b"Bitcoin seed").expect("hmac accepts any key length");
        mac.update(seed);
        let digest = mac.finalize().into_bytes();

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&digest[..32]);
        let sk = SecretKey::from_slice(&secret).map_err(|_| KeyError::InvalidKey)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);

        let secp = Secp256k1::new();
        let public_key = SecpPublicKey::from_secret_key(&secp, &sk).serialize();

        let node = HdNode {
            depth: 0,
            parent_fingerprint: [0; 4],
            child_index: 0,
            chain_code: SecretBytes(chain_code),
            private_key: Some(SecretBytes(secret)),
            public_key,
        };
        secret.zeroize();
        chain_code.zeroize();
        Ok(node)
    }

    pub fn is_private(&self) -> bool {
        self.private_key.is_some()
    }

    pub fn public_key_bytes(&self) -> &[u8; 33] {
        &self.public_key
    }

    pub fn private_key_bytes(&self) -> Option<&[u8; 32]> {
        self.private_key.as_ref().map(|s| &s.0)
    }

    pub fn chain_code_bytes(&self) -> &[u8; 32] {
        &self.chain_code.0
    }

    /// First four bytes of hash160 of the public key.
    pub fn fingerprint(&self) -> [u8; 4] {
        let h = hash160(&self.public_key);
        [h[0], h[1], h[2], h[3]]
    }

    /// CKD. Hardened indices require the private key. A tweak landing on
    /// zero or out of range yields `InvalidChild`; the caller retries at
    /// the next index.
    pub fn derive_child(&self, index: u32) -> Result<HdNode, Error> {
        let hardened = index >= HARDENED_OFFSET;
        let parent_secret = match (&self.private_key, hardened) {
            (Some(s), _) => Some(s),
            (None, true) => return Err(KeyError::InvalidChild.into()),
            (None, false) => None,
        };

        let mut mac = HmacSha512::new_from_slice(&self.chain_code.0)
            .expect("hmac accepts any key length");
        if hardened {
            mac.update(&[0u8]);
            mac.update(&parent_secret.expect("checked above").0);
        } else {
            mac.update(&self.public_key);
        }
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let mut tweak_bytes = [0u8; 32];
        tweak_bytes.copy_from_slice(&digest[..32]);
        let tweak =
            Scalar::from_be_bytes(tweak_bytes).map_err(|_| KeyError::InvalidChild)?;
        tweak_bytes.zeroize();
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&digest[32..]);

        let secp = Secp256k1::new();
        let (child_private, child_public) = match parent_secret {
            Some(s) => {
                let sk = SecretKey::from_slice(&s.0).expect("validated at construction");
                let child = sk.add_tweak(&tweak).map_err(|_| KeyError::InvalidChild)?;
                let pk = SecpPublicKey::from_secret_key(&secp, &child);
                (Some(SecretBytes(child.secret_bytes())), pk.serialize())
            }
            None => {
                let pk = SecpPublicKey::from_slice(&self.public_key)
                    .map_err(|_| KeyError::InvalidKey)?;
                let child = pk
                    .add_exp_tweak(&secp, &tweak)
                    .map_err(|_| KeyError::InvalidChild)?;
                (None, child.serialize())
            }
        };

        let node = HdNode {
            depth: self.depth.wrapping_add(1),
            parent_fingerprint: self.fingerprint(),
            child_index: index,
            chain_code: SecretBytes(chain_code),
            private_key: child_private,
            public_key: child_public,
        };
        chain_code.zeroize();
        Ok(node)
    }

    /// Drop the private half, leaving a public-derivation-only node.
    pub fn neutered(&self) -> HdNode {
        HdNode {
            depth: self.depth,
            parent_fingerprint: self.parent_fingerprint,
            child_index: self.child_index,
            chain_code: self.chain_code.clone(),
            private_key: None,
            public_key: self.public_key,
        }
    }

    /// Derive along a path string such as `m/44'/3'/0'/0/0`. Both `'` and
    /// `h` mark hardened segments.
    pub fn derive_path(&self, path: &str) -> Result<HdNode, Error> {
        let mut segments = path.split('/');
        match segments.next() {
            Some("m") | Some("M") => {}
            _ => return Err(ParseError::InvalidEncoding.into()),
        }
        let mut node = self.clone();
        for seg in segments {
            if seg.is_empty() {
                return Err(ParseError::InvalidEncoding.into());
            }
            let (digits, hardened) = match seg.strip_suffix('\'').or_else(|| seg.strip_suffix('h'))
            {
                Some(d) => (d, true),
                None => (seg, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| Error::from(ParseError::InvalidEncoding))?;
            if index >= HARDENED_OFFSET {
                return Err(ParseError::InvalidEncoding.into());
            }
            let index = if hardened { index + HARDENED_OFFSET } else { index };
            node = node.derive_child(index)?;
        }
        Ok(node)
    }

    /// Serialize to the Base58Check extended-key form using the chain's
    /// BIP-32 version prefix.
    pub fn to_extended_string(&self, params: &ChainParams, private: bool) -> Option<String> {
        let mut payload = Vec::with_capacity(78);
        let version = if private {
            self.private_key.as_ref()?;
            params.bip32_privkey
        } else {
            params.bip32_pubkey
        };
        payload.extend_from_slice(&version.to_be_bytes());
        payload.push(self.depth);
        payload.extend_from_slice(&self.parent_fingerprint);
        payload.extend_from_slice(&self.child_index.to_be_bytes());
        payload.extend_from_slice(&self.chain_code.0);
        if private {
            payload.push(0x00);
            payload.extend_from_slice(&self.private_key.as_ref()?.0);
        } else {
            payload.extend_from_slice(&self.public_key);
        }
        let s = base58check_encode(&payload);
        payload.zeroize();
        Some(s)
    }

    /// Parse an extended key serialized with the chain's version prefixes.
    pub fn from_extended_string(s: &str, params: &ChainParams) -> Result<HdNode, Error> {
        let mut payload = base58check_decode(s)?;
        if payload.len() != 78 {
            payload.zeroize();
            return Err(ParseError::Truncated.into());
        }
        let version = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let private = if version == params.bip32_privkey {
            true
        } else if version == params.bip32_pubkey {
            false
        } else {
            payload.zeroize();
            return Err(ParseError::UnknownPrefix.into());
        };

        let depth = payload[4];
        let mut parent_fingerprint = [0u8; 4];
        parent_fingerprint.copy_from_slice(&payload[5..9]);
        let child_index = u32::from_be_bytes([payload[9], payload[10], payload[11], payload[12]]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);

        let node = if private {
            if payload[45] != 0x00 {
                payload.zeroize();
                return Err(ParseError::InvalidEncoding.into());
            }
            let mut secret = [0u8; 32];
            secret.copy_from_slice(&payload[46..78]);
            let sk = SecretKey::from_slice(&secret).map_err(|_| KeyError::InvalidKey)?;
            let secp = Secp256k1::new();
            let public_key = SecpPublicKey::from_secret_key(&secp, &sk).serialize();
            let node = HdNode {
                depth,
                parent_fingerprint,
                child_index,
                chain_code: SecretBytes(chain_code),
                private_key: Some(SecretBytes(secret)),
                public_key,
            };
            secret.zeroize();
            node
        } else {
            let mut public_key = [0u8; 33];
            public_key.copy_from_slice(&payload[45..78]);
            SecpPublicKey::from_slice(&public_key).map_err(|_| KeyError::InvalidKey)?;
            HdNode {
                depth,
                parent_fingerprint,
                child_index,
                chain_code: SecretBytes(chain_code),
                private_key: None,
                public_key,
            }
        };
        chain_code.zeroize();
        payload.zeroize();
        Ok(node)
    }
}

impl HdNode {
    /// P2PKH address of this node's public key.
    pub fn p2pkh_address(&self, params: &ChainParams) -> String {
        crate::address::p2pkh_address(&self.public_key, params)
    }
}

/// Generate a fresh random master node, returning its serialized extended
/// private key alongside the node itself.
pub fn generate_hd_master_keypair(params: &ChainParams) -> Result<(String, HdNode), Error> {
    use rand::RngCore;
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let node = HdNode::from_seed(&seed)?;
    seed.zeroize();
    let xprv = node
        .to_extended_string(params, true)
        .expect("fresh master holds a private key");
    Ok((xprv, node))
}

impl std::fmt::Debug for HdNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdNode")
            .field("depth", &self.depth)
            .field("child_index", &self.child_index)
            .field("is_private", &self.is_private())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::MAINNET;

    // BIP-32 test vector 1
    const SEED: &str = "000102030405060708090a0b0c0d0e0f";

    #[test]
    fn master_from_seed_vector_one() {
        let seed = hex::decode(SEED).unwrap();
        let node = HdNode::from_seed(&seed).unwrap();
        assert_eq!(
            hex::encode(node.private_key_bytes().unwrap()),
            "e8f32e723decf4051aefac8e2c93c9c5b214313817cdb01a1494b917c8436b35"
        );
        assert_eq!(
            hex::encode(node.chain_code_bytes()),
            "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508"
        );
    }

    #[test]
    fn hardened_child_vector_one() {
        let seed = hex::decode(SEED).unwrap();
        let node = HdNode::from_seed(&seed).unwrap();
        let child = node.derive_child(HARDENED_OFFSET).unwrap();
        assert_eq!(
            hex::encode(child.private_key_bytes().unwrap()),
            "edb2e14f9ee77d26dd93b4ecede8d16ed408ce149b6cd80b0715a2d911a0afea"
        );
        let grandchild = child.derive_child(1).unwrap();
        assert_eq!(
            hex::encode(grandchild.private_key_bytes().unwrap()),
            "3c6cb8d0f6a264c91ea8b5030fadaa8e538b020f0a387421a12de9319dc93368"
        );
    }

    #[test]
    fn public_derivation_matches_private() {
        let seed = hex::decode(SEED).unwrap();
        let node = HdNode::from_seed(&seed).unwrap();
        let child_priv = node.derive_child(7).unwrap();
        let child_pub = node.neutered().derive_child(7).unwrap();
        assert_eq!(child_priv.public_key_bytes(), child_pub.public_key_bytes());
        assert!(!child_pub.is_private());
    }

    #[test]
    fn public_node_cannot_derive_hardened() {
        let seed = hex::decode(SEED).unwrap();
        let node = HdNode::from_seed(&seed).unwrap().neutered();
        assert!(node.derive_child(HARDENED_OFFSET).is_err());
    }

    #[test]
    fn path_derivation_equals_stepwise() {
        let seed = hex::decode(SEED).unwrap();
        let node = HdNode::from_seed(&seed).unwrap();
        let by_path = node.derive_path("m/44'/3'/0'/0/0").unwrap();
        let stepwise = node
            .derive_child(44 + HARDENED_OFFSET)
            .unwrap()
            .derive_child(3 + HARDENED_OFFSET)
            .unwrap()
            .derive_child(HARDENED_OFFSET)
            .unwrap()
            .derive_child(0)
            .unwrap()
            .derive_child(0)
            .unwrap();
        assert_eq!(by_path.public_key_bytes(), stepwise.public_key_bytes());
        assert_eq!(by_path.depth, 5);
    }

    #[test]
    fn extended_string_round_trip() {
        let seed = hex::decode(SEED).unwrap();
        let node = HdNode::from_seed(&seed).unwrap();
        let xprv = node.to_extended_string(&MAINNET, true).unwrap();
        let xpub = node.to_extended_string(&MAINNET, false).unwrap();
        assert!(xprv.starts_with("dgpv"), "got {xprv}");
        assert!(xpub.starts_with("dgub"), "got {xpub}");

        let parsed = HdNode::from_extended_string(&xprv, &MAINNET).unwrap();
        assert_eq!(
            parsed.private_key_bytes().unwrap(),
            node.private_key_bytes().unwrap()
        );
        let parsed_pub = HdNode::from_extended_string(&xpub, &MAINNET).unwrap();
        assert!(!parsed_pub.is_private());
        assert_eq!(parsed_pub.public_key_bytes(), node.public_key_bytes());
    }

    #[test]
    fn master_keypair_round_trips_through_address() {
        let (xprv, node) = generate_hd_master_keypair(&MAINNET).unwrap();
        let parsed = HdNode::from_extended_string(&xprv, &MAINNET).unwrap();
        assert_eq!(parsed.public_key_bytes(), node.public_key_bytes());
        let addr = node.p2pkh_address(&MAINNET);
        assert!(crate::address::verify_p2pkh_address(&addr, &MAINNET));
    }

    #[test]
    fn seed_length_bounds() {
        assert!(HdNode::from_seed(&[0u8; 15]).is_err());
        assert!(HdNode::from_seed(&[0u8; 16]).is_ok());
        assert!(HdNode::from_seed(&[0u8; 64]).is_ok());
        assert!(HdNode::from_seed(&[0u8; 65]).is_err());
    }
}
