//! Hash primitives: double-SHA256, hash160 and the scrypt proof-of-work
//! digest.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::Hash256;

/// `SHA256(SHA256(data))`, the hash used for block ids, checksums and
/// message digests.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// `RIPEMD160(SHA256(data))`, the address hash.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let rip = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&rip);
    out
}

/// Scrypt PoW digest over a serialized header. N=1024, r=1, p=1; the
/// header is both password and salt.
pub fn scrypt_hash(header: &[u8]) -> Hash256 {
    let params = scrypt::Params::new(10, 1, 1, 32).expect("static scrypt params");
    let mut out = [0u8; 32];
    scrypt::scrypt(header, header, &params, &mut out).expect("32-byte output");
    out
}
