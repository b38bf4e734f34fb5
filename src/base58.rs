//! Base58Check: Base58 with a 4-byte double-SHA256 checksum suffix.

use crate::error::ParseError;
use crate::hashing::double_sha256;

/// Append the checksum and Base58-encode.
pub fn base58check_encode(payload: &[u8]) -> String {
    let checksum = double_sha256(payload);
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    data.extend_from_slice(&checksum[..4]);
    bs58::encode(data).into_string()
}

/// Decode and verify the checksum, returning the payload without it.
pub fn base58check_decode(s: &str) -> Result<Vec<u8>, ParseError> {
    let data = bs58::decode(s)
        .into_vec()
        .map_err(|_| ParseError::InvalidEncoding)?;
    if data.len() < 4 {
        return Err(ParseError::Truncated);
    }
    let (payload, checksum) = data.split_at(data.len() - 4);
    let expected = double_sha256(payload);
    if checksum != &expected[..4] {
        return Err(ParseError::ChecksumMismatch);
    }
    Ok(payload.to_vec())
}
