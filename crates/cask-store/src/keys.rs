//! Content-key derivation and validation.
//!
//! Keys are `sha512-` followed by the first half of the hex-encoded SHA-512
//! of the decompressed image bytes. The truncation is part of the on-disk
//! format: 256 bits of collision resistance retained, half the path length.

use sha2::{Digest, Sha512};

use crate::StoreError;

pub(crate) const HASH_PREFIX: &str = "sha512-";
/// Half of a SHA-512 (32 of 64 bytes), in hex characters.
const LEN_HASH_HEX: usize = 64;
pub(crate) const LEN_KEY: usize = HASH_PREFIX.len() + LEN_HASH_HEX;
/// Shortest accepted prefix: the tag plus two hex characters.
pub(crate) const MIN_LEN_KEY: usize = HASH_PREFIX.len() + 2;

/// Turn a finalized SHA-512 digest into a store key.
pub(crate) fn key_from_digest(digest: &[u8]) -> String {
    debug_assert_eq!(digest.len(), Sha512::output_size());
    let mut hex = hex::encode(digest);
    hex.truncate(LEN_HASH_HEX);
    format!("{HASH_PREFIX}{hex}")
}

/// Compute the store key for a byte buffer. Exposed mainly so callers can
/// predict keys without ingesting anything.
#[must_use]
pub fn key_for_bytes(bytes: &[u8]) -> String {
    key_from_digest(&Sha512::digest(bytes))
}

/// Validate a full-length key: tag, exact length, lowercase hex.
pub(crate) fn validate_full_key(key: &str) -> Result<(), StoreError> {
    let bad = |reason| StoreError::BadKey {
        key: key.to_string(),
        reason,
    };
    let hex = key
        .strip_prefix(HASH_PREFIX)
        .ok_or_else(|| bad("missing sha512- prefix"))?;
    if key.len() != LEN_KEY {
        return Err(bad("wrong key length"));
    }
    if !hex
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(bad("non-hex characters"));
    }
    Ok(())
}

/// Two directory levels of two hex characters each, taken from the hex
/// portion of the key, to bound directory fan-out.
pub(crate) fn block_transform(key: &str) -> (&str, &str) {
    let hex = key.strip_prefix(HASH_PREFIX).unwrap_or(key);
    (&hex[0..2], &hex[2..4])
}
