//! Payload integrity checksums.
//!
//! A checksum is the CRC-32 (IEEE) of the exact payload bytes, rendered as
//! 8 lowercase hex characters. Nothing is normalized here: callers that
//! want whitespace-insensitive checksums must canonicalize first.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Width of a rendered checksum in hex characters.
pub const CHECKSUM_HEX_LEN: usize = 8;

/// Compute the checksum of a payload.
pub fn compute_checksum(payload: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(payload))
}

/// Recompute the checksum of `payload` and compare it with `expected`.
pub fn verify_checksum(payload: &[u8], expected: &str) -> bool {
    compute_checksum(payload).eq_ignore_ascii_case(expected.trim())
}

/// A scan whose payload no longer matches the checksum stored at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumMismatch {
    pub scan_id: Uuid,
    pub expected: String,
    pub actual: String,
}

impl ChecksumMismatch {
    /// Check a payload and return the mismatch, if any.
    pub fn check(scan_id: Uuid, payload: &[u8], expected: &str) -> Option<Self> {
        let actual = compute_checksum(payload);
        if actual.eq_ignore_ascii_case(expected.trim()) {
            None
        } else {
            Some(Self {
                scan_id,
                expected: expected.to_string(),
                actual,
            })
        }
    }
}
