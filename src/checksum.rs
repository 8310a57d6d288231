//! Content checksum for record payloads.
//!
//! A 64-bit `XxHash64` digest, verified on every read from a durable
//! tier (spec §3, I5 / §4.2).

use std::hash::Hasher;
use twox_hash::XxHash64;

/// Checksum seed; fixed so checksums are reproducible across restarts.
const SEED: u64 = 0x5be1_6e3a_be4c_a5e7;

/// Compute the checksum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(SEED);
    hasher.write(bytes);
    hasher.finish()
}

/// Verify `bytes` against an expected checksum.
pub fn verify(bytes: &[u8], expected: u64) -> bool {
    checksum(bytes) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_checksum() {
        assert_eq!(checksum(b"hello"), checksum(b"hello"));
    }

    #[test]
    fn different_bytes_different_checksum() {
        assert_ne!(checksum(b"hello"), checksum(b"world"));
    }

    #[test]
    fn verify_roundtrip() {
        let sum = checksum(b"payload");
        assert!(verify(b"payload", sum));
        assert!(!verify(b"payload!", sum));
    }
}
