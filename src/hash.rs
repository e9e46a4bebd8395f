//! Deterministic key-to-point mapping for the consistent-hash ring.

use sha2::{Digest, Sha256};

/// Hash a string onto the ring: SHA-256 of its UTF-8 bytes, interpreted as a
/// big-endian unsigned integer, reduced modulo 2^64.
///
/// Must stay bit-identical across processes, platforms, and restarts —
/// every node and client recomputes the same ring positions independently.
pub fn ring_hash(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    let mut high_bytes = [0u8; 8];
    high_bytes.copy_from_slice(&digest[digest.len() - 8..]);
    u64::from_be_bytes(high_bytes)
}
