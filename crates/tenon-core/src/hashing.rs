//! Shared SHA-256 helpers and value-normalization rules used across the
//! ledger, idempotency, and identity components. Every digest in this crate
//! goes through here so the hashing discipline (explicit formatted strings,
//! never a direct hash of an arbitrary struct) stays in one place.

use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex_encode(&digest)
}

pub fn sha256_hex_str(s: &str) -> String {
    sha256_hex(s.as_bytes())
}

/// 64 '0' characters — the length of a SHA-256 hex digest — used as the WORM
/// ledger genesis entry's `previous_entry_hash`.
pub fn genesis_hash() -> String {
    "0".repeat(64)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Normalize a float to at most 10 decimals with trailing zeros (and a
/// trailing dot) stripped, matching the reference key-builder's
/// normalization rule so the same numeric value always serializes to the
/// same key component regardless of how it arrived (1.50 vs 1.5).
pub fn normalize_float(value: f64) -> String {
    let formatted = format!("{:.10}", value);
    let trimmed = formatted.trim_end_matches('0');
    trimmed.trim_end_matches('.').to_string()
}

/// Trim surrounding whitespace from a string key component.
pub fn normalize_str(value: &str) -> String {
    value.trim().to_string()
}
