//! Hashing and verification utilities

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Verify data matches expected SHA256 hash
pub fn verify_hash(data: &[u8], expected: &[u8; 32]) -> bool {
    sha256(data) == *expected
}

/// Format hash as hex string
pub fn hash_to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}
