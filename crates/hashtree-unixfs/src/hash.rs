//! Content addressing: SHA256 over encoded node bytes

use sha2::{Digest, Sha256};

use crate::types::Hash;

/// Compute SHA256 hash of data
pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// Check that data is what the address says it is
pub fn verify(hash: &Hash, data: &[u8]) -> bool {
    sha256(data) == *hash
}
