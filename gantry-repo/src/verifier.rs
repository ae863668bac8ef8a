//! Package verification via SHA-256 checksums

use crate::error::RepoError;
use sha2::{Digest, Sha256};

/// Verify that the SHA-256 hash of `data` matches `expected_hex`
///
/// The comparison ignores case; repositories publish both spellings.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<(), RepoError> {
    let computed = compute_hash(data);

    if !computed.eq_ignore_ascii_case(expected_hex.trim()) {
        return Err(RepoError::HashMismatch {
            expected: expected_hex.to_string(),
            actual: computed,
        });
    }

    Ok(())
}

/// Compute the SHA-256 hash of `data` and return hex string
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_and_verify_hash() {
        let data = b"panel archive";
        let hash = compute_hash(data);
        assert!(verify_hash(data, &hash).is_ok());
        assert!(verify_hash(data, &hash.to_uppercase()).is_ok());
    }

    #[test]
    fn test_verify_hash_mismatch() {
        let err = verify_hash(b"panel archive", &"0".repeat(64)).unwrap_err();
        assert!(matches!(err, RepoError::HashMismatch { .. }));
        assert!(err.is_archive());
    }
}
