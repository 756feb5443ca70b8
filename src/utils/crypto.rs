use sha2::{Digest, Sha256};

pub struct CryptoUtils;

impl CryptoUtils {
    pub fn hash_sha256(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Hex SHA-256 of `data`, cut to the first `len` hex characters.
    pub fn short_hash(data: &[u8], len: usize) -> String {
        let mut digest = Self::hash_sha256(data);
        digest.truncate(len);
        digest
    }

    pub fn verify_integrity(data: &[u8], expected_hash: &str) -> bool {
        Self::hash_sha256(data) == expected_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            CryptoUtils::hash_sha256(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(CryptoUtils::short_hash(b"hello world", 16), "b94d27b9934d3e08");
        assert!(CryptoUtils::verify_integrity(
            b"hello world",
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        ));
    }
}
