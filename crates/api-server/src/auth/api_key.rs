use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a raw API key, the form keys are configured in
pub fn digest_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn api_key_matches(key: &str, digests: &[String]) -> bool {
    let digest = digest_api_key(key);
    digests.iter().any(|known| *known == digest)
}
