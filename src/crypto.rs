use sha2::{Digest, Sha256};

/// Hash a value for logging/correlation (8-byte truncated SHA256)
pub fn hash_for_log(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    format!(
        "{:x}",
        &result[..8]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64)
    )
}

/// Compute full SHA256 hash of binary data and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Compute the base64url (no padding) SHA-256 digest of bytes, as used for
/// DPoP `ath` (access-token-hash) and JWK thumbprints.
pub fn sha256_base64url(input: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    let mut hasher = Sha256::new();
    hasher.update(input);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Redact a sensitive value for logs by returning a short, non-reversible tag
/// Example: "h:3fae91b2c4d5e677"
pub fn redact_for_log(value: &str) -> String {
    format!("h:{}", hash_for_log(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_for_log() {
        let hash = hash_for_log("test-did:plc:abc123");
        assert_eq!(hash.len(), 16); // 8 bytes = 16 hex chars
    }

    #[test]
    fn sha256_hex_round_trips_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn redact_for_log_never_contains_the_input() {
        let secret = "ckapi_deadbeefdeadbeefdeadbeefdeadbeef";
        let redacted = redact_for_log(secret);
        assert!(!redacted.contains(secret));
        assert!(redacted.starts_with("h:"));
    }
}
