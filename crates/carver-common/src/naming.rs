//! Deterministic naming helpers

use aws_lc_rs::digest::{digest, SHA256};

/// Longest DNS label a generated id may produce
const MAX_LABEL_LEN: usize = 63;

/// Hex characters of hash appended to every unique id
const HASH_LEN: usize = 8;

/// Derive a stable, DNS-safe unique id from a construct path.
///
/// Non-alphanumeric characters are dropped, the rest lowercased, and the
/// first 8 hex characters of the path's SHA-256 appended so that paths which
/// sanitize to the same text still get distinct ids.
pub fn unique_id(path: &str) -> String {
    let mut sanitized: String = path
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    sanitized.truncate(MAX_LABEL_LEN - HASH_LEN);
    sanitized.push_str(&short_hash(path));
    sanitized
}

/// First 8 hex characters of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    hash_hex(input, HASH_LEN)
}

/// First `chars` hex characters (rounded down to even, at most 64) of the
/// SHA-256 of `input`.
pub fn hash_hex(input: &str, chars: usize) -> String {
    let hash = digest(&SHA256, input.as_bytes());
    hash.as_ref()
        .iter()
        .take(chars / 2)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_id_is_stable() {
        assert_eq!(unique_id("prod/Frontend"), unique_id("prod/Frontend"));
    }

    #[test]
    fn test_unique_id_sanitizes() {
        let id = unique_id("prod/Front-end_1");
        assert!(id.starts_with("prodfrontend1"));
        assert_eq!(id.len(), "prodfrontend1".len() + 8);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_colliding_sanitized_paths_differ() {
        assert_ne!(unique_id("a/b"), unique_id("a-b"));
    }

    #[test]
    fn test_long_paths_fit_a_dns_label() {
        let long = "x".repeat(200);
        assert_eq!(unique_id(&long).len(), 63);
    }

    #[test]
    fn test_short_hash_known_value() {
        // sha256("") = e3b0c442...
        assert_eq!(short_hash(""), "e3b0c442");
        assert_eq!(hash_hex("", 16), "e3b0c44298fc1c14");
    }
}
