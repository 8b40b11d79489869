//! Cache key derivation
//!
//! A key is a pure function of method, target URL and the enumerated
//! content-negotiation headers, so identical logical requests collide
//! and distinct ones never do.

use sha2::{Digest, Sha256};
use std::fmt;

/// Headers that participate in key derivation
///
/// Only content negotiation affects what a server returns for the same
/// URL, so only these are key-relevant; everything else (auth, tracing,
/// cookies) is deliberately excluded.
pub const KEY_HEADERS: [&str; 3] = ["accept", "accept-encoding", "accept-language"];

/// Cache key for one logical request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
    /// Digest of the key-relevant header subset
    pub vary_hash: String,
}

impl CacheKey {
    /// Derive a key from a request's method, URL and headers
    ///
    /// Headers outside [`KEY_HEADERS`] are ignored. The relevant subset
    /// is normalized (lowercase names, trimmed values) and sorted before
    /// hashing so header order never changes the key.
    pub fn new(method: &str, url: &str, headers: &[(String, String)]) -> Self {
        let mut relevant: Vec<String> = headers
            .iter()
            .filter(|(name, _)| KEY_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
            .map(|(name, value)| format!("{}={}", name.to_ascii_lowercase(), value.trim()))
            .collect();
        relevant.sort();

        let vary_hash = if relevant.is_empty() {
            "none".to_string()
        } else {
            let mut hasher = Sha256::new();
            hasher.update(relevant.join("\n").as_bytes());
            let hash = hasher.finalize();
            hex::encode(&hash[..8])
        };

        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            vary_hash,
        }
    }

    /// Convert to storage key string
    /// Format: method:url:vary_hash
    pub fn to_storage_key(&self) -> String {
        format!("{}:{}:{}", self.method, self.url, self.vary_hash)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.method, self.url, self.vary_hash)
    }
}
