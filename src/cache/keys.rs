//! Cache key definitions
//!
//! Keys combine the operation name, the entities the cached result depends on
//! and a short digest of the operation parameters.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Operation that produced the value (`retrieve_rows`, `count_rows`, ...)
    pub operation: String,
    /// Entities whose mutation must evict this entry
    pub tags: Vec<String>,
    /// Digest of the serialized parameters
    pub signature: String,
}

impl CacheKey {
    pub fn new<P: Serialize + ?Sized>(operation: &str, tags: &[&str], params: &P) -> Self {
        let serialized = serde_json::to_vec(params).unwrap_or_default();
        let signature = if serialized.is_empty() {
            "empty".to_string()
        } else {
            let hash = Sha256::digest(&serialized);
            hex::encode(&hash[..8]) // First 8 bytes = 16 hex chars
        };

        let mut tags: Vec<String> = tags.iter().map(|t| t.to_ascii_lowercase()).collect();
        tags.sort();
        tags.dedup();

        Self {
            operation: operation.to_string(),
            tags,
            signature,
        }
    }

    /// Format: operation:tag1,tag2:signature
    pub fn to_storage_key(&self) -> String {
        format!("{}:{}:{}", self.operation, self.tags.join(","), self.signature)
    }

    pub fn references(&self, entity: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(entity))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]({})", self.operation, self.tags.join(","), self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_deterministic() {
        let key1 = CacheKey::new("retrieve", &["study"], &json!({"page": 1}));
        let key2 = CacheKey::new("retrieve", &["study"], &json!({"page": 1}));
        assert_eq!(key1, key2);
        assert_eq!(key1.signature.len(), 16);
    }

    #[test]
    fn test_different_params_different_keys() {
        let key1 = CacheKey::new("retrieve", &["study"], &json!({"page": 1}));
        let key2 = CacheKey::new("retrieve", &["study"], &json!({"page": 2}));
        assert_ne!(key1.to_storage_key(), key2.to_storage_key());
    }

    #[test]
    fn test_tags_normalized() {
        let key = CacheKey::new("retrieve", &["Study", "link", "study"], &1);
        assert_eq!(key.tags, vec!["link".to_string(), "study".to_string()]);
        assert!(key.references("STUDY"));
        assert!(!key.references("question"));
        assert!(key.to_storage_key().starts_with("retrieve:link,study:"));
    }
}
