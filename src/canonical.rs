//! Canonical serialization for deterministic fingerprints.
//!
//! Rule sets are fingerprinted so operators can tell which snapshot a node is
//! serving after a reload.
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap allowed: Use BTreeMap/BTreeSet for maps in hashed data

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("Canonical serialization failed")
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    let bytes = to_canonical_bytes(value);
    xxh64(&bytes, 0)
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Rule {
        resource: String,
        requires: Vec<String>,
    }

    #[test]
    fn test_determinism() {
        let r = Rule {
            resource: "/samples".to_string(),
            requires: vec!["reader".to_string()],
        };

        assert_eq!(canonical_hash(&r), canonical_hash(&r));
        assert_eq!(canonical_hash_hex(&r).len(), 16);
    }

    #[test]
    fn test_order_sensitive() {
        let a = vec!["reader", "admin"];
        let b = vec!["admin", "reader"];
        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }
}
