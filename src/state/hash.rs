// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Content hashing for snapshot fingerprints
//!
//! Uses BLAKE3 for fast, secure content hashing.

use blake3::Hasher;

use crate::pipeline::Row;
use crate::state::Offsets;

/// Content hasher for generating fingerprints
pub struct ContentHasher {
    hasher: Hasher,
}

impl ContentHasher {
    /// Create a new content hasher
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Hash rows in order.
    ///
    /// Each row is length-prefixed so that row boundaries are part of the
    /// hash.
    pub fn hash_rows(&mut self, rows: &[Row]) {
        self.hasher.update(&(rows.len() as u64).to_le_bytes());
        for row in rows {
            let encoded = serde_json::Value::Object(row.clone()).to_string();
            self.hasher.update(&(encoded.len() as u64).to_le_bytes());
            self.hasher.update(encoded.as_bytes());
        }
    }

    /// Hash offsets (already sorted by upstream name)
    pub fn hash_offsets(&mut self, offsets: &Offsets) {
        for (upstream, offset) in offsets {
            self.hasher.update(upstream.as_bytes());
            self.hasher.update(&[0]);
            self.hasher.update(&offset.to_le_bytes());
        }
    }

    /// Finalize and get the hash
    pub fn finalize(self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Fingerprint of a dataset's committed content
pub fn fingerprint(rows: &[Row], offsets: &Offsets) -> String {
    let mut hasher = ContentHasher::new();
    hasher.hash_rows(rows);
    hasher.hash_offsets(offsets);
    hasher.finalize()
}

/// Compute a quick hash of a string
pub fn hash_string(s: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(s.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_hash_string() {
        assert_eq!(hash_string("hello"), hash_string("hello"));
        assert_ne!(hash_string("hello"), hash_string("world"));
    }

    #[test]
    fn test_fingerprint_sensitive_to_order_and_offsets() {
        let a = vec![row(json!({"id": 1})), row(json!({"id": 2}))];
        let b = vec![row(json!({"id": 2})), row(json!({"id": 1}))];
        let none = Offsets::new();
        let mut some = Offsets::new();
        some.insert("raw".into(), 2);

        assert_eq!(fingerprint(&a, &none), fingerprint(&a.clone(), &none));
        assert_ne!(fingerprint(&a, &none), fingerprint(&b, &none));
        assert_ne!(fingerprint(&a, &none), fingerprint(&a, &some));
    }
}
