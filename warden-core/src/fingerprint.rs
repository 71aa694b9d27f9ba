//! Content fingerprinting and the optional assessment cache.
//!
//! Two assessments of byte-identical pages are redundant work; the cache
//! keys on a SHA-256 of whitespace-normalized HTML so trivial reformatting
//! does not defeat it.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// SHA-256 hex digest of whitespace-normalized content.
pub fn content_fingerprint(html: &str) -> String {
    let mut hasher = Sha256::new();
    let mut last_was_space = false;
    for ch in html.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                hasher.update(b" ");
            }
            last_was_space = true;
        } else {
            let mut buf = [0u8; 4];
            hasher.update(ch.encode_utf8(&mut buf).as_bytes());
            last_was_space = false;
        }
    }
    hex_string(&hasher.finalize())
}

/// SHA-256 hex digest of a URL, for audit records that must not retain the URL.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex_string(&hasher.finalize())
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Bounded fingerprint-keyed cache. Insertion order eviction: when full,
/// the oldest half is dropped in one sweep rather than per-insert.
pub struct FingerprintCache<V: Clone> {
    capacity: usize,
    entries: RwLock<(Vec<String>, HashMap<String, V>)>,
}

impl<V: Clone> FingerprintCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            entries: RwLock::new((Vec::new(), HashMap::new())),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.entries.read().1.get(key).cloned()
    }

    pub fn insert(&self, key: String, value: V) {
        let mut guard = self.entries.write();
        let (order, map) = &mut *guard;
        if map.len() >= self.capacity {
            let drop_n = order.len() / 2;
            for old in order.drain(..drop_n) {
                map.remove(&old);
            }
        }
        if map.insert(key.clone(), value).is_none() {
            order.push(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
