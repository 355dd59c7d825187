//! Common types shared by the engine contract and the storage facade.

use bytes::Bytes;

/// Where the cache engine found an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Served from the in-memory cache.
    Cached,
    /// Required a read from the backing store.
    Uncached,
}

/// Raw entry returned by the cache engine, tagged with its cache status.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use actor_storage::{CacheStatus, CachedEntry};
///
/// let entry = CachedEntry::new(Bytes::from("user:1"), Bytes::from_static(&[0xff, 15]), CacheStatus::Cached);
/// assert_eq!(entry.billable_bytes(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    /// The key identifying this entry.
    pub key: Bytes,
    /// The encoded value stored at this key.
    pub value: Bytes,
    /// Whether the engine had to reach the backing store.
    pub status: CacheStatus,
}

impl CachedEntry {
    /// Creates a new tagged entry.
    pub fn new(key: Bytes, value: Bytes, status: CacheStatus) -> Self {
        Self { key, value, status }
    }

    /// Bytes counted for read billing: key plus encoded value.
    #[must_use]
    pub fn billable_bytes(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

/// Decoded key-value pair returned to callers of `get_many` and `list`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The key identifying this entry.
    pub key: Bytes,
    /// The decoded application value.
    pub value: serde_json::Value,
}

impl Entry {
    /// Creates a new decoded entry.
    pub fn new(key: Bytes, value: serde_json::Value) -> Self {
        Self { key, value }
    }
}
