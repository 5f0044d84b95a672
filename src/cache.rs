//! Entry Offset Cache
//!
//! Reading one entry from a cold data object costs a ranged fetch of its
//! whole block. The first such fetch records every entry's byte range, so
//! later point reads in the same block fetch only the single frame.
//!
//! The cache is a process-wide LRU shared across readers, keyed by
//! `(data object key, ledger_id, entry_id)`. Entries carry an insertion
//! timestamp and are dropped when older than the configured TTL; offloaded
//! objects are immutable, so staleness only matters after a delete and
//! re-offload under a reused key.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct CachedOffset {
    /// Byte offset of the entry frame within the data object.
    pub offset: u64,
    /// Full frame length, prefix included.
    pub frame_len: u32,
    inserted: Instant,
}

type Key = (Arc<str>, u64, u64);

/// Shared LRU of entry frame locations.
#[derive(Clone)]
pub struct OffsetsCache {
    inner: Arc<Mutex<LruCache<Key, CachedOffset>>>,
    ttl: Duration,
}

impl OffsetsCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl,
        }
    }

    pub fn get(&self, data_key: &Arc<str>, ledger_id: u64, entry_id: u64) -> Option<CachedOffset> {
        let mut cache = self.inner.lock().expect("offsets cache lock poisoned");
        let key = (data_key.clone(), ledger_id, entry_id);
        match cache.get(&key) {
            Some(cached) if cached.inserted.elapsed() < self.ttl => Some(*cached),
            Some(_) => {
                cache.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, data_key: &Arc<str>, ledger_id: u64, entry_id: u64, offset: u64, frame_len: u32) {
        let mut cache = self.inner.lock().expect("offsets cache lock poisoned");
        cache.put(
            (data_key.clone(), ledger_id, entry_id),
            CachedOffset {
                offset,
                frame_len,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("offsets cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
