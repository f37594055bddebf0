//! Per-handle pool of artifact payloads.
//!
//! Artifacts are immutable once written, so their bytes can be kept in
//! memory and reused by later reads of the same tile without touching the
//! filesystem. The pool is an LRU keyed by artifact path with size-based
//! eviction; it belongs to a single image handle and is emptied when the
//! handle is disposed.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use lru::LruCache;

/// Default pool capacity: 64MB (two full-resolution 4096x4096 16-bit tiles)
pub const DEFAULT_PAYLOAD_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Maximum number of entries (to bound LRU overhead)
const MAX_ENTRIES: NonZeroUsize = match NonZeroUsize::new(1_024) {
    Some(n) => n,
    None => panic!("MAX_ENTRIES must be non-zero"),
};

/// LRU pool of artifact payloads with size-based capacity.
pub struct PayloadCache {
    inner: Mutex<Inner>,

    /// Maximum total size in bytes
    max_size: usize,
}

struct Inner {
    entries: LruCache<PathBuf, Bytes>,
    current_size: usize,
}

impl PayloadCache {
    /// Create a pool with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PAYLOAD_CACHE_CAPACITY)
    }

    /// Create a pool holding at most `max_size` bytes.
    ///
    /// A capacity of zero disables pooling.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(MAX_ENTRIES),
                current_size: 0,
            }),
            max_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries are plain bytes; a panic mid-update cannot leave them torn.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a payload, marking it as recently used.
    pub fn get(&self, path: &Path) -> Option<Bytes> {
        self.lock().entries.get(path).cloned()
    }

    /// Store a payload, evicting least-recently-used entries over capacity.
    ///
    /// Payloads larger than the whole pool are not stored.
    pub fn put(&self, path: PathBuf, data: Bytes) {
        if data.len() > self.max_size {
            return;
        }

        let mut inner = self.lock();
        let data_size = data.len();

        if let Some((_, evicted)) = inner.entries.push(path, data) {
            // push returns the replaced or LRU-evicted entry
            inner.current_size = inner.current_size.saturating_sub(evicted.len());
        }
        inner.current_size += data_size;

        while inner.current_size > self.max_size {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(evicted.len());
                }
                None => break,
            }
        }
    }

    /// Drop every pooled payload.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.current_size = 0;
    }

    /// Number of pooled payloads.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Total pooled bytes.
    pub fn size(&self) -> usize {
        self.lock().current_size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for PayloadCache {
    fn default() -> Self {
        Self::new()
    }
}
