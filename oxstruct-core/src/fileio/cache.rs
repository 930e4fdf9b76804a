//! Byte-bounded LRU cache for file content.
//!
//! Keyed by absolute path. A lookup must present the file's current
//! mtime (nanoseconds) and size; a mismatch evicts the entry. Entries larger
//! than the byte cap are never admitted.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Default cache capacity in bytes.
pub const DEFAULT_CACHE_BYTES: u64 = 50 * 1024 * 1024;

const MAX_ENTRIES: usize = 1024;

/// Immutable cached file snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Decoded text, absent for opaque binary files.
    pub content: Option<String>,
    pub encoding: String,
    pub content_hash: Option<String>,
    pub mtime_nanos: u128,
    pub size_bytes: u64,
}

struct CacheState {
    entries: LruCache<PathBuf, Arc<CacheEntry>>,
    current_bytes: u64,
}

/// Thread-safe LRU content cache.
pub struct FileCache {
    max_bytes: u64,
    state: Mutex<CacheState>,
}

impl FileCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(CacheState {
                entries: LruCache::new(
                    NonZeroUsize::new(MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN),
                ),
                current_bytes: 0,
            }),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Fetch a valid entry, evicting it if the file changed underneath.
    pub fn get(&self, path: &Path, current_mtime_nanos: u128, current_size: u64) -> Option<Arc<CacheEntry>> {
        let mut state = self.state.lock();
        let entry = state.entries.get(path)?.clone();

        if entry.mtime_nanos != current_mtime_nanos || entry.size_bytes != current_size {
            debug!(
                path = %path.display(),
                "cache invalidated: mtime {} -> {}, size {} -> {}",
                entry.mtime_nanos, current_mtime_nanos, entry.size_bytes, current_size
            );
            if let Some(stale) = state.entries.pop(path) {
                state.current_bytes -= stale.size_bytes;
            }
            return None;
        }

        Some(entry)
    }

    /// Insert or replace an entry. Oversize entries are refused, never
    /// partially admitted.
    pub fn put(&self, path: PathBuf, entry: CacheEntry) {
        if entry.size_bytes > self.max_bytes {
            warn!(
                path = %path.display(),
                size = entry.size_bytes,
                cap = self.max_bytes,
                "file exceeds cache capacity, not caching"
            );
            return;
        }

        let mut state = self.state.lock();
        if let Some(old) = state.entries.pop(&path) {
            state.current_bytes -= old.size_bytes;
        }

        while state.current_bytes + entry.size_bytes > self.max_bytes {
            match state.entries.pop_lru() {
                Some((evicted_path, evicted)) => {
                    state.current_bytes -= evicted.size_bytes;
                    debug!(path = %evicted_path.display(), "evicted cache entry");
                }
                None => break,
            }
        }

        state.current_bytes += entry.size_bytes;
        state.entries.put(path, Arc::new(entry));
    }

    pub fn current_bytes(&self) -> u64 {
        self.state.lock().current_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FileCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(size: u64, mtime: u128) -> CacheEntry {
        CacheEntry {
            content: Some("x".repeat(size as usize)),
            encoding: "utf-8".into(),
            content_hash: None,
            mtime_nanos: mtime,
            size_bytes: size,
        }
    }

    #[test]
    fn hit_requires_matching_mtime_and_size() {
        let cache = FileCache::new(1024);
        cache.put("/a".into(), entry(10, 100));

        assert!(cache.get(Path::new("/a"), 100, 10).is_some());
        // Changed mtime invalidates.
        assert!(cache.get(Path::new("/a"), 200, 10).is_none());
        // The stale entry is gone entirely.
        assert!(cache.get(Path::new("/a"), 100, 10).is_none());
        assert_eq!(cache.current_bytes(), 0);
    }

    #[test]
    fn size_change_invalidates() {
        let cache = FileCache::new(1024);
        cache.put("/a".into(), entry(10, 100));
        assert!(cache.get(Path::new("/a"), 100, 11).is_none());
    }

    #[test]
    fn entry_exactly_at_cap_is_admitted() {
        let cache = FileCache::new(64);
        cache.put("/fit".into(), entry(64, 1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn entry_one_byte_over_cap_is_refused() {
        let cache = FileCache::new(64);
        cache.put("/big".into(), entry(65, 1));
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_eviction_frees_bytes() {
        let cache = FileCache::new(100);
        cache.put("/a".into(), entry(60, 1));
        cache.put("/b".into(), entry(60, 1));
        // /a was least recently used and must have been evicted.
        assert!(cache.get(Path::new("/a"), 1, 60).is_none());
        assert!(cache.get(Path::new("/b"), 1, 60).is_some());
        assert_eq!(cache.current_bytes(), 60);
    }

    #[test]
    fn replacement_updates_byte_accounting() {
        let cache = FileCache::new(100);
        cache.put("/a".into(), entry(40, 1));
        cache.put("/a".into(), entry(20, 2));
        assert_eq!(cache.current_bytes(), 20);
        assert_eq!(cache.len(), 1);
    }
}
