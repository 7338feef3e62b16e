use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::trace;

use super::entry::FileEntry;

/// Which of the two entry maps a request resolves against.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheKind {
    Plain,
    Compressed,
}

#[derive(Default)]
struct CacheMaps {
    plain: HashMap<String, Arc<FileEntry>>,
    compressed: HashMap<String, Arc<FileEntry>>,
    /// Entries evicted from a map while readers were still streaming
    /// from them; released on a later sweep once drained.
    pending: Vec<Arc<FileEntry>>,
}

impl CacheMaps {
    fn map_mut(&mut self, kind: CacheKind) -> &mut HashMap<String, Arc<FileEntry>> {
        match kind {
            CacheKind::Plain => &mut self.plain,
            CacheKind::Compressed => &mut self.compressed,
        }
    }
}

/// The file-handle cache. Both maps, every readers count and the
/// janitor's pending list live behind this one lock, which is never held
/// across I/O.
pub(crate) struct EntryCache {
    maps: Mutex<CacheMaps>,
}

impl EntryCache {
    pub(crate) fn new() -> Arc<EntryCache> {
        Arc::new(EntryCache {
            maps: Mutex::new(CacheMaps::default()),
        })
    }

    /// Looks up a live entry, claiming a reader slot under the lock.
    pub(crate) fn lookup(self: &Arc<Self>, kind: CacheKind, path: &str) -> Option<EntryGuard> {
        let mut maps = self.maps.lock().unwrap();
        let entry = maps.map_mut(kind).get(path)?;
        entry.readers.fetch_add(1, Ordering::Relaxed);
        Some(EntryGuard {
            entry: Arc::clone(entry),
            cache: Arc::clone(self),
        })
    }

    /// Inserts a freshly opened entry, or adopts the one a racing request
    /// inserted first. Either way the returned guard carries one claimed
    /// reader; the loser of the race is released after the lock drops.
    pub(crate) fn insert_or_adopt(
        self: &Arc<Self>,
        kind: CacheKind,
        path: &str,
        entry: Arc<FileEntry>,
    ) -> EntryGuard {
        let (guard, discarded) = {
            let mut maps = self.maps.lock().unwrap();
            match maps.map_mut(kind).entry(path.to_owned()) {
                MapEntry::Vacant(slot) => {
                    entry.readers.fetch_add(1, Ordering::Relaxed);
                    slot.insert(Arc::clone(&entry));
                    (
                        EntryGuard {
                            entry,
                            cache: Arc::clone(self),
                        },
                        None,
                    )
                }
                MapEntry::Occupied(slot) => {
                    let existing = Arc::clone(slot.get());
                    existing.readers.fetch_add(1, Ordering::Relaxed);
                    (
                        EntryGuard {
                            entry: existing,
                            cache: Arc::clone(self),
                        },
                        Some(entry),
                    )
                }
            }
        };
        if let Some(lost_race) = discarded {
            lost_race.release();
        }
        guard
    }

    /// One janitor pass. First drains what earlier passes left pending,
    /// then evicts entries older than `cache_duration` from both maps.
    /// Entries still being read are parked on the pending list; all
    /// others are released strictly after the lock is dropped.
    pub(crate) fn sweep(&self, cache_duration: Duration) {
        let mut to_release: Vec<Arc<FileEntry>> = Vec::new();
        {
            let mut maps = self.maps.lock().unwrap();

            let pending = std::mem::take(&mut maps.pending);
            for entry in pending {
                if entry.readers.load(Ordering::Relaxed) > 0 {
                    maps.pending.push(entry);
                } else {
                    to_release.push(entry);
                }
            }

            let mut evicted: Vec<Arc<FileEntry>> = Vec::new();
            for kind in [CacheKind::Plain, CacheKind::Compressed] {
                let map = maps.map_mut(kind);
                let expired: Vec<String> = map
                    .iter()
                    .filter(|(_, entry)| entry.created_at.elapsed() > cache_duration)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in expired {
                    if let Some(entry) = map.remove(&path) {
                        evicted.push(entry);
                    }
                }
            }
            for entry in evicted {
                if entry.readers.load(Ordering::Relaxed) > 0 {
                    maps.pending.push(entry);
                } else {
                    to_release.push(entry);
                }
            }
        }

        for entry in &to_release {
            entry.release();
        }
    }
}

/// A claimed reader slot on a cached entry. Dropping the guard returns
/// the claim under the cache lock, so the janitor never races a
/// decrement.
pub(crate) struct EntryGuard {
    entry: Arc<FileEntry>,
    cache: Arc<EntryCache>,
}

impl EntryGuard {
    pub(crate) fn entry(&self) -> &Arc<FileEntry> {
        &self.entry
    }
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        let _maps = self.cache.maps.lock().unwrap();
        let prev = self.entry.readers.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "readers count underflow");
    }
}

/// Spawns the background sweep for a cache. The task holds only a weak
/// reference, so it winds down once the owning handler is gone.
pub(crate) fn spawn_janitor(cache: &Arc<EntryCache>, cache_duration: Duration) {
    let cache: Weak<EntryCache> = Arc::downgrade(cache);
    tokio::spawn(async move {
        let period = cache_duration / 2;
        loop {
            tokio::time::sleep(period).await;
            match cache.upgrade() {
                Some(cache) => cache.sweep(cache_duration),
                None => break,
            }
        }
        trace!("entry cache dropped, janitor exiting");
    });
}
