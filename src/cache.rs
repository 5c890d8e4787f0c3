//! Metadata cache with explicit invalidation
//!
//! The cache memoizes the most recent `stat`/`lstat` result per normalized
//! path. It never answers a lookup on its own initiative: callers choose
//! [`CachePolicy::Cached`] to accept a memo, and every mutating path
//! operation invalidates the affected entries after the mutation completes
//! and before it returns.
//!
//! # Consistency
//!
//! Each key carries a generation drawn from a global counter. A fetch
//! records the generation before it dispatches and only stores its result
//! if nothing bumped the generation meanwhile, so a stat that raced with an
//! invalidation can never reinstall pre-mutation data.

use crate::bridge::SyscallBridge;
use crate::error::Result;
use crate::metadata::Metadata;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// How a lookup may use the memo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Always dispatch, then store the fresh result
    #[default]
    Refresh,
    /// Return a memo when present; dispatch only on a miss
    Cached,
}

/// A memoized stat result
#[derive(Debug, Clone)]
pub struct CachedStat {
    /// The metadata as fetched
    pub metadata: Metadata,
    /// When the fetch completed
    pub fetched_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    path: PathBuf,
    follow_symlinks: bool,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    entry: Option<CachedStat>,
}

/// Shared metadata cache
///
/// Cheap to clone; clones share the same entries. Safe to use from several
/// runtimes at once.
#[derive(Debug, Clone, Default)]
pub struct MetadataCache {
    inner: Arc<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    slots: DashMap<Key, Slot>,
    generations: AtomicU64,
}

impl CacheInner {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl MetadataCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up metadata for `path`, dispatching through `bridge` as the policy requires
    ///
    /// `path` should already be normalized; the cache keys on it verbatim.
    ///
    /// # Errors
    ///
    /// Returns the bridge error when a dispatch was needed and failed. A
    /// failed fetch also drops the memo, since it is known to be stale.
    pub async fn get(
        &self,
        bridge: &SyscallBridge,
        path: &Path,
        follow_symlinks: bool,
        policy: CachePolicy,
    ) -> Result<Metadata> {
        let key = Key {
            path: path.to_path_buf(),
            follow_symlinks,
        };

        let generation = {
            let mut slot = self.inner.slots.entry(key.clone()).or_insert_with(|| Slot {
                generation: self.inner.next_generation(),
                entry: None,
            });
            if policy == CachePolicy::Cached {
                if let Some(hit) = &slot.entry {
                    trace!("cache hit {}", path.display());
                    return Ok(hit.metadata.clone());
                }
            }
            slot.generation
        };

        let metadata = match bridge.stat(path, follow_symlinks).await {
            Ok(metadata) => metadata,
            Err(err) => {
                if let Some(mut slot) = self.inner.slots.get_mut(&key) {
                    if slot.generation == generation {
                        slot.entry = None;
                    }
                }
                return Err(err);
            }
        };

        if let Some(mut slot) = self.inner.slots.get_mut(&key) {
            if slot.generation == generation {
                slot.entry = Some(CachedStat {
                    metadata: metadata.clone(),
                    fetched_at: Instant::now(),
                });
            } else {
                trace!("discarding stat of {} raced by invalidation", path.display());
            }
        }
        Ok(metadata)
    }

    /// Return the memo for `path` without dispatching
    #[must_use]
    pub fn peek(&self, path: &Path, follow_symlinks: bool) -> Option<CachedStat> {
        let key = Key {
            path: path.to_path_buf(),
            follow_symlinks,
        };
        self.inner.slots.get(&key).and_then(|slot| slot.entry.clone())
    }

    /// Drop both the `stat` and `lstat` memo of `path`
    pub fn invalidate(&self, path: &Path) {
        for follow_symlinks in [true, false] {
            let key = Key {
                path: path.to_path_buf(),
                follow_symlinks,
            };
            if let Some(mut slot) = self.inner.slots.get_mut(&key) {
                slot.generation = self.inner.next_generation();
                slot.entry = None;
            }
        }
        trace!("invalidated {}", path.display());
    }

    /// Drop the memo of `path` and of everything below it
    pub fn invalidate_tree(&self, path: &Path) {
        for mut slot in self.inner.slots.iter_mut() {
            if slot.key().path.starts_with(path) {
                slot.generation = self.inner.next_generation();
                slot.entry = None;
            }
        }
        trace!("invalidated tree {}", path.display());
    }

    /// Number of live memos
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| slot.entry.is_some())
            .count()
    }

    /// Whether no memo is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything
    pub fn clear(&self) {
        self.inner.slots.clear();
    }
}
