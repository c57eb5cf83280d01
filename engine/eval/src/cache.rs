//! Position-keyed cache of network results.
//!
//! Keys are window hashes over recent history (see
//! `cinder_position::History::hash_last`), so transpositions that differ in
//! their recent past hash to different entries. Entries are immutable once
//! inserted and shared by `Arc`, which keeps reads cheap while eviction can
//! happen concurrently.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Immutable result of one network evaluation.
#[derive(Debug)]
pub struct CachedEval {
    /// Value head, side-to-move POV.
    pub q: f32,
    /// Policy logits, parallel to `moves`.
    pub p: Vec<f32>,
    /// Policy-space indexes the logits were sampled at.
    pub moves: Vec<u16>,
}

impl CachedEval {
    /// Policy logit for a move index; 0 for moves the entry does not cover.
    pub fn p_for(&self, move_index: u16) -> f32 {
        self.moves
            .iter()
            .position(|&m| m == move_index)
            .map_or(0.0, |i| self.p[i])
    }
}

struct Inner {
    entries: Option<LruCache<u64, Arc<CachedEval>>>,
    capacity: usize,
}

/// Capacity-bounded LRU of [`CachedEval`], keyed by history-window hash.
/// Capacity 0 disables the cache entirely.
pub struct NnCache {
    inner: Mutex<Inner>,
}

impl NnCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: NonZeroUsize::new(capacity).map(LruCache::new),
                capacity,
            }),
        }
    }

    /// Fetches an entry, marking it most recently used.
    pub fn get(&self, hash: u64) -> Option<Arc<CachedEval>> {
        self.inner
            .lock()
            .entries
            .as_mut()
            .and_then(|e| e.get(&hash).cloned())
    }

    /// Membership probe that does not touch recency.
    pub fn contains(&self, hash: u64) -> bool {
        self.inner
            .lock()
            .entries
            .as_ref()
            .is_some_and(|e| e.contains(&hash))
    }

    pub fn insert(&self, hash: u64, eval: Arc<CachedEval>) {
        if let Some(entries) = self.inner.lock().entries.as_mut() {
            entries.put(hash, eval);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.as_ref().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn clear(&self) {
        if let Some(entries) = self.inner.lock().entries.as_mut() {
            entries.clear();
        }
    }

    /// Resizes in place, evicting oldest entries if shrinking.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        match (NonZeroUsize::new(capacity), inner.entries.as_mut()) {
            (Some(cap), Some(entries)) => entries.resize(cap),
            (Some(cap), None) => inner.entries = Some(LruCache::new(cap)),
            (None, _) => inner.entries = None,
        }
    }
}
