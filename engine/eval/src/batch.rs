//! Cache-fronted batch builder.
//!
//! Wraps a backend computation so the search can add positions without
//! caring whether they were evaluated before. Hits are served from the
//! cache without occupying backend slots; misses are forwarded, and their
//! results are written back so that after `compute_blocking` every hash
//! added through [`CachingComputation::add_input`] is guaranteed present.

use crate::cache::{CachedEval, NnCache};
use crate::network::{EvalError, NetworkComputation};
use cinder_position::encode::InputPlanes;
use std::sync::Arc;

enum Slot {
    /// Served from the cache (or materialized into it after compute).
    Ready(Arc<CachedEval>),
    /// Waiting on the inner batch.
    Pending { inner_idx: usize, moves: Vec<u16> },
}

pub struct CachingComputation {
    inner: Box<dyn NetworkComputation>,
    cache: Arc<NnCache>,
    slots: Vec<(u64, Slot)>,
    misses: usize,
}

impl CachingComputation {
    pub fn new(inner: Box<dyn NetworkComputation>, cache: Arc<NnCache>) -> Self {
        Self {
            inner,
            cache,
            slots: Vec::new(),
            misses: 0,
        }
    }

    /// Queues a position. Returns whether it was already cached; misses are
    /// forwarded to the backend along with the move indexes to sample.
    pub fn add_input(&mut self, hash: u64, planes: InputPlanes, moves: Vec<u16>) -> bool {
        if let Some(entry) = self.cache.get(hash) {
            self.slots.push((hash, Slot::Ready(entry)));
            return true;
        }
        let inner_idx = self.inner.batch_size();
        self.inner.add_input(planes);
        self.slots.push((hash, Slot::Pending { inner_idx, moves }));
        self.misses += 1;
        false
    }

    /// Hit-only probe used by prefetch: reserves a slot on a hit, queues
    /// nothing on a miss.
    pub fn add_input_by_hash(&mut self, hash: u64) -> bool {
        match self.cache.get(hash) {
            Some(entry) => {
                self.slots.push((hash, Slot::Ready(entry)));
                true
            }
            None => false,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.slots.len()
    }

    pub fn cache_misses(&self) -> usize {
        self.misses
    }

    /// Runs the backend over the queued misses and backfills the cache.
    pub fn compute_blocking(&mut self) -> Result<(), EvalError> {
        if self.misses > 0 {
            self.inner.compute_blocking()?;
        }
        for (hash, slot) in &mut self.slots {
            if let Slot::Pending { inner_idx, moves } = slot {
                let idx = *inner_idx;
                let p = moves.iter().map(|&m| self.inner.p(idx, m)).collect();
                let entry = Arc::new(CachedEval {
                    q: self.inner.q(idx),
                    p,
                    moves: std::mem::take(moves),
                });
                self.cache.insert(*hash, Arc::clone(&entry));
                *slot = Slot::Ready(entry);
            }
        }
        Ok(())
    }

    pub fn q(&self, idx: usize) -> f32 {
        match &self.slots[idx].1 {
            Slot::Ready(e) => e.q,
            Slot::Pending { .. } => unreachable!("slot read before compute_blocking"),
        }
    }

    pub fn p(&self, idx: usize, move_index: u16) -> f32 {
        match &self.slots[idx].1 {
            Slot::Ready(e) => e.p_for(move_index),
            Slot::Pending { .. } => unreachable!("slot read before compute_blocking"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::uniform::UniformNetwork;
    use cinder_position::encode::encode_position;
    use cinder_position::History;

    fn planes() -> InputPlanes {
        encode_position(&History::starting())
    }

    #[test]
    fn miss_then_hit() {
        let net = UniformNetwork::new();
        let cache = Arc::new(NnCache::new(100));

        let mut first = CachingComputation::new(net.new_computation(), Arc::clone(&cache));
        assert!(!first.add_input(42, planes(), vec![1, 2, 3]));
        assert_eq!(first.cache_misses(), 1);
        first.compute_blocking().unwrap();
        assert!(cache.contains(42));

        let mut second = CachingComputation::new(net.new_computation(), Arc::clone(&cache));
        assert!(second.add_input(42, planes(), vec![1, 2, 3]));
        assert_eq!(second.cache_misses(), 0);
        assert_eq!(second.batch_size(), 1);
        // Hits are readable without touching the backend.
        second.compute_blocking().unwrap();
        assert_eq!(second.q(0), first.q(0));
        assert_eq!(second.p(0, 2), first.p(0, 2));
    }

    #[test]
    fn hash_probe_reserves_no_slot_on_miss() {
        let net = UniformNetwork::new();
        let cache = Arc::new(NnCache::new(100));
        let mut comp = CachingComputation::new(net.new_computation(), Arc::clone(&cache));
        assert!(!comp.add_input_by_hash(7));
        assert_eq!(comp.batch_size(), 0);

        comp.add_input(7, planes(), vec![5]);
        comp.compute_blocking().unwrap();

        let mut next = CachingComputation::new(net.new_computation(), cache);
        assert!(next.add_input_by_hash(7));
        assert_eq!(next.batch_size(), 1);
    }

    #[test]
    fn mixed_batch_keeps_slot_order() {
        let net = UniformNetwork::new();
        let cache = Arc::new(NnCache::new(100));

        let mut warm = CachingComputation::new(net.new_computation(), Arc::clone(&cache));
        warm.add_input(1, planes(), vec![4, 5]);
        warm.compute_blocking().unwrap();

        let mut comp = CachingComputation::new(net.new_computation(), cache);
        assert!(comp.add_input(1, planes(), vec![4, 5]));
        assert!(!comp.add_input(2, planes(), vec![6]));
        comp.compute_blocking().unwrap();
        assert_eq!(comp.batch_size(), 2);
        // Slot 1 covers move 6 but not move 4.
        assert!(comp.p(1, 6) > 0.0);
        assert_eq!(comp.p(1, 4), 0.0);
        assert!(comp.p(0, 4) > 0.0);
    }
}
