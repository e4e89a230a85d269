//! Reuse of analysis results across sessions.

use super::{BufferSlots, Resolution, Signature, analyze};
use crate::{HashMap, KernelRecord};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Shared cache of [`Resolution`]s keyed by [`Signature`].
///
/// Cloning is cheap and clones share entries. A hit returns exactly what the
/// analysis would have produced, warnings included.
///
/// The cache holds at most `capacity` entries. Inserting past that evicts the
/// oldest entry first; an evicted signature is simply analysed again on its
/// next use.
#[derive(Debug, Clone)]
pub struct FusionCache {
    inner: Arc<Mutex<CacheInner>>,
}

#[derive(Debug)]
struct CacheInner {
    entries: HashMap<Signature, Arc<Resolution>>,
    order: VecDeque<Signature>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl Default for FusionCache {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl FusionCache {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new() -> Self {
        Self::default()
    }

    /// A cache holding at most `capacity` entries; zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::default(),
                order: VecDeque::with_capacity(capacity),
                capacity,
                hits: 0,
                misses: 0,
            })),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn resolve(&self, records: &[KernelRecord], slots: &BufferSlots) -> Arc<Resolution> {
        let signature = Signature::of(records, slots);
        let mut inner = self.inner.lock();
        if let Some(resolution) = inner.entries.get(&signature).cloned() {
            inner.hits += 1;
            log::debug!("fusion cache hit ({} kernels)", records.len());
            return resolution;
        }
        inner.misses += 1;
        let resolution = Arc::new(analyze(records, slots));
        if inner.entries.len() >= inner.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                log::debug!("fusion cache full, evicted oldest entry");
            }
        }
        inner.order.push_back(signature.clone());
        inner.entries.insert(signature, resolution.clone());
        resolution
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferId, CompletionOptions, NdRange, Range};

    fn records(local: usize) -> Vec<KernelRecord> {
        let tmp = BufferId::new();
        let nd = NdRange::new(Range::linear(64).unwrap(), Range::linear(local).unwrap()).unwrap();
        vec![
            KernelRecord::builder("producer", nd.clone())
                .promote_local(tmp)
                .build(),
            KernelRecord::builder("consumer", nd).promote_private(tmp).build(),
        ]
    }

    #[test]
    fn test_hit_replays_identical_decision() {
        let cache = FusionCache::new();
        let first = records(8);
        let second = records(8);

        let slots = BufferSlots::of(&first);
        let (d1, w1) = cache
            .resolve(&first, &slots)
            .bind(&first, &slots, CompletionOptions::default());

        let slots = BufferSlots::of(&second);
        let (d2, w2) = cache
            .resolve(&second, &slots)
            .bind(&second, &slots, CompletionOptions::default());

        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                entries: 1
            }
        );
        assert!(d1.is_fused() && d2.is_fused());
        assert_eq!(w1.len(), 1);
        assert_eq!(w1.len(), w2.len());
        assert_eq!(w1[0].kind, w2[0].kind);
        // Rebound to the second session's buffer.
        assert_eq!(w2[0].buffer, Some(second[0].requests()[0].buffer));
    }

    #[test]
    fn test_distinct_structure_misses() {
        let cache = FusionCache::new();
        for local in [8, 16] {
            let r = records(local);
            cache.resolve(&r, &BufferSlots::of(&r));
        }
        assert_eq!(cache.stats().misses, 2);
        assert_eq!(cache.stats().entries, 2);

        cache.clear();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_full_cache_evicts_oldest() {
        let cache = FusionCache::with_capacity(2);
        assert_eq!(cache.capacity(), 2);
        let [r8, r16, r32] = [8, 16, 32].map(records);
        for r in [&r8, &r16, &r32] {
            cache.resolve(r, &BufferSlots::of(r));
        }
        assert_eq!(cache.stats().entries, 2);

        // The newest two still hit; the first was evicted and misses again.
        cache.resolve(&r32, &BufferSlots::of(&r32));
        cache.resolve(&r16, &BufferSlots::of(&r16));
        assert_eq!(cache.stats().hits, 2);
        cache.resolve(&r8, &BufferSlots::of(&r8));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 2,
                misses: 4,
                entries: 2
            }
        );
    }

    #[test]
    fn test_zero_capacity_keeps_one_entry() {
        let cache = FusionCache::with_capacity(0);
        let r = records(8);
        cache.resolve(&r, &BufferSlots::of(&r));
        cache.resolve(&r, &BufferSlots::of(&r));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = FusionCache::new();
        let shared = cache.clone();
        let r = records(8);
        cache.resolve(&r, &BufferSlots::of(&r));
        shared.resolve(&r, &BufferSlots::of(&r));
        assert_eq!(shared.stats().hits, 1);
    }
}
