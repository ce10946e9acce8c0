//! Thread-safe result cache keyed by canonical parameter signature.
//!
//! Each key owns a slot guarded by its own mutex. A worker that misses holds
//! the slot lock while it evaluates, so a second worker asking for the same
//! key waits and then reads the stored outcome: every combination is
//! evaluated at most once.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use sweep_types::{CacheKey, EvalError, EvaluationResult};

/// Stored outcome of one evaluation, success or failure.
pub type CachedOutcome = Result<EvaluationResult, EvalError>;

/// Whether a lookup was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
}

#[derive(Debug, Default)]
struct CacheSlot {
    outcome: Mutex<Option<CachedOutcome>>,
}

#[derive(Debug, Default)]
struct Counters {
    requests: u64,
    hits: u64,
}

/// In-memory cache of evaluation outcomes.
#[derive(Debug, Default)]
pub struct ResultCache {
    slots: DashMap<CacheKey, Arc<CacheSlot>>,
    counters: RwLock<Counters>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &CacheKey) -> Arc<CacheSlot> {
        // Clone the Arc so the shard guard is released before the slot lock
        // is taken.
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CacheSlot::default()))
            .clone()
    }

    fn record(&self, hit: bool) {
        let mut counters = self.counters.write();
        counters.requests += 1;
        if hit {
            counters.hits += 1;
        }
    }

    /// Successful result stored under `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<EvaluationResult> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()));
        let found = slot.and_then(|slot| {
            let outcome = slot.outcome.lock();
            match outcome.as_ref() {
                Some(Ok(result)) => Some(result.clone()),
                _ => None,
            }
        });
        self.record(found.is_some());
        found
    }

    /// Insert-if-absent. Returns `false` when the key already holds an
    /// outcome, which is left untouched.
    pub fn put(&self, key: CacheKey, result: EvaluationResult) -> bool {
        let slot = self.slot(&key);
        let mut outcome = slot.outcome.lock();
        if outcome.is_some() {
            return false;
        }
        *outcome = Some(Ok(result));
        true
    }

    /// Return the stored outcome for `key`, or run `evaluate` exactly once
    /// under the key's lock and store what it returns.
    pub fn get_or_evaluate<F>(&self, key: &CacheKey, evaluate: F) -> (CachedOutcome, CacheLookup)
    where
        F: FnOnce() -> CachedOutcome,
    {
        let slot = self.slot(key);
        let mut stored = slot.outcome.lock();
        if let Some(outcome) = stored.as_ref() {
            let outcome = outcome.clone();
            drop(stored);
            self.record(true);
            return (outcome, CacheLookup::Hit);
        }

        let outcome = evaluate();
        *stored = Some(outcome.clone());
        drop(stored);
        self.record(false);
        (outcome, CacheLookup::Miss)
    }

    /// Drop stored failures (and empty slots) so the next run retries them.
    pub fn purge_failures(&self) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| matches!(slot.outcome.lock().as_ref(), Some(Ok(_))));
        before - self.slots.len()
    }

    /// Number of keys holding an outcome.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().outcome.lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.slots.clear();
        *self.counters.write() = Counters::default();
    }

    pub fn stats(&self) -> CacheStats {
        let counters = self.counters.read();
        CacheStats {
            size: self.len(),
            total_requests: counters.requests,
            hits: counters.hits,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub total_requests: u64,
    pub hits: u64,
}

impl CacheStats {
    pub fn misses(&self) -> u64 {
        self.total_requests - self.hits
    }

    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;
    use sweep_types::{MetricsRecord, ParameterCombination};

    fn result_for(combo: &ParameterCombination, score: f64) -> EvaluationResult {
        EvaluationResult::from_metrics(combo.clone(), &MetricsRecord::default(), score, 0.001)
    }

    #[test]
    fn test_cache_basic_operations() {
        let cache = ResultCache::new();
        let combo = ParameterCombination::new().with("a", 1.0).with("b", 2.0);
        let key = combo.cache_key();

        // First check should be a cache miss
        assert!(cache.get(&key).is_none());

        assert!(cache.put(key.clone(), result_for(&combo, 1.5)));
        // Second put does not overwrite
        assert!(!cache.put(key.clone(), result_for(&combo, 9.0)));

        // Permuted construction hits the same entry
        let permuted = ParameterCombination::new().with("b", 2.0).with("a", 1.0);
        let cached = cache.get(&permuted.cache_key()).unwrap();
        assert_eq!(cached.score, 1.5);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses(), 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn get_or_evaluate_runs_once() {
        let cache = ResultCache::new();
        let combo = ParameterCombination::new().with("x", 3.0);
        let key = combo.cache_key();
        let calls = AtomicUsize::new(0);

        for expected in [CacheLookup::Miss, CacheLookup::Hit, CacheLookup::Hit] {
            let (outcome, lookup) = cache.get_or_evaluate(&key, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(result_for(&combo, 2.0))
            });
            assert_eq!(lookup, expected);
            assert_eq!(outcome.unwrap().score, 2.0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_requests_evaluate_at_most_once() {
        let cache = Arc::new(ResultCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let combo = ParameterCombination::new().with("fast", 10.0).with("slow", 30.0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                let combo = combo.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let (outcome, _) = cache.get_or_evaluate(&combo.cache_key(), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        Ok(result_for(&combo, 4.0))
                    });
                    outcome.unwrap().score
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4.0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.total_requests, 8);
        assert_eq!(stats.hits, 7);
    }

    #[test]
    fn failures_are_cached_until_purged() {
        let cache = ResultCache::new();
        let ok = ParameterCombination::new().with("x", 1.0);
        let bad = ParameterCombination::new().with("x", 2.0);

        cache.get_or_evaluate(&ok.cache_key(), || Ok(result_for(&ok, 1.0)));
        let (outcome, _) = cache.get_or_evaluate(&bad.cache_key(), || {
            Err(EvalError::Failed {
                message: "boom".into(),
            })
        });
        assert!(outcome.is_err());
        assert_eq!(cache.len(), 2);
        // get() only surfaces successes
        assert!(cache.get(&bad.cache_key()).is_none());

        assert_eq!(cache.purge_failures(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&ok.cache_key()).is_some());
    }

    #[test]
    fn clear_resets_entries_and_stats() {
        let cache = ResultCache::new();
        let combo = ParameterCombination::new().with("x", 1.0);
        cache.put(combo.cache_key(), result_for(&combo, 1.0));
        cache.get(&combo.cache_key());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
