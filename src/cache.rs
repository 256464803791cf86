//! Memo of balance results keyed by (date, ore tonnes).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::balance::BalanceResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub date: NaiveDate,
    ore_bits: Option<u64>,
}

impl CacheKey {
    pub fn new(date: NaiveDate, ore_tonnes: Option<f64>) -> Self {
        Self {
            date,
            ore_bits: ore_tonnes.map(f64::to_bits),
        }
    }

    pub fn ore_tonnes(&self) -> Option<f64> {
        self.ore_bits.map(f64::from_bits)
    }
}

/// One mutex per key, created on demand and dropped once no caller holds or
/// waits on it.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    /// Run `f` while holding the lock for `key`.
    pub fn with<R>(&self, key: K, f: impl FnOnce() -> R) -> R {
        let lock = Arc::clone(self.locks.lock().entry(key).or_default());
        let out = {
            let _guard = lock.lock();
            f()
        };
        let mut locks = self.locks.lock();
        // The map and this call hold the only references: nobody is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
        out
    }

    /// Keys with a live lock.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Called after every clear with the date cleared, or `None` for all dates.
pub type CacheListener = Box<dyn Fn(Option<NaiveDate>) + Send + Sync>;

/// Concurrent result cache.
///
/// Lookups share a read lock. Each key has its own compute lock, so two
/// callers asking for the same key compute once, while different keys never
/// wait on each other.
#[derive(Default)]
pub struct BalanceCache {
    entries: RwLock<HashMap<CacheKey, Arc<BalanceResult>>>,
    compute_locks: KeyedLocks<CacheKey>,
    listeners: RwLock<Vec<CacheListener>>,
    generation: AtomicU64,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<BalanceResult>> {
        self.entries.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_compute<E>(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<BalanceResult, E>,
    ) -> Result<Arc<BalanceResult>, E> {
        if let Some(hit) = self.get(&key) {
            debug!(date = %key.date, "balance cache hit");
            return Ok(hit);
        }

        self.compute_locks.with(key, || {
            if let Some(hit) = self.get(&key) {
                return Ok(hit);
            }

            debug!(date = %key.date, "balance cache miss");
            let generation = self.generation.load(Ordering::Acquire);
            let result = Arc::new(compute()?);
            // An invalidation while computing means the inputs may have changed
            if self.generation.load(Ordering::Acquire) == generation {
                self.entries.write().insert(key, Arc::clone(&result));
            }
            Ok(result)
        })
    }

    /// Clear one date (every ore-tonnes variant) or everything.
    pub fn invalidate(&self, date: Option<NaiveDate>) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        {
            let mut entries = self.entries.write();
            match date {
                Some(date) => entries.retain(|k, _| k.date != date),
                None => entries.clear(),
            }
        }
        debug!(?date, "balance cache invalidated");
        for listener in self.listeners.read().iter() {
            listener(date);
        }
    }

    pub fn register_listener(&self, listener: CacheListener) {
        self.listeners.write().push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::balance::{BalanceStatus, InflowMap, OutflowMap, PlantMode, StorageChange};
    use crate::resolve::Resolved;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn result(d: NaiveDate) -> BalanceResult {
        let zero = Resolved::zero();
        BalanceResult {
            calculation_date: d,
            inflows: InflowMap::default(),
            outflows: OutflowMap {
                mode: PlantMode::Estimate,
                plant_consumption_net: zero,
                plant_consumption_gross: zero,
                tsf_return: zero,
                evaporation: zero,
                seepage_loss: zero,
                discharge: zero,
                dust_suppression: zero,
                mining_consumption: zero,
                domestic_consumption: zero,
                product_moisture: zero,
                tailings_retention: zero,
            },
            total_inflows: 0.0,
            fresh_inflows: 0.0,
            total_outflows: 0.0,
            net_balance: 0.0,
            storage_change: StorageChange::default(),
            closure_error_m3: 0.0,
            closure_error_percent: 0.0,
            low_fresh_inflow_flag: true,
            ore_processed: zero,
            status: BalanceStatus::Closed,
            applied_transfers: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn computes_once_per_key() {
        let cache = BalanceCache::new();
        let calls = AtomicUsize::new(0);
        let key = CacheKey::new(date(31), Some(1_000.0));
        for _ in 0..3 {
            cache
                .get_or_compute::<()>(key, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(result(date(31)))
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ore_tonnes_distinguish_keys() {
        assert_ne!(CacheKey::new(date(31), None), CacheKey::new(date(31), Some(0.0)));
        assert_eq!(CacheKey::new(date(31), Some(5.5)).ore_tonnes(), Some(5.5));
    }

    #[test]
    fn errors_are_not_cached() {
        let cache = BalanceCache::new();
        let key = CacheKey::new(date(31), None);
        assert!(cache.get_or_compute(key, || Err("boom")).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_one_date_keeps_others_and_notifies() {
        let cache = BalanceCache::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache.register_listener(Box::new(move |d| sink.lock().push(d)));

        for d in [28, 31] {
            cache
                .get_or_compute::<()>(CacheKey::new(date(d), None), || Ok(result(date(d))))
                .unwrap();
        }
        cache.invalidate(Some(date(31)));
        assert!(cache.get(&CacheKey::new(date(28), None)).is_some());
        assert!(cache.get(&CacheKey::new(date(31), None)).is_none());

        cache.invalidate(None);
        assert!(cache.is_empty());
        assert_eq!(*seen.lock(), vec![Some(date(31)), None]);
    }

    #[test]
    fn concurrent_callers_share_one_computation() {
        let cache = Arc::new(BalanceCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new(date(31), None);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache
                        .get_or_compute::<()>(key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(result(date(31)))
                        })
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.compute_locks.is_empty());
    }

    #[test]
    fn compute_locks_are_released_after_use() {
        let cache = BalanceCache::new();
        for d in 1..=20 {
            for ore in [None, Some(1_000.0), Some(2_000.0)] {
                let key = CacheKey::new(date(d), ore);
                cache.get_or_compute::<()>(key, || Ok(result(date(d)))).unwrap();
            }
        }
        assert!(cache.get_or_compute(CacheKey::new(date(21), None), || Err(())).is_err());
        assert_eq!(cache.len(), 60);
        assert!(cache.compute_locks.is_empty());
    }

    #[test]
    fn keyed_locks_serialize_one_key() {
        let locks = Arc::new(KeyedLocks::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                std::thread::spawn(move || {
                    locks.with(date(31), || {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(locks.is_empty());
    }
}
