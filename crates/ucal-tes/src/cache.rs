use serde::{Deserialize, Serialize};

/// Whether a cache lookup reused the held value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The slot already held the key.
    Hit,
    /// The slot was empty or held another key and was rebuilt.
    Miss,
}

/// Hit and miss counters of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served from the slot.
    pub hits: usize,
    /// Lookups that rebuilt the slot.
    pub misses: usize,
}

/// Single-slot cache: holds the value for the most recent key and replaces it
/// when a different key is requested.
#[derive(Debug)]
pub struct SlotCache<K, V> {
    slot: Option<(K, V)>,
    stats: CacheStats,
}

impl<K, V> Default for SlotCache<K, V> {
    fn default() -> Self {
        Self {
            slot: None,
            stats: CacheStats::default(),
        }
    }
}

impl<K: PartialEq, V> SlotCache<K, V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, building it with `build` on a miss.
    ///
    /// A failed build leaves the previous slot untouched.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: K,
        build: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<(&mut V, CacheOutcome), E> {
        if matches!(&self.slot, Some((held, _)) if *held == key) {
            self.stats.hits += 1;
            let (_, value) = self.slot.as_mut().expect("slot checked above");
            return Ok((value, CacheOutcome::Hit));
        }
        let value = build(&key)?;
        self.stats.misses += 1;
        let (_, value) = self.slot.insert((key, value));
        Ok((value, CacheOutcome::Miss))
    }

    /// Key currently held.
    pub fn key(&self) -> Option<&K> {
        self.slot.as_ref().map(|(key, _)| key)
    }

    /// Value currently held.
    pub fn value(&self) -> Option<&V> {
        self.slot.as_ref().map(|(_, value)| value)
    }

    /// Drops the held value.
    pub fn invalidate(&mut self) {
        self.slot = None;
    }

    /// Counters accumulated since creation.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
