//! Credit quota: pure counter transitions plus a persistence adapter.
//!
//! Every generation run costs one credit, charged up front. The counters
//! survive restarts; depletion is computed from them, never enforced at the
//! type level (`used` may exceed `total`).

use crate::error::Result;
use crate::storage::KeyValueStore;

/// Storage key for the total credit balance.
pub const TOTAL_CREDITS_KEY: &str = "totalCredits";
/// Storage key for the consumed credit count.
pub const USED_CREDITS_KEY: &str = "usedCredits";

/// Default credit balance for a fresh store.
pub const DEFAULT_TOTAL_CREDITS: u32 = 10;

/// The credit counters, as a plain value with pure transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaState {
    /// Total credits granted.
    pub total_credits: u32,
    /// Credits consumed so far.
    pub used_credits: u32,
}

impl Default for QuotaState {
    fn default() -> Self {
        Self {
            total_credits: DEFAULT_TOTAL_CREDITS,
            used_credits: 0,
        }
    }
}

impl QuotaState {
    /// Sets a new total and resets usage. Negative or out-of-range values
    /// are rejected with no state change; returns whether it was applied.
    pub fn set_total(&mut self, total: i64) -> bool {
        let Ok(total) = u32::try_from(total) else {
            return false;
        };
        self.total_credits = total;
        self.used_credits = 0;
        true
    }

    /// Resets the consumed count to zero.
    pub fn reset_used(&mut self) {
        self.used_credits = 0;
    }

    /// Charges one credit. Called once per run attempt, whether or not the
    /// attempt ultimately succeeds.
    pub fn consume_one(&mut self) {
        self.used_credits = self.used_credits.saturating_add(1);
    }

    /// Credits still available; never negative.
    pub fn remaining(&self) -> u32 {
        self.total_credits.saturating_sub(self.used_credits)
    }

    /// True once usage has reached the total.
    pub fn is_depleted(&self) -> bool {
        self.used_credits >= self.total_credits
    }
}

/// Quota counters bound to a key-value store.
///
/// Each transition is persisted before the call returns, so a reload always
/// restores the last committed values.
#[derive(Debug)]
pub struct QuotaStore<S: KeyValueStore> {
    state: QuotaState,
    storage: S,
}

impl<S: KeyValueStore> QuotaStore<S> {
    /// Loads the counters from `storage`, falling back to defaults (10/0)
    /// for keys that are absent or unparsable.
    pub fn load(storage: S) -> Result<Self> {
        let total_credits =
            read_counter(&storage, TOTAL_CREDITS_KEY)?.unwrap_or(DEFAULT_TOTAL_CREDITS);
        let used_credits = read_counter(&storage, USED_CREDITS_KEY)?.unwrap_or(0);
        Ok(Self {
            state: QuotaState {
                total_credits,
                used_credits,
            },
            storage,
        })
    }

    /// Current counter values.
    pub fn state(&self) -> QuotaState {
        self.state
    }

    /// Credits still available.
    pub fn remaining(&self) -> u32 {
        self.state.remaining()
    }

    /// True once usage has reached the total.
    pub fn is_depleted(&self) -> bool {
        self.state.is_depleted()
    }

    /// Sets a new total (resetting usage) and persists. Invalid values are
    /// rejected with no state change and no write.
    pub fn set_total(&mut self, total: i64) -> Result<bool> {
        if !self.state.set_total(total) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Resets usage to zero and persists.
    pub fn reset_used(&mut self) -> Result<()> {
        self.state.reset_used();
        self.persist()
    }

    /// Charges one credit and persists.
    pub fn consume_one(&mut self) -> Result<()> {
        self.state.consume_one();
        self.persist()
    }

    fn persist(&mut self) -> Result<()> {
        self.storage
            .set(TOTAL_CREDITS_KEY, &self.state.total_credits.to_string())?;
        self.storage
            .set(USED_CREDITS_KEY, &self.state.used_credits.to_string())
    }
}

fn read_counter<S: KeyValueStore>(storage: &S, key: &str) -> Result<Option<u32>> {
    Ok(storage.get(key)?.and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};

    fn fresh() -> QuotaStore<MemoryStore> {
        QuotaStore::load(MemoryStore::new()).unwrap()
    }

    #[test]
    fn test_defaults_when_empty() {
        let store = fresh();
        assert_eq!(
            store.state(),
            QuotaState {
                total_credits: 10,
                used_credits: 0
            }
        );
        assert_eq!(store.remaining(), 10);
        assert!(!store.is_depleted());
    }

    #[test]
    fn test_set_total_resets_used() {
        let mut store = fresh();
        store.consume_one().unwrap();
        store.consume_one().unwrap();

        assert!(store.set_total(25).unwrap());
        assert_eq!(store.remaining(), 25);
        assert_eq!(store.state().used_credits, 0);
    }

    #[test]
    fn test_set_total_rejects_negative() {
        let mut store = fresh();
        store.consume_one().unwrap();
        let before = store.state();

        assert!(!store.set_total(-1).unwrap());
        assert_eq!(store.state(), before);
    }

    #[test]
    fn test_consume_one_counts_up_to_depletion() {
        let mut store = fresh();
        store.set_total(3).unwrap();

        for k in 1..=3u32 {
            assert!(!store.is_depleted());
            store.consume_one().unwrap();
            assert_eq!(store.state().used_credits, k);
        }
        assert!(store.is_depleted());
        assert_eq!(store.remaining(), 0);

        // Depletion does not clamp the counter.
        store.consume_one().unwrap();
        assert_eq!(store.state().used_credits, 4);
        assert_eq!(store.remaining(), 0);
    }

    #[test]
    fn test_zero_total_is_immediately_depleted() {
        let mut store = fresh();
        assert!(store.set_total(0).unwrap());
        assert!(store.is_depleted());
    }

    #[test]
    fn test_reset_used() {
        let mut store = fresh();
        store.consume_one().unwrap();
        store.reset_used().unwrap();
        assert_eq!(store.state().used_credits, 0);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        let mut store = QuotaStore::load(FileStore::open(dir.path()).unwrap()).unwrap();
        store.set_total(7).unwrap();
        store.consume_one().unwrap();
        store.consume_one().unwrap();
        store.consume_one().unwrap();
        drop(store);

        let reloaded = QuotaStore::load(FileStore::open(dir.path()).unwrap()).unwrap();
        assert_eq!(
            reloaded.state(),
            QuotaState {
                total_credits: 7,
                used_credits: 3
            }
        );
    }

    #[test]
    fn test_unparsable_values_fall_back_to_defaults() {
        let mut storage = MemoryStore::new();
        storage.set(TOTAL_CREDITS_KEY, "not a number").unwrap();
        storage.set(USED_CREDITS_KEY, "-4").unwrap();

        let store = QuotaStore::load(storage).unwrap();
        assert_eq!(
            store.state(),
            QuotaState {
                total_credits: 10,
                used_credits: 0
            }
        );
    }

    #[test]
    fn test_values_persisted_as_decimal_strings() {
        let mut store = fresh();
        store.set_total(7).unwrap();
        store.consume_one().unwrap();

        assert_eq!(
            store.storage.get(TOTAL_CREDITS_KEY).unwrap().as_deref(),
            Some("7")
        );
        assert_eq!(
            store.storage.get(USED_CREDITS_KEY).unwrap().as_deref(),
            Some("1")
        );
    }
}
