use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::entry::OpResult;

/// Thread-safe mapping from keys to their cached operation results.
///
/// The lock only guards the mapping itself. Each record guards its own
/// reload flag, so refreshing one key never blocks lookups of another.
pub(crate) struct ResultStore<K, T, E> {
    records: RwLock<HashMap<K, Arc<OpResult<T, E>>>>,
}

impl<K, T, E> ResultStore<K, T, E>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        ResultStore {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Return the record for `key`, if any.
    pub async fn get(&self, key: &K) -> Option<Arc<OpResult<T, E>>> {
        self.records.read().await.get(key).cloned()
    }

    /// Return the records for all `keys` in order, under a single read lock.
    pub async fn get_many(&self, keys: &[K]) -> Vec<Option<Arc<OpResult<T, E>>>> {
        let records = self.records.read().await;
        keys.iter().map(|key| records.get(key).cloned()).collect()
    }

    /// Install `record` for `key`, replacing any previous one.
    pub async fn set(&self, key: K, record: OpResult<T, E>) {
        self.records.write().await.insert(key, Arc::new(record));
    }

    /// Install several records under a single write lock.
    pub async fn set_many(&self, records: Vec<(K, OpResult<T, E>)>) {
        if records.is_empty() {
            return;
        }

        let mut state = self.records.write().await;
        for (key, record) in records {
            state.insert(key, Arc::new(record));
        }
    }

    /// Remove the given keys. Absent keys are ignored.
    pub async fn remove(&self, keys: &[K]) {
        let mut state = self.records.write().await;
        for key in keys {
            state.remove(key);
        }
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    /// Remove every record that is no longer grace-valid.
    ///
    /// Returns the number of removed and remaining records.
    pub async fn evict(&self) -> (usize, usize) {
        let mut state = self.records.write().await;
        let before = state.len();
        state.retain(|_, record| record.is_grace_valid());
        (before - state.len(), state.len())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}
