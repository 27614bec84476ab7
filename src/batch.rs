use std::sync::Arc;

/// The subset of a `multi_get` call's keys a batch producer must resolve.
///
/// A batch producer must return exactly one result per index, in the order
/// of [`KeyBatch::indices`].
#[derive(Debug, Clone)]
pub struct KeyBatch<K> {
    keys: Arc<[K]>,
    indices: Vec<usize>,
}

impl<K> KeyBatch<K> {
    pub(crate) fn new(keys: Arc<[K]>, indices: Vec<usize>) -> Self {
        KeyBatch { keys, indices }
    }

    /// Positions into the full key list passed to `multi_get`.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// The full key list passed to `multi_get`.
    pub fn all_keys(&self) -> &[K] {
        &self.keys
    }

    /// The keys at [`KeyBatch::indices`], in order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.indices.iter().map(|&i| &self.keys[i])
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
