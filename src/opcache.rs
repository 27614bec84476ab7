use async_trait::async_trait;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::batch::KeyBatch;
use crate::config::OpCacheConfig;
use crate::entry::{Freshness, OpResult, ReloadClaim};
use crate::error::CacheError;
use crate::evictor::{Evictable, Scheduler};
use crate::metrics::{CacheMetric, elapsed_ms};
use crate::store::ResultStore;

/// A cached outcome paired with whether it was written to the store.
type Loaded<T, E> = (Result<T, E>, bool);

/// Operation result cache with grace periods and background refresh.
///
/// `OpCache` memoizes the outcome of arbitrary operations, keyed by a value
/// derived from the operation's arguments (a tuple works well for
/// multi-argument operations). Both successful results and errors are cached
/// and replayed verbatim.
///
/// Each cached outcome is valid for `result_expiration`. After that it is
/// still served for `result_grace_expiration`, but serving it triggers a
/// refresh in the background. At most one refresh runs per stale record, no
/// matter how many callers observe it. Past the grace period the operation
/// is executed again before returning.
///
/// Background refreshes are detached tokio tasks. They are never cancelled
/// or joined: each runs its operation to completion and commits the outcome,
/// even if every handle to the cache has been dropped meanwhile.
pub struct OpCache<K, T, E> {
    shared: Arc<Shared<K, T, E>>,
}

struct Shared<K, T, E> {
    config: OpCacheConfig<E>,
    store: ResultStore<K, T, E>,
}

impl<K, T, E> Clone for OpCache<K, T, E> {
    fn clone(&self) -> Self {
        OpCache {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, T, E> OpCache<K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a new cache that is not swept automatically.
    ///
    /// Expired records stay in memory until [`OpCache::evict`] is called, for
    /// example by [`run_evictor`](crate::run_evictor).
    pub fn new(config: OpCacheConfig<E>) -> Self {
        OpCache {
            shared: Arc::new(Shared {
                config,
                store: ResultStore::new(),
            }),
        }
    }

    /// Create a new cache and register it with `scheduler`.
    ///
    /// The cache is swept every `auto_evict_period_minutes` (the default
    /// period if 0). A negative period skips the registration. The scheduler
    /// only holds a weak reference, so dropping every handle to the cache
    /// removes it from the schedule.
    pub fn with_scheduler(
        config: OpCacheConfig<E>,
        scheduler: &Scheduler,
    ) -> Result<Self, CacheError> {
        let cache = Self::new(config);

        if let Some(period) = cache.shared.config.auto_evict_period() {
            let weak: Weak<Shared<K, T, E>> = Arc::downgrade(&cache.shared);
            let evictable: Weak<dyn Evictable> = weak;
            scheduler.register(evictable, period)?;
        }

        Ok(cache)
    }

    /// The configuration this cache was created with.
    pub fn config(&self) -> &OpCacheConfig<E> {
        &self.shared.config
    }

    /// Get the outcome of an operation.
    ///
    /// - Valid cached outcome: returned immediately, `producer` is not called.
    /// - Stale outcome within its grace period: returned immediately, and
    ///   `producer` is spawned in the background to refresh it unless another
    ///   refresh already owns the record.
    /// - Otherwise: `producer` is awaited, its outcome cached (subject to the
    ///   error policy) and returned.
    ///
    /// # Example
    /// ```ignore
    /// let user = cache.get(user_id, move || async move {
    ///     db.load_user(user_id).await
    /// }).await;
    /// ```
    pub async fn get<F, Fut>(&self, key: K, producer: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let record = self.shared.store.get(&key).await;

        match (Freshness::of(record.as_deref()), record) {
            (Freshness::Valid, Some(record)) => {
                self.shared.emit_lookup(1, 0, 0);
                record.outcome().clone()
            }
            (Freshness::Stale, Some(record)) => {
                self.shared.emit_lookup(0, 1, 0);
                let outcome = record.outcome().clone();
                if let Some(claim) = record.try_claim_reload() {
                    self.spawn_refresh(key, claim, producer);
                }
                outcome
            }
            _ => {
                self.shared.emit_lookup(0, 0, 1);
                let (outcome, _) = self.shared.load(key, producer, false).await;
                outcome
            }
        }
    }

    /// Get the outcomes of a batch operation.
    ///
    /// `batch_producer` receives a [`KeyBatch`] naming a subset of `keys` by
    /// index and must return one outcome per index, in the same order.
    ///
    /// Keys with a valid or grace-valid record are answered from the cache.
    /// All other keys are produced by a single awaited `batch_producer` call.
    /// Stale keys whose refresh this call manages to claim are refreshed by
    /// a second, background `batch_producer` call.
    ///
    /// The returned outcomes line up with `keys`. Duplicate keys are allowed.
    ///
    /// Returns [`CacheError::BatchLengthMismatch`] if the awaited batch
    /// returns the wrong number of outcomes; nothing from that batch is
    /// cached in that case.
    pub async fn multi_get<F, Fut>(
        &self,
        keys: Vec<K>,
        batch_producer: F,
    ) -> Result<Vec<Result<T, E>>, CacheError>
    where
        F: Fn(KeyBatch<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Result<T, E>>> + Send + 'static,
    {
        let keys: Arc<[K]> = keys.into();
        let records = self.shared.store.get_many(&keys).await;

        let mut outcomes = Vec::with_capacity(keys.len());
        let mut misses = Vec::new();
        let mut stale = Vec::new();
        let mut hits = 0;

        for (idx, record) in records.into_iter().enumerate() {
            match (Freshness::of(record.as_deref()), record) {
                (Freshness::Valid, Some(record)) => {
                    hits += 1;
                    outcomes.push(Some(record.outcome().clone()));
                }
                (Freshness::Stale, Some(record)) => {
                    outcomes.push(Some(record.outcome().clone()));
                    stale.push((idx, record));
                }
                _ => {
                    outcomes.push(None);
                    misses.push(idx);
                }
            }
        }

        self.shared.emit_lookup(hits, stale.len(), misses.len());

        let batch_producer = Arc::new(batch_producer);

        // No suspension point between claiming and spawning, so a cancelled
        // call never strands a claim.
        let claimed: Vec<_> = stale
            .into_iter()
            .filter_map(|(idx, record)| record.try_claim_reload().map(|claim| (idx, claim)))
            .collect();
        if !claimed.is_empty() {
            self.spawn_batch_refresh(Arc::clone(&keys), claimed, Arc::clone(&batch_producer));
        }

        if !misses.is_empty() {
            let loaded = self
                .shared
                .load_batch(&keys, misses.clone(), batch_producer.as_ref(), false)
                .await?;
            for (idx, (outcome, _)) in misses.into_iter().zip(loaded) {
                outcomes[idx] = Some(outcome);
            }
        }

        // Every slot is filled: hits and stale above, misses by the length-checked batch.
        Ok(outcomes.into_iter().flatten().collect())
    }

    /// Install an outcome for `key` with the configured expirations.
    ///
    /// Bypasses the error policy.
    pub async fn set(&self, key: K, outcome: Result<T, E>) {
        let config = &self.shared.config;
        self.set_with_expiration(
            key,
            outcome,
            config.result_expiration,
            config.result_grace_expiration,
        )
        .await
    }

    /// Install an outcome for `key` with custom expirations.
    pub async fn set_with_expiration(
        &self,
        key: K,
        outcome: Result<T, E>,
        expiration: Duration,
        grace_expiration: Duration,
    ) {
        self.shared
            .store
            .set(key, OpResult::new(outcome, expiration, grace_expiration))
            .await
    }

    /// Remove the given keys from the cache.
    pub async fn remove(&self, keys: &[K]) {
        self.shared.store.remove(keys).await
    }

    /// Remove every entry from the cache.
    pub async fn clear(&self) {
        self.shared.store.clear().await
    }

    /// Remove every entry that is no longer grace-valid.
    ///
    /// Returns the number of removed entries.
    pub async fn evict(&self) -> usize {
        self.shared.evict().await
    }

    /// Number of entries currently held, including expired ones not yet evicted.
    pub async fn len(&self) -> usize {
        self.shared.store.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn spawn_refresh<F, Fut>(&self, key: K, claim: ReloadClaim<T, E>, producer: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tracing::debug!("Refreshing stale result in the background");

        tokio::spawn(async move {
            // An uncommitted or panicked refresh drops the claim, letting a
            // later lookup retry within the same grace period.
            let (_, committed) = shared.load(key, producer, true).await;
            if committed {
                claim.committed();
            }
        });
    }

    fn spawn_batch_refresh<F, Fut>(
        &self,
        keys: Arc<[K]>,
        claimed: Vec<(usize, ReloadClaim<T, E>)>,
        batch_producer: Arc<F>,
    ) where
        F: Fn(KeyBatch<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<Result<T, E>>> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let indices: Vec<usize> = claimed.iter().map(|(idx, _)| *idx).collect();
        tracing::debug!(
            "Refreshing stale results in the background: keys={}",
            indices.len()
        );

        tokio::spawn(async move {
            match shared
                .load_batch(&keys, indices, batch_producer.as_ref(), true)
                .await
            {
                Ok(loaded) => {
                    for ((_, claim), (_, committed)) in claimed.into_iter().zip(loaded) {
                        if committed {
                            claim.committed();
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Background batch refresh failed: error={}", e);
                }
            }
        });
    }
}

impl<K, T, E> Shared<K, T, E>
where
    K: Eq + Hash + Clone,
    T: Clone,
    E: Clone,
{
    /// Execute a single operation and cache its outcome.
    async fn load<F, Fut>(&self, key: K, producer: F, background: bool) -> Loaded<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let outcome = producer().await;

        let committed = match self.config.expirations(&outcome) {
            Some((expiration, grace_expiration)) => {
                let record = OpResult::new(outcome.clone(), expiration, grace_expiration);
                self.store.set(key, record).await;
                true
            }
            None => {
                tracing::debug!("Error result discarded by policy: background={}", background);
                false
            }
        };

        self.emit(CacheMetric::Load {
            keys: 1,
            discarded: usize::from(!committed),
            background,
            latency_ms: elapsed_ms(start),
        });

        (outcome, committed)
    }

    /// Execute a batch operation for `indices` of `keys` and cache its outcomes.
    async fn load_batch<F, Fut>(
        &self,
        keys: &Arc<[K]>,
        indices: Vec<usize>,
        batch_producer: &F,
        background: bool,
    ) -> Result<Vec<Loaded<T, E>>, CacheError>
    where
        F: Fn(KeyBatch<K>) -> Fut,
        Fut: Future<Output = Vec<Result<T, E>>>,
    {
        let start = Instant::now();
        let expected = indices.len();
        let outcomes = batch_producer(KeyBatch::new(Arc::clone(keys), indices.clone())).await;

        if outcomes.len() != expected {
            tracing::warn!(
                "Batch producer broke its contract: expected={}, actual={}, background={}",
                expected,
                outcomes.len(),
                background
            );
            return Err(CacheError::BatchLengthMismatch {
                expected,
                actual: outcomes.len(),
            });
        }

        let mut records = Vec::with_capacity(expected);
        let mut loaded = Vec::with_capacity(expected);
        for (idx, outcome) in indices.into_iter().zip(outcomes) {
            let committed = match self.config.expirations(&outcome) {
                Some((expiration, grace_expiration)) => {
                    let record = OpResult::new(outcome.clone(), expiration, grace_expiration);
                    records.push((keys[idx].clone(), record));
                    true
                }
                None => false,
            };
            loaded.push((outcome, committed));
        }

        let discarded = expected - records.len();
        self.store.set_many(records).await;

        self.emit(CacheMetric::Load {
            keys: expected,
            discarded,
            background,
            latency_ms: elapsed_ms(start),
        });

        Ok(loaded)
    }
}

impl<K, T, E> Shared<K, T, E> {
    fn emit(&self, metric: CacheMetric) {
        if let Some(sink) = &self.config.metrics {
            sink.emit(metric);
        }
    }

    fn emit_lookup(&self, hits: usize, stale: usize, misses: usize) {
        self.emit(CacheMetric::Lookup {
            hits,
            stale,
            misses,
        });
    }
}

#[async_trait]
impl<K, T, E> Evictable for Shared<K, T, E>
where
    K: Eq + Hash + Send + Sync,
    T: Send + Sync,
    E: Send + Sync,
{
    async fn evict(&self) -> usize {
        let start = Instant::now();
        let (removed, remaining) = self.store.evict().await;

        tracing::debug!(
            "Evicted expired results: removed={}, remaining={}",
            removed,
            remaining
        );
        self.emit(CacheMetric::Evict {
            removed,
            remaining,
            latency_ms: elapsed_ms(start),
        });

        removed
    }
}

#[async_trait]
impl<K, T, E> Evictable for OpCache<K, T, E>
where
    K: Eq + Hash + Send + Sync,
    T: Send + Sync,
    E: Send + Sync,
{
    async fn evict(&self) -> usize {
        self.shared.evict().await
    }
}
