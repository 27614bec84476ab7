//! opcache - An operation result cache with background refresh
//!
//! This library memoizes the outcome of arbitrary, possibly expensive
//! operations (database queries, remote calls) with:
//! - Time-based expiration of cached results and errors
//! - A grace period serving stale results while refreshing in the background
//! - At most one background refresh per stale key
//! - Batch lookups that only execute the operation for the keys that need it
//! - Periodic eviction, caller-driven or through a shared scheduler
//!
//! # Example
//!
//! ```ignore
//! use opcache::{ErrorVerdict, OpCache, OpCacheConfig, Scheduler};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), opcache::CacheError> {
//!     let scheduler = Scheduler::new();
//!
//!     let config = OpCacheConfig::new(Duration::from_secs(60), Duration::from_secs(240))
//!         .with_error_policy(|err: &DbError| {
//!             if err.is_transient() {
//!                 ErrorVerdict::discard()
//!             } else {
//!                 ErrorVerdict::expire_after(Duration::from_secs(5), Duration::ZERO)
//!             }
//!         });
//!     let users: OpCache<u64, User, DbError> = OpCache::with_scheduler(config, &scheduler)?;
//!
//!     // Single key: the closure only runs when the cache cannot answer
//!     let user = users.get(42, || async { db.load_user(42).await }).await;
//!
//!     // Batch: the closure receives only the keys that must be loaded
//!     let many = users
//!         .multi_get(vec![1, 2, 3], |batch| async move {
//!             db.load_users(batch.keys().copied().collect()).await
//!         })
//!         .await?;
//!
//!     scheduler.shutdown();
//!     Ok(())
//! }
//! ```

mod batch;
mod config;
mod entry;
mod error;
mod evictor;
mod metrics;
mod opcache;
mod store;

// Re-export public API
pub use batch::KeyBatch;
pub use config::{
    DEFAULT_EVICT_PERIOD_MINUTES, ErrorPolicy, ErrorVerdict, OpCacheConfig, OpCacheSettings,
};
pub use error::CacheError;
pub use evictor::{DEFAULT_SCHEDULER_TICK, Evictable, Scheduler, run_evictor};
pub use metrics::{CacheMetric, MetricsSink};
pub use opcache::OpCache;
