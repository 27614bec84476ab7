//! Metrics emitted by an [`OpCache`](crate::OpCache).
//!
//! Attach a [`MetricsSink`] through
//! [`OpCacheConfig::with_metrics`](crate::OpCacheConfig::with_metrics) to
//! observe how lookups resolve, how long operations take, and how much each
//! eviction sweep removes.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Mutex;
//! use async_trait::async_trait;
//! use opcache::{CacheMetric, MetricsSink};
//!
//! struct BufferedSink {
//!     buffer: Mutex<Vec<CacheMetric>>,
//! }
//!
//! #[async_trait]
//! impl MetricsSink for BufferedSink {
//!     fn emit(&self, metric: CacheMetric) {
//!         self.buffer.lock().unwrap().push(metric);
//!     }
//!
//!     async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         // Send buffered metrics to your backend
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::time::Instant;

/// Metrics emitted by the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMetric {
    /// Emitted once per `get` or `multi_get` call.
    Lookup {
        /// Keys served from a valid record.
        hits: usize,
        /// Keys served from a stale record inside its grace period.
        stale: usize,
        /// Keys that had to be produced before returning.
        misses: usize,
    },
    /// Emitted once per operation (or batch operation) execution.
    Load {
        /// Number of keys the execution produced results for.
        keys: usize,
        /// Results not cached because the error policy discarded them.
        discarded: usize,
        /// Whether this was a background refresh.
        background: bool,
        /// Latency of the operation in milliseconds.
        latency_ms: f64,
    },
    /// Emitted once per eviction sweep.
    Evict {
        /// Records removed by the sweep.
        removed: usize,
        /// Records left after the sweep.
        remaining: usize,
        /// Latency of the sweep in milliseconds.
        latency_ms: f64,
    },
}

/// Trait for receiving cache metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Emit a single metric.
    ///
    /// This is called synchronously in the hot path of cache operations.
    /// Implementations should be fast (e.g., buffer metrics in memory).
    fn emit(&self, metric: CacheMetric);

    /// Flush any buffered metrics.
    ///
    /// Called when the caller wants to ensure all metrics are persisted.
    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
