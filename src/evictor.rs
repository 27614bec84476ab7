//! Periodic eviction of expired cache entries.
//!
//! Two ways to keep caches from accumulating expired entries:
//!
//! - [`run_evictor`]: a caller-driven loop sweeping a fixed list of caches
//!   until a shutdown future resolves.
//! - [`Scheduler`]: an application-owned ticker that caches register with at
//!   construction (see [`OpCache::with_scheduler`](crate::OpCache::with_scheduler)),
//!   each swept on its own period.

use async_trait::async_trait;
use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, interval_at};

use crate::entry::deadline;
use crate::error::CacheError;

/// Default tick of a [`Scheduler`].
pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_secs(60);

/// Taken off each scheduled period so a coarse tick landing just before the
/// due time does not postpone the sweep by a whole tick.
const EVICT_SLACK: Duration = Duration::from_secs(5);

/// Shortest period a ticker accepts.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Something that can drop its expired entries.
///
/// Every [`OpCache`](crate::OpCache) is evictable, whatever its type parameters.
#[async_trait]
pub trait Evictable: Send + Sync {
    /// Remove expired entries, returning how many were removed.
    async fn evict(&self) -> usize;
}

/// Sweep `caches` every `period` until `shutdown` resolves.
///
/// The first sweep happens one `period` after the call.
///
/// # Example
/// ```ignore
/// let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
/// tokio::spawn(run_evictor(
///     Duration::from_secs(300),
///     vec![Arc::new(users.clone()), Arc::new(orders.clone())],
///     async move { let _ = stop_rx.await; },
/// ));
/// ```
pub async fn run_evictor<S>(period: Duration, caches: Vec<Arc<dyn Evictable>>, shutdown: S)
where
    S: Future<Output = ()>,
{
    let period = period.max(MIN_PERIOD);
    let mut ticker = interval_at(deadline(Instant::now(), period), period);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let removed: usize = join_all(caches.iter().map(|cache| cache.evict()))
            .await
            .into_iter()
            .sum();
        tracing::debug!(
            "Evictor sweep done: caches={}, removed={}",
            caches.len(),
            removed
        );
    }

    tracing::debug!("Evictor stopped");
}

/// Application-owned eviction schedule shared by many caches.
///
/// The ticking task starts on the first registration and runs until
/// [`Scheduler::shutdown`] is called or every handle to the scheduler is
/// dropped. On each tick, registered caches whose own period has elapsed
/// are swept. Caches are held weakly and forgotten once dropped.
///
/// Cloning yields another handle to the same schedule.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    tick: Duration,
    state: Mutex<SchedulerState>,
    shutdown: watch::Sender<bool>,
}

#[derive(Default)]
struct SchedulerState {
    caches: Vec<ScheduledCache>,
    started: bool,
    stopped: bool,
}

struct ScheduledCache {
    cache: Weak<dyn Evictable>,
    period: Duration,
    next_evict_at: Instant,
}

impl Scheduler {
    /// Create a scheduler ticking every [`DEFAULT_SCHEDULER_TICK`].
    pub fn new() -> Self {
        Self::with_tick(DEFAULT_SCHEDULER_TICK)
    }

    /// Create a scheduler with a custom tick, at least one millisecond.
    pub fn with_tick(tick: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Scheduler {
            inner: Arc::new(SchedulerInner {
                tick: tick.max(MIN_PERIOD),
                state: Mutex::new(SchedulerState::default()),
                shutdown,
            }),
        }
    }

    /// How often the scheduler checks for due caches.
    pub fn tick(&self) -> Duration {
        self.inner.tick
    }

    /// Register `cache` to be swept every `period`.
    ///
    /// Starts the ticking task on the first registration, which requires a
    /// tokio runtime.
    pub fn register(&self, cache: Weak<dyn Evictable>, period: Duration) -> Result<(), CacheError> {
        let mut state = self.inner.lock_state();
        if state.stopped {
            return Err(CacheError::SchedulerStopped);
        }

        if !state.started {
            let handle = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
            handle.spawn(run_schedule(
                Arc::downgrade(&self.inner),
                self.inner.tick,
                self.inner.shutdown.subscribe(),
            ));
            state.started = true;
            tracing::debug!("Eviction scheduler started: tick={:?}", self.inner.tick);
        }

        let period = period.saturating_sub(EVICT_SLACK.min(self.inner.tick / 2));
        state.caches.push(ScheduledCache {
            cache,
            period,
            next_evict_at: deadline(Instant::now(), period),
        });

        Ok(())
    }

    /// Number of registered caches that are still alive.
    pub fn registered(&self) -> usize {
        self.inner
            .lock_state()
            .caches
            .iter()
            .filter(|scheduled| scheduled.cache.strong_count() > 0)
            .count()
    }

    /// Stop the ticking task and forget every registered cache.
    ///
    /// Later registrations fail with [`CacheError::SchedulerStopped`].
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        state.stopped = true;
        state.caches.clear();
        self.inner.shutdown.send_replace(true);
        tracing::debug!("Eviction scheduler shut down");
    }

    /// Whether [`Scheduler::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.lock_state().stopped
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Collect the caches due for a sweep at `now` and schedule their next
    /// sweep. Dropped caches are forgotten.
    fn take_due(&self, now: Instant) -> Vec<Arc<dyn Evictable>> {
        let mut state = self.lock_state();
        state
            .caches
            .retain(|scheduled| scheduled.cache.strong_count() > 0);

        let mut due = Vec::new();
        for scheduled in state.caches.iter_mut() {
            if now < scheduled.next_evict_at {
                continue;
            }
            if let Some(cache) = scheduled.cache.upgrade() {
                due.push(cache);
                scheduled.next_evict_at = deadline(now, scheduled.period);
            }
        }
        due
    }
}

async fn run_schedule(
    inner: Weak<SchedulerInner>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(deadline(Instant::now(), tick), tick);

    loop {
        tokio::select! {
            // Fires on shutdown, or errors once every scheduler handle is gone
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let Some(scheduler) = inner.upgrade() else {
            break;
        };
        let due = scheduler.take_due(Instant::now());
        drop(scheduler);

        if due.is_empty() {
            continue;
        }

        let removed: usize = join_all(due.iter().map(|cache| cache.evict()))
            .await
            .into_iter()
            .sum();
        tracing::debug!(
            "Scheduled sweep done: caches={}, removed={}",
            due.len(),
            removed
        );
    }

    tracing::debug!("Eviction scheduler task exited");
}
