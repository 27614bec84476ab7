use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "never" when a deadline does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `from + after`, saturating at a far-future instant instead of overflowing.
pub(crate) fn deadline(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

/// The cached outcome of a single operation execution.
///
/// A record is replaced as a whole when its key is refreshed, so readers
/// never see old and new fields mixed.
pub(crate) struct OpResult<T, E> {
    /// The outcome of the operation. Errors are cached like values.
    outcome: Result<T, E>,

    /// Before this instant the result is valid.
    expires_at: Instant,

    /// Before this instant the result is still usable, but using it after
    /// `expires_at` triggers a background refresh.
    grace_expires_at: Instant,

    /// True while one background refresh owns this record.
    reloading: Mutex<bool>,
}

/// How a lookup classifies a (possibly absent) record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
    /// Record is present and valid.
    Valid,
    /// Record is past its expiration but within its grace period.
    Stale,
    /// Record is absent or past its grace period.
    Invalid,
}

/// Ownership of a record's refresh.
///
/// Dropping the claim gives the refresh back, so a cancelled lookup or a
/// panicking producer never leaves a record claimed. Only a refresh that
/// committed a replacement record calls [`ReloadClaim::committed`].
pub(crate) struct ReloadClaim<T, E> {
    record: Arc<OpResult<T, E>>,
    held: bool,
}

impl<T, E> OpResult<T, E> {
    /// Create a record expiring `expiration` from now, usable for another
    /// `grace_expiration` after that.
    pub fn new(outcome: Result<T, E>, expiration: Duration, grace_expiration: Duration) -> Self {
        let expires_at = deadline(Instant::now(), expiration);
        OpResult {
            outcome,
            expires_at,
            grace_expires_at: deadline(expires_at, grace_expiration),
            reloading: Mutex::new(false),
        }
    }

    pub fn outcome(&self) -> &Result<T, E> {
        &self.outcome
    }

    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }

    pub fn is_grace_valid(&self) -> bool {
        Instant::now() < self.grace_expires_at
    }

    /// Try to take ownership of refreshing this record.
    ///
    /// The flag is checked and set under the record's own lock, so two
    /// callers can never both win. Never suspends.
    pub fn try_claim_reload(self: &Arc<Self>) -> Option<ReloadClaim<T, E>> {
        let mut reloading = self.reloading.lock().unwrap_or_else(PoisonError::into_inner);
        if *reloading {
            return None;
        }
        *reloading = true;

        Some(ReloadClaim {
            record: Arc::clone(self),
            held: true,
        })
    }

    #[cfg(test)]
    pub fn is_reloading(&self) -> bool {
        *self.reloading.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_reload(&self) {
        *self.reloading.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl<T, E> ReloadClaim<T, E> {
    /// The refresh replaced the record: keep the old one marked as claimed
    /// so holders of it do not start another refresh.
    pub fn committed(mut self) {
        self.held = false;
    }
}

impl<T, E> Drop for ReloadClaim<T, E> {
    fn drop(&mut self) {
        if self.held {
            self.record.release_reload();
        }
    }
}

impl Freshness {
    /// Classify a record. An absent record is neither valid nor grace-valid.
    pub fn of<T, E>(record: Option<&OpResult<T, E>>) -> Self {
        match record {
            Some(r) if r.is_valid() => Freshness::Valid,
            Some(r) if r.is_grace_valid() => Freshness::Stale,
            _ => Freshness::Invalid,
        }
    }
}
