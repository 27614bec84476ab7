//! Cache configuration.
//!
//! [`OpCacheConfig`] is the typed configuration handed to an [`OpCache`](crate::OpCache).
//! [`OpCacheSettings`] is its plain, serializable counterpart for loading the
//! timing knobs from JSON or the environment.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;
use crate::metrics::MetricsSink;

/// Eviction period used when `auto_evict_period_minutes` is 0.
pub const DEFAULT_EVICT_PERIOD_MINUTES: i64 = 15;

/// Decides how an operation error is cached.
///
/// Called once per operation execution that produced an error, regardless of
/// how many times the cached error is read afterwards.
pub type ErrorPolicy<E> = Arc<dyn Fn(&E) -> ErrorVerdict + Send + Sync>;

/// The decision of an [`ErrorPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorVerdict {
    /// Do not cache this error: hand it to the caller and forget it.
    pub discard: bool,
    /// Overrides the configured result expiration for this error.
    pub expiration: Option<Duration>,
    /// Overrides the configured grace expiration for this error.
    pub grace_expiration: Option<Duration>,
}

impl ErrorVerdict {
    /// Cache the error like any other result.
    pub fn cache() -> Self {
        ErrorVerdict::default()
    }

    /// Do not cache the error.
    pub fn discard() -> Self {
        ErrorVerdict {
            discard: true,
            ..ErrorVerdict::default()
        }
    }

    /// Cache the error with its own expiration and grace expiration.
    pub fn expire_after(expiration: Duration, grace_expiration: Duration) -> Self {
        ErrorVerdict {
            discard: false,
            expiration: Some(expiration),
            grace_expiration: Some(grace_expiration),
        }
    }
}

/// Configuration for an [`OpCache`](crate::OpCache).
pub struct OpCacheConfig<E> {
    /// Results are valid for this long after they are produced.
    pub result_expiration: Duration,

    /// Expired results are still served for this long after expiration,
    /// while a refresh runs in the background.
    ///
    /// Zero disables the grace period and with it background refreshes.
    pub result_grace_expiration: Duration,

    /// Optional policy for operation errors.
    pub error_policy: Option<ErrorPolicy<E>>,

    /// How often, in minutes, a scheduler should sweep this cache.
    ///
    /// - `0` -> [`DEFAULT_EVICT_PERIOD_MINUTES`]
    /// - negative -> never registered with a scheduler; sweep manually
    pub auto_evict_period_minutes: i64,

    /// Optional sink receiving lookup, load and eviction metrics.
    pub metrics: Option<Arc<dyn MetricsSink>>,
}

impl<E> OpCacheConfig<E> {
    /// Create a configuration with the given expirations and no error policy.
    pub fn new(result_expiration: Duration, result_grace_expiration: Duration) -> Self {
        OpCacheConfig {
            result_expiration,
            result_grace_expiration,
            ..OpCacheConfig::default()
        }
    }

    pub fn with_error_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&E) -> ErrorVerdict + Send + Sync + 'static,
    {
        self.error_policy = Some(Arc::new(policy));
        self
    }

    pub fn with_auto_evict_period_minutes(mut self, minutes: i64) -> Self {
        self.auto_evict_period_minutes = minutes;
        self
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// The period a scheduler should use for this cache, or `None` if the
    /// cache opted out of scheduled eviction.
    pub fn auto_evict_period(&self) -> Option<Duration> {
        let minutes = match self.auto_evict_period_minutes {
            m if m < 0 => return None,
            0 => DEFAULT_EVICT_PERIOD_MINUTES,
            m => m,
        };
        Some(Duration::from_secs((minutes as u64).saturating_mul(60)))
    }

    /// Expiration and grace expiration for a freshly produced outcome.
    ///
    /// Returns `None` if the error policy discards the outcome.
    pub(crate) fn expirations<T>(&self, outcome: &Result<T, E>) -> Option<(Duration, Duration)> {
        let mut expirations = (self.result_expiration, self.result_grace_expiration);

        if let (Err(err), Some(policy)) = (outcome, &self.error_policy) {
            let verdict = policy(err);
            if verdict.discard {
                return None;
            }
            if let Some(exp) = verdict.expiration {
                expirations.0 = exp;
            }
            if let Some(grace) = verdict.grace_expiration {
                expirations.1 = grace;
            }
        }

        Some(expirations)
    }
}

impl<E> Default for OpCacheConfig<E> {
    fn default() -> Self {
        OpCacheConfig {
            result_expiration: Duration::from_secs(60),
            result_grace_expiration: Duration::from_secs(240),
            error_policy: None,
            auto_evict_period_minutes: 0,
            metrics: None,
        }
    }
}

impl<E> Clone for OpCacheConfig<E> {
    fn clone(&self) -> Self {
        OpCacheConfig {
            result_expiration: self.result_expiration,
            result_grace_expiration: self.result_grace_expiration,
            error_policy: self.error_policy.clone(),
            auto_evict_period_minutes: self.auto_evict_period_minutes,
            metrics: self.metrics.clone(),
        }
    }
}

impl<E> fmt::Debug for OpCacheConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpCacheConfig")
            .field("result_expiration", &self.result_expiration)
            .field("result_grace_expiration", &self.result_grace_expiration)
            .field("error_policy", &self.error_policy.is_some())
            .field("auto_evict_period_minutes", &self.auto_evict_period_minutes)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// Serializable timing settings for an [`OpCache`](crate::OpCache).
///
/// Missing fields fall back to the [`OpCacheConfig`] defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpCacheSettings {
    pub result_expiration_ms: u64,
    pub result_grace_expiration_ms: u64,
    pub auto_evict_period_minutes: i64,
}

impl Default for OpCacheSettings {
    fn default() -> Self {
        OpCacheSettings {
            result_expiration_ms: 60_000,
            result_grace_expiration_ms: 240_000,
            auto_evict_period_minutes: 0,
        }
    }
}

impl OpCacheSettings {
    /// Parse settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        serde_json::from_str(json).map_err(|e| CacheError::config("json", e.to_string()))
    }

    /// Load settings from environment variables, falling back to defaults.
    ///
    /// - `OPCACHE_RESULT_EXPIRATION_MS`
    /// - `OPCACHE_RESULT_GRACE_EXPIRATION_MS`
    /// - `OPCACHE_AUTO_EVICT_PERIOD_MINUTES`
    pub fn from_env() -> Result<Self, CacheError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CacheError> {
        let defaults = OpCacheSettings::default();
        Ok(OpCacheSettings {
            result_expiration_ms: parse_var(
                &lookup,
                "OPCACHE_RESULT_EXPIRATION_MS",
                defaults.result_expiration_ms,
            )?,
            result_grace_expiration_ms: parse_var(
                &lookup,
                "OPCACHE_RESULT_GRACE_EXPIRATION_MS",
                defaults.result_grace_expiration_ms,
            )?,
            auto_evict_period_minutes: parse_var(
                &lookup,
                "OPCACHE_AUTO_EVICT_PERIOD_MINUTES",
                defaults.auto_evict_period_minutes,
            )?,
        })
    }

    /// Convert into a typed configuration without error policy or metrics.
    pub fn into_config<E>(self) -> OpCacheConfig<E> {
        OpCacheConfig::new(
            Duration::from_millis(self.result_expiration_ms),
            Duration::from_millis(self.result_grace_expiration_ms),
        )
        .with_auto_evict_period_minutes(self.auto_evict_period_minutes)
    }
}

fn parse_var<V>(lookup: impl Fn(&str) -> Option<String>, name: &str, default: V) -> Result<V, CacheError>
where
    V: std::str::FromStr,
    V::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CacheError::config(name, format!("'{}': {}", raw, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_auto_evict_period() {
        let cfg: OpCacheConfig<String> = OpCacheConfig::default();
        assert_eq!(cfg.auto_evict_period(), Some(Duration::from_secs(15 * 60)));

        let cfg = cfg.with_auto_evict_period_minutes(3);
        assert_eq!(cfg.auto_evict_period(), Some(Duration::from_secs(180)));

        let cfg = cfg.with_auto_evict_period_minutes(i64::MAX);
        assert_eq!(cfg.auto_evict_period(), Some(Duration::from_secs(u64::MAX)));

        let cfg = cfg.with_auto_evict_period_minutes(-1);
        assert_eq!(cfg.auto_evict_period(), None);
    }

    #[test]
    fn test_expirations_apply_error_policy() {
        let exp = Duration::from_millis(10);
        let short = Duration::from_millis(5);
        let cfg: OpCacheConfig<String> =
            OpCacheConfig::new(exp, exp).with_error_policy(move |err: &String| match err.as_str() {
                "discard" => ErrorVerdict::discard(),
                "short" => ErrorVerdict::expire_after(short, short),
                "grace-only" => ErrorVerdict {
                    grace_expiration: Some(Duration::ZERO),
                    ..ErrorVerdict::cache()
                },
                _ => ErrorVerdict::cache(),
            });

        assert_eq!(cfg.expirations::<i32>(&Ok(1)), Some((exp, exp)));
        assert_eq!(cfg.expirations::<i32>(&Err("other".into())), Some((exp, exp)));
        assert_eq!(cfg.expirations::<i32>(&Err("discard".into())), None);
        assert_eq!(cfg.expirations::<i32>(&Err("short".into())), Some((short, short)));
        assert_eq!(
            cfg.expirations::<i32>(&Err("grace-only".into())),
            Some((exp, Duration::ZERO))
        );
    }

    #[test]
    fn test_errors_cached_without_policy() {
        let cfg: OpCacheConfig<String> = OpCacheConfig::new(Duration::from_secs(1), Duration::ZERO);
        assert_eq!(
            cfg.expirations::<i32>(&Err("boom".into())),
            Some((Duration::from_secs(1), Duration::ZERO))
        );
    }

    #[test]
    fn test_settings_from_json() {
        let settings = OpCacheSettings::from_json(r#"{"result_expiration_ms": 500}"#).unwrap();
        assert_eq!(settings.result_expiration_ms, 500);
        assert_eq!(settings.result_grace_expiration_ms, 240_000);

        let cfg: OpCacheConfig<String> = settings.into_config();
        assert_eq!(cfg.result_expiration, Duration::from_millis(500));
        assert_eq!(cfg.result_grace_expiration, Duration::from_secs(240));

        assert!(matches!(
            OpCacheSettings::from_json("{not json"),
            Err(CacheError::Config { .. })
        ));
    }

    #[test]
    fn test_settings_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPCACHE_RESULT_GRACE_EXPIRATION_MS", "0"),
            ("OPCACHE_AUTO_EVICT_PERIOD_MINUTES", " -1 "),
        ]);
        let settings =
            OpCacheSettings::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(
            settings,
            OpCacheSettings {
                result_expiration_ms: 60_000,
                result_grace_expiration_ms: 0,
                auto_evict_period_minutes: -1,
            }
        );

        let err = OpCacheSettings::from_lookup(|name| {
            (name == "OPCACHE_RESULT_EXPIRATION_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, CacheError::Config { ref field, .. } if field == "OPCACHE_RESULT_EXPIRATION_MS"));
    }
}
