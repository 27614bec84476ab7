use opcache::{OpCacheConfig, OpCacheSettings};
use std::env;
use std::str::FromStr;

/// Workload knobs for the benchmarks, read from `BENCH_*` environment
/// variables. Cache timings come from the regular `OPCACHE_*` variables.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Cache timings, with scheduled eviction turned off
    pub cache: OpCacheSettings,

    /// Simulated latency of every database round trip (BENCH_DB_LATENCY_MS, 5)
    pub db_latency_ms: u64,

    /// Criterion sample size upper bound (BENCH_SAMPLE_SIZE, 100)
    pub sample_size: usize,

    /// Keys per multi_get call, next to a fixed batch of 10 (BENCH_BATCH_SIZE, 100)
    pub batch_size: usize,

    /// Share of cached keys in the mixed workload (BENCH_HIT_RATIO, 0.8)
    pub hit_ratio: f64,
}

fn var_or<V: FromStr>(name: &str, default: V) -> V {
    env::var(name)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

impl BenchConfig {
    pub fn from_env() -> Self {
        let cache = OpCacheSettings::from_env().unwrap_or_else(|e| {
            eprintln!("Ignoring cache settings: {}", e);
            OpCacheSettings::default()
        });

        let config = Self {
            cache: OpCacheSettings {
                auto_evict_period_minutes: -1,
                ..cache
            },
            db_latency_ms: var_or("BENCH_DB_LATENCY_MS", 5),
            sample_size: var_or("BENCH_SAMPLE_SIZE", 100),
            batch_size: var_or("BENCH_BATCH_SIZE", 100),
            hit_ratio: var_or("BENCH_HIT_RATIO", 0.8_f64).clamp(0.0, 1.0),
        };
        eprintln!("Benchmark configuration: {:?}", config);
        config
    }

    /// Typed cache configuration for a fresh benchmark cache.
    pub fn cache_config<E>(&self) -> OpCacheConfig<E> {
        self.cache.clone().into_config()
    }
}
