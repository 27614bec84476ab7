use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Test data structure for benchmarks
#[derive(Clone, Debug, PartialEq)]
pub struct BenchUser {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub score: u32,
}

impl BenchUser {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            name: format!("User {}", id),
            email: format!("user{}@example.com", id),
            score: (id % 1000) as u32,
        }
    }
}

/// Error returned by the simulated database
#[derive(Clone, Debug, PartialEq)]
pub struct NotFound(pub u64);

/// Simulated database with configurable latency
#[derive(Clone)]
pub struct FakeDatabase {
    data: Arc<HashMap<u64, BenchUser>>,
    latency_ms: u64,
    query_count: Arc<AtomicUsize>,
}

impl FakeDatabase {
    pub fn new(num_users: u64, latency_ms: u64) -> Self {
        let data = (0..num_users).map(|id| (id, BenchUser::new(id))).collect();

        Self {
            data: Arc::new(data),
            latency_ms,
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn get(&self, id: u64) -> Result<BenchUser, NotFound> {
        self.query_count.fetch_add(1, Ordering::Relaxed);

        // Simulate database latency
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        self.data.get(&id).cloned().ok_or(NotFound(id))
    }

    /// Load many users with a single simulated round trip
    pub async fn get_many(&self, ids: Vec<u64>) -> Vec<Result<BenchUser, NotFound>> {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        ids.into_iter()
            .map(|id| self.data.get(&id).cloned().ok_or(NotFound(id)))
            .collect()
    }

    #[allow(dead_code)]
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }
}

/// Generate test keys for different workload patterns
pub struct KeyGenerator {
    num_keys: u64,
}

impl KeyGenerator {
    pub fn new(num_keys: u64) -> Self {
        Self { num_keys }
    }

    /// Generate sequential keys (for cold cache tests)
    pub fn sequential(&self) -> Vec<u64> {
        (0..self.num_keys).collect()
    }

    /// Generate keys for mixed workload (some hits, some misses)
    pub fn mixed(&self, hit_ratio: f64, count: usize) -> Vec<u64> {
        let mut rng = rand::thread_rng();
        let hot_key_count = ((self.num_keys as f64 * hit_ratio) as u64).max(1);

        (0..count)
            .map(|_| {
                if rng.gen_bool(hit_ratio) || hot_key_count >= self.num_keys {
                    rng.gen_range(0..hot_key_count)
                } else {
                    rng.gen_range(hot_key_count..self.num_keys)
                }
            })
            .collect()
    }
}
