/// Error type for cache operations.
///
/// Errors produced by the cached operations themselves are never wrapped in
/// this type: they are cached and handed back as data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// A batch producer returned a different number of results than the
    /// number of key indices it was given.
    #[error("batch producer returned {actual} results for {expected} keys")]
    BatchLengthMismatch { expected: usize, actual: usize },
    /// The scheduler needs a tokio runtime to start its ticking task.
    #[error("no tokio runtime available to start the eviction scheduler")]
    NoRuntime,
    /// The scheduler was shut down and accepts no more registrations.
    #[error("eviction scheduler has been shut down")]
    SchedulerStopped,
    /// Configuration could not be loaded or is invalid.
    #[error("invalid cache configuration for '{field}': {message}")]
    Config { field: String, message: String },
}

impl CacheError {
    /// Create a new configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Config {
            field: field.into(),
            message: message.into(),
        }
    }
}
