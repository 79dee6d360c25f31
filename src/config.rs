//! Configuration for stages, hubs, schedulers and sinks.

/// Configuration for `flat_map`.
#[derive(Clone, Debug)]
pub struct FlatMapConfig {
    /// Max inner publishers subscribed at once (None = unbounded).
    /// Default: None
    pub max_concurrency: Option<usize>,

    /// Items requested from each inner publisher up front.
    /// Default: 32
    pub inner_prefetch: u64,
}

impl Default for FlatMapConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            inner_prefetch: 32,
        }
    }
}

impl FlatMapConfig {
    /// Bound the number of concurrently active inner publishers.
    pub fn max_concurrency(n: usize) -> Self {
        Self {
            max_concurrency: Some(n.max(1)),
            ..Default::default()
        }
    }
}

/// Configuration for a connectable hub.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Cancel the upstream subscription when the last attached subscriber
    /// cancels after `connect()`.
    /// Default: true
    pub release_upstream_on_last_cancel: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            release_upstream_on_last_cancel: true,
        }
    }
}

/// Configuration for the thread-pool scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    /// Default: available parallelism (4 if unknown)
    pub workers: usize,

    /// Prefix for worker thread names.
    /// Default: "rivulet-worker"
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            workers,
            thread_name: "rivulet-worker".to_string(),
        }
    }
}

/// Configuration for frame streams and blocking collection.
#[derive(Clone, Debug)]
pub struct FrameConfig {
    /// Frames requested ahead of the consumer.
    /// Default: 256
    pub buffer_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}
