use prometheus::{
    Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector for the coordination layer
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Lock metrics
    lock_acquisitions: CounterVec,
    lock_timeouts: CounterVec,
    lock_releases: CounterVec,
    lock_wait_duration: Histogram,

    // Throttler metrics
    throttler_hits: CounterVec,
    throttler_blocked: CounterVec,
    local_block_cache_hits: Counter,

    // Config cache metrics
    config_refresh_success: Counter,
    config_refresh_error: Counter,
    config_rows_skipped: Counter,
    config_refresh_duration: Histogram,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let lock_acquisitions = CounterVec::new(
            Opts::new(
                "coordination_lock_acquisitions",
                "Lock acquisition attempts by outcome",
            ),
            &["name", "result"],
        )?;

        let lock_timeouts = CounterVec::new(
            Opts::new(
                "coordination_lock_timeouts",
                "Lock acquisitions that exhausted their retry budget",
            ),
            &["name"],
        )?;

        let lock_releases = CounterVec::new(
            Opts::new(
                "coordination_lock_releases",
                "Lock release requests issued",
            ),
            &["name"],
        )?;

        let lock_wait_duration = Histogram::with_opts(HistogramOpts::new(
            "coordination_lock_wait_duration_seconds",
            "Time spent waiting to acquire a lock",
        ))?;

        let throttler_hits = CounterVec::new(
            Opts::new(
                "coordination_throttler_hits",
                "Rate limiter increments by limiter name",
            ),
            &["limiter"],
        )?;

        let throttler_blocked = CounterVec::new(
            Opts::new(
                "coordination_throttler_blocked",
                "Rate limiter increments answered with a block",
            ),
            &["limiter"],
        )?;

        let local_block_cache_hits = Counter::new(
            "coordination_local_block_cache_hits",
            "Blocked responses served from the local cache without a store round trip",
        )?;

        let config_refresh_success = Counter::new(
            "coordination_config_refresh_success",
            "Successful configuration cache refreshes",
        )?;

        let config_refresh_error = Counter::new(
            "coordination_config_refresh_error",
            "Failed configuration cache refreshes",
        )?;

        let config_rows_skipped = Counter::new(
            "coordination_config_rows_skipped",
            "Configuration rows dropped from a refresh (malformed or undecryptable)",
        )?;

        let config_refresh_duration = Histogram::with_opts(HistogramOpts::new(
            "coordination_config_refresh_duration_seconds",
            "Duration of configuration cache refreshes",
        ))?;

        registry.register(Box::new(lock_acquisitions.clone()))?;
        registry.register(Box::new(lock_timeouts.clone()))?;
        registry.register(Box::new(lock_releases.clone()))?;
        registry.register(Box::new(lock_wait_duration.clone()))?;
        registry.register(Box::new(throttler_hits.clone()))?;
        registry.register(Box::new(throttler_blocked.clone()))?;
        registry.register(Box::new(local_block_cache_hits.clone()))?;
        registry.register(Box::new(config_refresh_success.clone()))?;
        registry.register(Box::new(config_refresh_error.clone()))?;
        registry.register(Box::new(config_rows_skipped.clone()))?;
        registry.register(Box::new(config_refresh_duration.clone()))?;

        Ok(Self {
            registry,
            lock_acquisitions,
            lock_timeouts,
            lock_releases,
            lock_wait_duration,
            throttler_hits,
            throttler_blocked,
            local_block_cache_hits,
            config_refresh_success,
            config_refresh_error,
            config_rows_skipped,
            config_refresh_duration,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a lock acquisition attempt ("acquired" or "contended")
    pub fn record_lock_acquisition(&self, name: &str, result: &str) {
        self.lock_acquisitions.with_label_values(&[name, result]).inc();
    }

    /// Record a lock acquisition that exhausted its retries
    pub fn record_lock_timeout(&self, name: &str) {
        self.lock_timeouts.with_label_values(&[name]).inc();
    }

    /// Record a lock release request
    pub fn record_lock_release(&self, name: &str) {
        self.lock_releases.with_label_values(&[name]).inc();
    }

    /// Record time spent waiting for a lock
    pub fn record_lock_wait_duration(&self, duration_seconds: f64) {
        self.lock_wait_duration.observe(duration_seconds);
    }

    /// Record a throttler increment
    pub fn record_throttler_hit(&self, limiter: &str) {
        self.throttler_hits.with_label_values(&[limiter]).inc();
    }

    /// Record a throttler increment answered with a block
    pub fn record_throttler_blocked(&self, limiter: &str) {
        self.throttler_blocked.with_label_values(&[limiter]).inc();
    }

    /// Record a blocked response served from the local cache
    pub fn record_local_block_cache_hit(&self) {
        self.local_block_cache_hits.inc();
    }

    /// Record a successful configuration refresh
    pub fn record_config_refresh_success(&self) {
        self.config_refresh_success.inc();
    }

    /// Record a failed configuration refresh
    pub fn record_config_refresh_error(&self) {
        self.config_refresh_error.inc();
    }

    /// Record a configuration row skipped during refresh
    pub fn record_config_row_skipped(&self) {
        self.config_rows_skipped.inc();
    }

    /// Create a timer for measuring refresh duration
    pub fn start_refresh_timer(&self) -> prometheus::HistogramTimer {
        self.config_refresh_duration.start_timer()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics")
    }
}
