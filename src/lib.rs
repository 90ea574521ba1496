//! Redis-backed Coordination Layer
//!
//! Coordination primitives for fleets of stateless service instances that
//! share nothing but a Redis connection: a named mutual-exclusion lock, a
//! request throttler with escalating blocking, and a process-local
//! configuration cache kept consistent across instances over pub/sub.
//! Correctness under concurrent access comes from single-round-trip atomic
//! commands and server-side scripts; no instance knows about the others
//! except through the store.

pub mod config;
pub mod crypto;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod redis;
pub mod settings;
pub mod throttle;
pub mod utils;

// Re-export main types
pub use config::{load_config_from_file, load_config_from_yaml, CoordinationConfig};
pub use crypto::SettingsCipher;
pub use error::{CoordinationError, Result};
pub use lock::{DistributedLock, LockOptions};
pub use metrics::Metrics;
pub use redis::{RedisClient, RedisConfig};
pub use settings::{
    ConfigCacheBroadcaster, InMemoryRefreshBus, InMemorySettingsRepository, RedisRefreshBus,
    RefreshBus, RefreshSignal, SettingRow, SettingsRepository,
};
pub use throttle::{RateLimiterStore, ThrottleOutcome};
