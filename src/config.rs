use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{error::Result, lock::LockOptions, redis::RedisConfig, settings, throttle};

/// Top-level configuration for the coordination layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub lock: LockSettings,
    #[serde(default)]
    pub throttler: ThrottlerSettings,
    #[serde(default)]
    pub settings_sync: SettingsSyncSettings,
}

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_connection_timeout_secs() -> u64 {
    5
}

fn default_command_timeout_secs() -> u64 {
    1
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connection_timeout_secs: default_connection_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl From<RedisSettings> for RedisConfig {
    fn from(settings: RedisSettings) -> Self {
        Self {
            url: settings.url,
            connection_timeout: Some(Duration::from_secs(settings.connection_timeout_secs)),
            command_timeout: Some(Duration::from_secs(settings.command_timeout_secs)),
        }
    }
}

/// Default lock retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_expire_ms")]
    pub expire_ms: u64,
    #[serde(default = "default_lock_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_lock_max_retries")]
    pub max_retries: u32,
}

fn default_lock_expire_ms() -> u64 {
    60_000
}

fn default_lock_retry_interval_ms() -> u64 {
    100
}

fn default_lock_max_retries() -> u32 {
    600
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            expire_ms: default_lock_expire_ms(),
            retry_interval_ms: default_lock_retry_interval_ms(),
            max_retries: default_lock_max_retries(),
        }
    }
}

impl From<LockSettings> for LockOptions {
    fn from(settings: LockSettings) -> Self {
        Self {
            expire_ms: settings.expire_ms,
            retry_interval_ms: settings.retry_interval_ms,
            max_retries: settings.max_retries,
        }
    }
}

/// Throttler key layout and local cache sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlerSettings {
    #[serde(default = "default_throttler_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_throttler_local_cache_size")]
    pub local_cache_size: u64,
}

fn default_throttler_key_prefix() -> String {
    throttle::DEFAULT_KEY_PREFIX.to_string()
}

fn default_throttler_local_cache_size() -> u64 {
    10_000
}

impl Default for ThrottlerSettings {
    fn default() -> Self {
        Self {
            key_prefix: default_throttler_key_prefix(),
            local_cache_size: default_throttler_local_cache_size(),
        }
    }
}

/// Cross-instance configuration sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSyncSettings {
    #[serde(default = "default_refresh_channel")]
    pub channel: String,
}

fn default_refresh_channel() -> String {
    settings::DEFAULT_REFRESH_CHANNEL.to_string()
}

impl Default for SettingsSyncSettings {
    fn default() -> Self {
        Self {
            channel: default_refresh_channel(),
        }
    }
}

/// Load configuration from a YAML string
pub fn load_config_from_yaml(yaml: &str) -> Result<CoordinationConfig> {
    serde_yaml::from_str(yaml)
        .map_err(|e| crate::error::CoordinationError::Config(format!("Failed to parse YAML: {e}")))
}

/// Load configuration from a YAML file
pub fn load_config_from_file(path: &str) -> Result<CoordinationConfig> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_yaml(&content)
}
