use moka::{future::Cache, Expiry};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    error::{CoordinationError, Result},
    metrics::Metrics,
    redis::RedisClient,
    utils::{clamp_ttl_ms, ms_to_secs_ceil, reset_at},
};

/// Default key prefix for throttler counters
pub const DEFAULT_KEY_PREFIX: &str = "_throttler:";

/// Increment-and-check, all steps indivisible.
///
/// KEYS[1] counter hash, KEYS[2] block flag.
/// ARGV[1] window ttl ms, ARGV[2] limit, ARGV[3] block duration ms,
/// ARGV[4] limiter name (hash field).
///
/// Replies {hits, counter ttl ms, blocked, block ttl ms}. While the block
/// flag lives no increment happens; the window's expiry is pinned when the
/// hash first gets a TTL (fixed window, boundary does not slide).
const INCREMENT_SCRIPT: &str = r#"
    local ttl_ms = tonumber(ARGV[1])
    local limit = tonumber(ARGV[2])
    local block_ms = tonumber(ARGV[3])
    local field = ARGV[4]

    local block_ttl = redis.call('PTTL', KEYS[2])
    if block_ttl > 0 then
        local hits = tonumber(redis.call('HGET', KEYS[1], field)) or 0
        return {hits, redis.call('PTTL', KEYS[1]), 1, block_ttl}
    end

    local hits = redis.call('HINCRBY', KEYS[1], field, 1)
    local ttl = redis.call('PTTL', KEYS[1])
    if ttl == -1 and ttl_ms > 0 then
        redis.call('PEXPIRE', KEYS[1], ttl_ms)
        ttl = ttl_ms
    end

    if hits <= limit then
        return {hits, ttl, 0, 0}
    end

    if block_ms > 0 then
        redis.call('SET', KEYS[2], 1, 'PX', block_ms)
        return {hits, ttl, 1, block_ms}
    end

    return {hits, ttl, 0, 0}
"#;

/// Outcome of one throttler increment
#[derive(Debug, Clone, Copy)]
pub struct ThrottleOutcome {
    /// Hit count for the limiter within the current window
    pub total_hits: u64,
    /// Remaining window lifetime in milliseconds; 0 when no TTL is pending
    pub time_to_expire_ms: i64,
    /// Whether the key is in an escalated lockout
    pub is_blocked: bool,
    /// Remaining block lifetime in milliseconds; 0 when not blocked
    pub time_to_block_ms: i64,
}

impl ThrottleOutcome {
    /// Remaining window lifetime in whole seconds, ceiling-rounded
    pub fn time_to_expire_secs(&self) -> u64 {
        ms_to_secs_ceil(self.time_to_expire_ms)
    }

    /// Remaining block lifetime in whole seconds, ceiling-rounded
    pub fn time_to_block_secs(&self) -> u64 {
        ms_to_secs_ceil(self.time_to_block_ms)
    }

    /// Wall-clock time at which the current window elapses
    pub fn window_reset_at(&self) -> DateTime<Utc> {
        reset_at(self.time_to_expire_ms)
    }
}

/// Local record of an active block, kept until the block's deadline
#[derive(Debug, Clone, Copy)]
struct BlockEntry {
    total_hits: u64,
    until: Instant,
}

struct BlockExpiry;

impl Expiry<String, BlockEntry> for BlockExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &BlockEntry,
        current_time: Instant,
    ) -> Option<Duration> {
        Some(value.until.saturating_duration_since(current_time))
    }
}

/// Redis-backed request throttler with escalating blocking.
///
/// Counters live in a hash per throttled key, one field per limiter, with
/// the window TTL pinned at first hit. Once a counter passes its limit a
/// block flag with its own TTL locks the key out; hits during the block
/// neither increment the counter nor extend the window.
///
/// Active blocks are mirrored into a local moka cache so repeated hits
/// during a block window answer without a store round trip.
pub struct RateLimiterStore {
    redis: RedisClient,
    key_prefix: String,
    block_cache: Arc<Cache<String, BlockEntry>>,
    metrics: Arc<Metrics>,
}

impl RateLimiterStore {
    /// Create a new throttler store
    pub fn new(
        redis: RedisClient,
        key_prefix: String,
        local_cache_size: u64,
        metrics: Arc<Metrics>,
    ) -> Self {
        let block_cache = Cache::builder()
            .max_capacity(local_cache_size)
            .expire_after(BlockExpiry)
            .build();

        Self {
            redis,
            key_prefix,
            block_cache: Arc::new(block_cache),
            metrics,
        }
    }

    /// Create a store with the default `_throttler:` key prefix
    pub fn with_defaults(redis: RedisClient, metrics: Arc<Metrics>) -> Self {
        Self::new(redis, DEFAULT_KEY_PREFIX.to_string(), 10_000, metrics)
    }

    fn counter_key(&self, key: &str) -> String {
        counter_key(&self.key_prefix, key)
    }

    fn block_key(&self, key: &str, limiter_name: &str) -> String {
        block_key(&self.key_prefix, key, limiter_name)
    }

    /// Record one hit for `(key, limiter_name)` and decide whether it passes.
    ///
    /// `ttl_ms` is the counting window established at the window's first hit.
    /// A `block_duration_ms` above 0 escalates an over-limit counter into a
    /// block; 0 or below keeps counting past the limit without blocking.
    /// Store failures propagate to the caller; this layer never decides an
    /// allow/deny policy on error.
    pub async fn increment(
        &self,
        key: &str,
        ttl_ms: u64,
        limit: u64,
        block_duration_ms: i64,
        limiter_name: &str,
    ) -> Result<ThrottleOutcome> {
        self.metrics.record_throttler_hit(limiter_name);

        let local_key = format!("{key}:{limiter_name}");
        if let Some(entry) = self.block_cache.get(&local_key).await {
            let remaining = entry.until.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                self.metrics.record_local_block_cache_hit();
                self.metrics.record_throttler_blocked(limiter_name);
                return Ok(ThrottleOutcome {
                    total_hits: entry.total_hits,
                    time_to_expire_ms: 0,
                    is_blocked: true,
                    time_to_block_ms: remaining.as_millis() as i64,
                });
            }
        }

        let mut conn = self.redis.connection();
        let (hits, ttl, blocked, block_ttl): (u64, i64, i64, i64) =
            redis::Script::new(INCREMENT_SCRIPT)
                .key(self.counter_key(key))
                .key(self.block_key(key, limiter_name))
                .arg(ttl_ms)
                .arg(limit)
                .arg(block_duration_ms)
                .arg(limiter_name)
                .invoke_async(&mut conn)
                .await
                .map_err(CoordinationError::Store)?;

        let outcome = ThrottleOutcome {
            total_hits: hits,
            time_to_expire_ms: clamp_ttl_ms(ttl),
            is_blocked: blocked == 1,
            time_to_block_ms: clamp_ttl_ms(block_ttl),
        };

        if outcome.is_blocked {
            self.metrics.record_throttler_blocked(limiter_name);
            if outcome.time_to_block_ms > 0 {
                let entry = BlockEntry {
                    total_hits: outcome.total_hits,
                    until: Instant::now()
                        + Duration::from_millis(outcome.time_to_block_ms as u64),
                };
                self.block_cache.insert(local_key, entry).await;
            }
            debug!(
                key,
                limiter = limiter_name,
                hits = outcome.total_hits,
                block_ms = outcome.time_to_block_ms,
                "throttler block active"
            );
        }

        Ok(outcome)
    }

    /// Health check against the backing store
    pub async fn health_check(&self) -> Result<()> {
        self.redis.health_check().await
    }
}

fn counter_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

fn block_key(prefix: &str, key: &str, limiter_name: &str) -> String {
    format!("{prefix}{key}:block:{limiter_name}")
}
