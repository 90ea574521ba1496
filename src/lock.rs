use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    error::{CoordinationError, Result},
    metrics::Metrics,
    redis::RedisClient,
    utils::generate_owner_token,
};

/// Key prefix for lock records
const LOCK_KEY_PREFIX: &str = "lock:";

/// Compare-and-delete: the key is removed only when it still carries our
/// owner token, so a lock re-acquired by another holder after our lease
/// expired is never released from here.
const UNLOCK_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    else
        return 0
    end
"#;

/// Retry policy for blocking acquisition
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Lease length granted on acquisition, in milliseconds
    pub expire_ms: u64,
    /// Fixed interval between acquisition attempts, in milliseconds
    pub retry_interval_ms: u64,
    /// Attempts before `lock` gives up with a timeout error
    pub max_retries: u32,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            expire_ms: 60_000,
            retry_interval_ms: 100,
            max_retries: 600,
        }
    }
}

/// Mutual-exclusion lock over named critical sections, coordinated through
/// Redis.
///
/// Acquisition is a single `SET NX PX` round trip; release is a single
/// server-side compare-and-delete script. The lock provides mutual exclusion
/// only: a holder whose lease expires mid-section can keep executing after
/// another instance acquires the same name (no fencing token).
#[derive(Clone)]
pub struct DistributedLock {
    redis: RedisClient,
    owner_token: String,
    metrics: Arc<Metrics>,
}

impl DistributedLock {
    /// Create a new lock service with a fresh owner token.
    ///
    /// The token is generated once here and identifies this instance for the
    /// lifetime of the service; construct one `DistributedLock` per process.
    pub fn new(redis: RedisClient, metrics: Arc<Metrics>) -> Self {
        Self {
            redis,
            owner_token: generate_owner_token(),
            metrics,
        }
    }

    /// The owner token stored as the value of every lock this instance holds
    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    fn lock_key(name: &str) -> String {
        format!("{LOCK_KEY_PREFIX}{name}")
    }

    /// One non-blocking acquisition attempt.
    ///
    /// Returns true iff the lock key did not previously exist and now carries
    /// this instance's owner token with a lease of `expire_ms`.
    pub async fn lock_once(&self, name: &str, expire_ms: u64) -> Result<bool> {
        let acquired = self
            .redis
            .set_nx_px(&Self::lock_key(name), &self.owner_token, expire_ms)
            .await?;

        let result = if acquired { "acquired" } else { "contended" };
        self.metrics.record_lock_acquisition(name, result);
        Ok(acquired)
    }

    /// Blocking acquisition with the default policy (60s lease, 100ms retry
    /// interval, 600 attempts).
    pub async fn lock(&self, name: &str) -> Result<()> {
        self.lock_with(name, LockOptions::default()).await
    }

    /// Blocking acquisition with an explicit retry policy.
    ///
    /// A bounded constant-interval poll: each failed attempt suspends the
    /// calling task for `retry_interval_ms` before retrying. No fairness
    /// across waiters and no backoff. Exhausting `max_retries` fails with
    /// [`CoordinationError::LockTimeout`]; an un-acquired lock is never
    /// reported as acquired.
    pub async fn lock_with(&self, name: &str, options: LockOptions) -> Result<()> {
        let started = std::time::Instant::now();

        for attempt in 0..options.max_retries {
            if self.lock_once(name, options.expire_ms).await? {
                debug!(name, attempt, "lock acquired");
                self.metrics
                    .record_lock_wait_duration(started.elapsed().as_secs_f64());
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(options.retry_interval_ms)).await;
        }

        warn!(
            name,
            attempts = options.max_retries,
            "lock acquisition timed out"
        );
        self.metrics.record_lock_timeout(name);
        Err(CoordinationError::LockTimeout {
            name: name.to_string(),
            attempts: options.max_retries,
        })
    }

    /// Release a lock held by this instance.
    ///
    /// Runs the compare-and-delete script and discards its result: a release
    /// that found the lock already expired or re-acquired elsewhere is
    /// silent. Callers cannot distinguish the two outcomes.
    pub async fn unlock(&self, name: &str) -> Result<()> {
        let mut conn = self.redis.connection();
        let _deleted: i64 = redis::Script::new(UNLOCK_SCRIPT)
            .key(Self::lock_key(name))
            .arg(&self.owner_token)
            .invoke_async(&mut conn)
            .await
            .map_err(CoordinationError::Store)?;

        self.metrics.record_lock_release(name);
        Ok(())
    }

    /// Renew the lease of an already-held lock without releasing it.
    ///
    /// Returns true iff the lock key still existed. Long critical sections
    /// must call this before the current lease elapses.
    pub async fn set_ttl(&self, name: &str, ttl_ms: u64) -> Result<bool> {
        self.redis.pexpire(&Self::lock_key(name), ttl_ms).await
    }
}
