use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;

use crate::error::{CoordinationError, Result};

/// Redis client configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connection_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: Some(Duration::from_secs(5)),
            command_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// Redis client wrapper for coordination operations
///
/// Owns a multiplexed `ConnectionManager` for regular commands and keeps the
/// underlying `redis::Client` around so pub/sub consumers can open their own
/// dedicated connection (a subscribed connection cannot issue commands).
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    connection: ConnectionManager,
    config: RedisConfig,
}

impl RedisClient {
    /// Create a new Redis client
    pub async fn new(config: RedisConfig) -> Result<Self> {
        use tracing::{info, warn};

        info!("Creating Redis client for URL: {}", config.url);

        let client = redis::Client::open(config.url.clone()).map_err(|e| {
            warn!("Failed to create Redis client: {}", e);
            CoordinationError::Store(e)
        })?;

        let connection_result = tokio::time::timeout(
            config.connection_timeout.unwrap_or(Duration::from_secs(10)),
            client.get_connection_manager(),
        )
        .await;

        let connection = match connection_result {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!("Failed to create connection manager: {}", e);
                return Err(CoordinationError::Store(e));
            }
            Err(_) => {
                warn!(
                    "Timeout while creating connection manager ({}s)",
                    config.connection_timeout.unwrap_or(Duration::from_secs(10)).as_secs()
                );
                return Err(CoordinationError::Service(
                    "Timeout while creating Redis connection manager".to_string(),
                ));
            }
        };

        // Test the connection with timeout
        let mut conn = connection.clone();
        let ping_result = tokio::time::timeout(
            config.command_timeout.unwrap_or(Duration::from_secs(5)),
            redis::cmd("PING").query_async::<_, ()>(&mut conn),
        )
        .await;

        match ping_result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("Redis PING failed: {}", e);
                return Err(CoordinationError::Store(e));
            }
            Err(_) => {
                warn!(
                    "Redis PING timeout ({}s)",
                    config.command_timeout.unwrap_or(Duration::from_secs(5)).as_secs()
                );
                return Err(CoordinationError::Service(
                    "Timeout while testing Redis connection".to_string(),
                ));
            }
        }

        info!("Redis client initialized successfully");
        Ok(Self {
            client,
            connection,
            config,
        })
    }

    /// Cheap handle for issuing commands; `ConnectionManager` multiplexes
    /// over one underlying connection.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// `SET key value NX PX ms`, the conditional write used for lock acquisition.
    ///
    /// Returns true iff the key did not previously exist.
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(CoordinationError::Store)?;
        Ok(reply.is_some())
    }

    /// Refresh a key's remaining lifetime in milliseconds.
    ///
    /// Returns true iff the key existed.
    pub async fn pexpire(&self, key: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.connection.clone();
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(CoordinationError::Store)?;
        Ok(applied == 1)
    }

    /// Remaining lifetime in milliseconds; negative when no TTL is pending
    /// (-1 no expiry, -2 no key).
    pub async fn pttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.clone();
        redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(CoordinationError::Store)
    }

    /// Publish a message on a channel
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(CoordinationError::Store)?;
        Ok(())
    }

    /// Open a dedicated pub/sub connection subscribed to `channel`.
    ///
    /// The returned `PubSub` owns its own connection; dropping it unsubscribes.
    pub async fn subscribe(&self, channel: &str) -> Result<redis::aio::PubSub> {
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(CoordinationError::Store)?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(channel)
            .await
            .map_err(CoordinationError::Store)?;
        Ok(pubsub)
    }

    /// Check if the connection is healthy
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(CoordinationError::Store)?;
        Ok(())
    }

    /// The configuration this client was created with
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}
