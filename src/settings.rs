use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    crypto::SettingsCipher,
    error::{CoordinationError, Result},
    metrics::Metrics,
    redis::RedisClient,
};

/// Default pub/sub channel for refresh signals
pub const DEFAULT_REFRESH_CHANNEL: &str = "config:refresh";

/// One configuration row as stored in the backing table.
///
/// Encrypted rows carry `hex(nonce):hex(ciphertext)` in `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub is_encrypted: bool,
    pub group: Option<String>,
}

/// Narrow interface over the backing configuration table.
///
/// The coordination layer reads the table wholesale on every refresh and
/// funnels administrative mutations through these primitives; how rows are
/// actually persisted is the embedding application's concern.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Read every configuration row
    async fn load_all(&self) -> Result<Vec<SettingRow>>;

    /// Read a single row by key
    async fn get(&self, key: &str) -> Result<Option<SettingRow>>;

    /// Insert a new row
    async fn insert(&self, row: SettingRow) -> Result<()>;

    /// Replace the stored value of an existing row
    async fn update(&self, key: &str, value: String) -> Result<()>;

    /// Delete a row
    async fn delete(&self, key: &str) -> Result<()>;
}

/// HashMap-backed repository for tests and single-binary embedding
#[derive(Default)]
pub struct InMemorySettingsRepository {
    rows: RwLock<HashMap<String, SettingRow>>,
}

impl InMemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn load_all(&self) -> Result<Vec<SettingRow>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<SettingRow>> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn insert(&self, row: SettingRow) -> Result<()> {
        self.rows.write().await.insert(row.key.clone(), row);
        Ok(())
    }

    async fn update(&self, key: &str, value: String) -> Result<()> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(key) {
            Some(row) => {
                row.value = value;
                Ok(())
            }
            None => Err(CoordinationError::Repository(format!(
                "unknown configuration key '{key}'"
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.rows.write().await.remove(key);
        Ok(())
    }
}

/// Payload broadcast on the refresh channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSignal {
    /// Instance that triggered the refresh
    pub origin: String,
}

/// Transport for refresh signals between instances.
///
/// Delivery is at-least-once to currently-connected subscribers only;
/// instances that are down miss the signal and resync on their next local
/// write or restart.
#[async_trait]
pub trait RefreshBus: Send + Sync {
    /// Broadcast a refresh signal to all subscribed instances
    async fn publish(&self, signal: &RefreshSignal) -> Result<()>;

    /// Open a subscription; signals arrive on the returned receiver
    async fn subscribe(&self) -> Result<mpsc::Receiver<RefreshSignal>>;
}

/// Redis pub/sub transport for refresh signals
pub struct RedisRefreshBus {
    redis: RedisClient,
    channel: String,
}

impl RedisRefreshBus {
    pub fn new(redis: RedisClient, channel: String) -> Self {
        Self { redis, channel }
    }

    /// Bus on the default `config:refresh` channel
    pub fn with_defaults(redis: RedisClient) -> Self {
        Self::new(redis, DEFAULT_REFRESH_CHANNEL.to_string())
    }
}

#[async_trait]
impl RefreshBus for RedisRefreshBus {
    async fn publish(&self, signal: &RefreshSignal) -> Result<()> {
        let payload = serde_json::to_string(signal)?;
        self.redis.publish(&self.channel, &payload).await
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<RefreshSignal>> {
        let mut pubsub = self.redis.subscribe(&self.channel).await?;
        let channel = self.channel.clone();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "unreadable refresh message");
                        continue;
                    }
                };
                let signal: RefreshSignal =
                    serde_json::from_str(&payload).unwrap_or(RefreshSignal {
                        origin: String::new(),
                    });
                if tx.send(signal).await.is_err() {
                    break;
                }
            }
            debug!(channel = %channel, "refresh subscription closed");
        });

        Ok(rx)
    }
}

/// In-process transport for tests and single-instance embedding.
///
/// Counts publishes, which makes re-broadcast regressions observable.
pub struct InMemoryRefreshBus {
    sender: tokio::sync::broadcast::Sender<RefreshSignal>,
    published: std::sync::atomic::AtomicUsize,
}

impl InMemoryRefreshBus {
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(16);
        Self {
            sender,
            published: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of signals published so far
    pub fn published(&self) -> usize {
        self.published.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for InMemoryRefreshBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RefreshBus for InMemoryRefreshBus {
    async fn publish(&self, signal: &RefreshSignal) -> Result<()> {
        self.published
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        // No subscribers is fine; peers may simply not be listening.
        let _ = self.sender.send(signal.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<RefreshSignal>> {
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(signal) => {
                        if tx.send(signal).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}

/// Process-local configuration cache kept consistent across instances via
/// refresh broadcasts.
///
/// The cache is a complete snapshot as of the last successful refresh:
/// rebuilt fully, then swapped in one assignment, so readers observe either
/// the old or the new snapshot and never a mix of two refreshes.
pub struct ConfigCacheBroadcaster {
    repository: Arc<dyn SettingsRepository>,
    bus: Arc<dyn RefreshBus>,
    cipher: SettingsCipher,
    cache: RwLock<HashMap<String, String>>,
    instance_id: String,
    metrics: Arc<Metrics>,
    subscriber: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigCacheBroadcaster {
    pub fn new(
        repository: Arc<dyn SettingsRepository>,
        bus: Arc<dyn RefreshBus>,
        cipher: SettingsCipher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repository,
            bus,
            cipher,
            cache: RwLock::new(HashMap::new()),
            instance_id: uuid::Uuid::new_v4().to_string(),
            metrics,
            subscriber: Mutex::new(None),
        }
    }

    /// Identifier carried in refresh signals this instance publishes
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Load the initial snapshot and subscribe to refresh signals.
    ///
    /// A failed subscription degrades to local-only refresh: peers will not
    /// push updates here, but this instance stays functional. Only the
    /// initial load can fail.
    pub async fn init(self: Arc<Self>) -> Result<()> {
        self.refresh(false).await?;

        match self.bus.subscribe().await {
            Ok(mut rx) => {
                let this = Arc::clone(&self);
                let handle = tokio::spawn(async move {
                    while let Some(signal) = rx.recv().await {
                        debug!(origin = %signal.origin, "refresh signal received");
                        // publish=false: reloading on receipt must not
                        // broadcast again, or every signal would fan out
                        // into a storm across instances.
                        if let Err(e) = this.refresh(false).await {
                            warn!(error = %e, "refresh on remote signal failed");
                        }
                    }
                });
                *self.subscriber.lock().await = Some(handle);
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "refresh subscription unavailable; continuing with local refresh only"
                );
            }
        }

        Ok(())
    }

    /// Stop the subscriber task
    pub async fn shutdown(&self) {
        if let Some(handle) = self.subscriber.lock().await.take() {
            handle.abort();
        }
    }

    /// Rebuild the snapshot from the backing table.
    ///
    /// Encrypted rows are decrypted with the shared key; a malformed row is
    /// logged and skipped rather than aborting the refresh. With `publish`
    /// set, a refresh signal is broadcast after the snapshot swap so peers
    /// reload too.
    pub async fn refresh(&self, publish: bool) -> Result<()> {
        let timer = self.metrics.start_refresh_timer();

        let rows = match self.repository.load_all().await {
            Ok(rows) => rows,
            Err(e) => {
                self.metrics.record_config_refresh_error();
                return Err(e);
            }
        };

        let mut snapshot = HashMap::with_capacity(rows.len());
        for row in rows {
            if row.is_encrypted {
                match self.cipher.decrypt(&row.value) {
                    Ok(value) => {
                        snapshot.insert(row.key, value);
                    }
                    Err(e) => {
                        warn!(key = %row.key, error = %e, "skipping undecryptable configuration row");
                        self.metrics.record_config_row_skipped();
                    }
                }
            } else {
                snapshot.insert(row.key, row.value);
            }
        }

        let count = snapshot.len();
        *self.cache.write().await = snapshot;

        self.metrics.record_config_refresh_success();
        timer.observe_duration();
        info!(entries = count, "configuration cache refreshed");

        if publish {
            self.bus
                .publish(&RefreshSignal {
                    origin: self.instance_id.clone(),
                })
                .await?;
        }

        Ok(())
    }

    /// Read a value from the current snapshot; never touches the store
    pub async fn get(&self, key: &str) -> Option<String> {
        self.cache.read().await.get(key).cloned()
    }

    /// Clone of the current snapshot
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.cache.read().await.clone()
    }

    /// Insert a configuration row and converge all instances.
    ///
    /// The value is encrypted before it reaches the table when the row is
    /// flagged encrypted.
    pub async fn create(&self, mut row: SettingRow) -> Result<()> {
        if row.is_encrypted {
            row.value = self.cipher.encrypt(&row.value)?;
        }
        self.repository.insert(row).await?;
        self.refresh(true).await
    }

    /// Replace a row's value and converge all instances.
    ///
    /// Whether the new value is encrypted follows the stored row's flag.
    pub async fn update(&self, key: &str, value: String) -> Result<()> {
        let row = self.repository.get(key).await?.ok_or_else(|| {
            CoordinationError::Repository(format!("unknown configuration key '{key}'"))
        })?;

        let stored = if row.is_encrypted {
            self.cipher.encrypt(&value)?
        } else {
            value
        };
        self.repository.update(key, stored).await?;
        self.refresh(true).await
    }

    /// Delete a row and converge all instances
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.repository.delete(key).await?;
        self.refresh(true).await
    }
}
