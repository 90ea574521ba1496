use redis_coordination::{
    config::load_config_from_yaml,
    lock::{DistributedLock, LockOptions},
    metrics::Metrics,
    redis::{RedisClient, RedisConfig},
    settings::{
        ConfigCacheBroadcaster, InMemoryRefreshBus, InMemorySettingsRepository, RedisRefreshBus,
        SettingRow,
    },
    throttle::RateLimiterStore,
    crypto::SettingsCipher,
    CoordinationError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

fn metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new().unwrap())
}

async fn redis_client() -> RedisClient {
    let url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    RedisClient::new(RedisConfig {
        url,
        ..Default::default()
    })
    .await
    .expect("Redis must be reachable for this test")
}

fn unique(name: &str) -> String {
    format!("{name}:{}", uuid::Uuid::new_v4())
}

fn broadcaster(
    repository: Arc<InMemorySettingsRepository>,
    bus: Arc<InMemoryRefreshBus>,
) -> Arc<ConfigCacheBroadcaster> {
    Arc::new(ConfigCacheBroadcaster::new(
        repository,
        bus,
        SettingsCipher::new("integration-secret").unwrap(),
        metrics(),
    ))
}

#[tokio::test]
async fn test_config_yaml_drives_component_settings() {
    let yaml = r#"
redis:
  url: redis://cache.internal:6379
  command_timeout_secs: 2
lock:
  expire_ms: 15000
  retry_interval_ms: 25
  max_retries: 40
"#;

    let config = load_config_from_yaml(yaml).unwrap();

    let redis: RedisConfig = config.redis.into();
    assert_eq!(redis.url, "redis://cache.internal:6379");
    assert_eq!(redis.command_timeout, Some(Duration::from_secs(2)));

    let options: LockOptions = config.lock.into();
    assert_eq!(options.expire_ms, 15_000);
    assert_eq!(options.retry_interval_ms, 25);
    assert_eq!(options.max_retries, 40);
}

#[tokio::test]
async fn test_encrypted_settings_converge_across_instances() {
    let repository = Arc::new(InMemorySettingsRepository::new());
    let bus = Arc::new(InMemoryRefreshBus::new());

    let a = broadcaster(repository.clone(), bus.clone());
    let b = broadcaster(repository.clone(), bus.clone());
    a.clone().init().await.unwrap();
    b.clone().init().await.unwrap();

    a.create(SettingRow {
        key: "payments.api_key".to_string(),
        value: "sk-live-1234".to_string(),
        is_encrypted: true,
        group: Some("payments".to_string()),
    })
    .await
    .unwrap();

    sleep(Duration::from_millis(100)).await;

    // B never saw the plaintext write; it converged through the signal and
    // decrypted with the shared key.
    assert_eq!(b.get("payments.api_key").await.as_deref(), Some("sk-live-1234"));

    a.shutdown().await;
    b.shutdown().await;
}

// ============================================================================
// Store-backed properties
// ============================================================================

#[tokio::test]
#[ignore] // requires running Redis
async fn test_lock_mutual_exclusion() {
    let redis = redis_client().await;
    let a = DistributedLock::new(redis.clone(), metrics());
    let b = DistributedLock::new(redis, metrics());
    let name = unique("jobs");

    assert!(a.lock_once(&name, 5_000).await.unwrap());
    assert!(!b.lock_once(&name, 5_000).await.unwrap());
    assert!(!a.lock_once(&name, 5_000).await.unwrap());

    a.unlock(&name).await.unwrap();
    assert!(b.lock_once(&name, 5_000).await.unwrap());
    b.unlock(&name).await.unwrap();
}

#[tokio::test]
#[ignore] // requires running Redis
async fn test_unlock_is_owner_only() {
    let redis = redis_client().await;
    let a = DistributedLock::new(redis.clone(), metrics());
    let b = DistributedLock::new(redis, metrics());
    let name = unique("jobs");

    assert!(a.lock_once(&name, 5_000).await.unwrap());

    // B's release is a no-op against A's token. Note that B cannot tell:
    // unlock reports nothing either way (known gap, kept intentionally).
    b.unlock(&name).await.unwrap();
    assert!(!b.lock_once(&name, 5_000).await.unwrap());

    a.unlock(&name).await.unwrap();
    assert!(b.lock_once(&name, 5_000).await.unwrap());
    b.unlock(&name).await.unwrap();
}

#[tokio::test]
#[ignore] // requires running Redis
async fn test_lock_timeout_is_bounded() {
    let redis = redis_client().await;
    let holder = DistributedLock::new(redis.clone(), metrics());
    let waiter = DistributedLock::new(redis, metrics());
    let name = unique("jobs");

    assert!(holder.lock_once(&name, 30_000).await.unwrap());

    let started = Instant::now();
    let result = waiter
        .lock_with(
            &name,
            LockOptions {
                expire_ms: 5_000,
                retry_interval_ms: 10,
                max_retries: 3,
            },
        )
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(
        result,
        Err(CoordinationError::LockTimeout { attempts: 3, .. })
    ));
    assert!(elapsed >= Duration::from_millis(30));
    assert!(elapsed < Duration::from_secs(2));

    holder.unlock(&name).await.unwrap();
}

#[tokio::test]
#[ignore] // requires running Redis
async fn test_lock_expires_unattended() {
    let redis = redis_client().await;
    let a = DistributedLock::new(redis.clone(), metrics());
    let b = DistributedLock::new(redis, metrics());
    let name = unique("jobs");

    assert!(a.lock_once(&name, 100).await.unwrap());
    sleep(Duration::from_millis(200)).await;
    assert!(b.lock_once(&name, 5_000).await.unwrap());
    b.unlock(&name).await.unwrap();
}

#[tokio::test]
#[ignore] // requires running Redis
async fn test_set_ttl_renews_a_held_lease() {
    let redis = redis_client().await;
    let a = DistributedLock::new(redis.clone(), metrics());
    let b = DistributedLock::new(redis, metrics());
    let name = unique("jobs");

    assert!(a.lock_once(&name, 200).await.unwrap());
    assert!(a.set_ttl(&name, 2_000).await.unwrap());

    sleep(Duration::from_millis(400)).await;
    // Without the renewal the lease would have elapsed by now.
    assert!(!b.lock_once(&name, 5_000).await.unwrap());

    a.unlock(&name).await.unwrap();
    assert!(!a.set_ttl(&name, 1_000).await.unwrap());
}

#[tokio::test]
#[ignore] // requires running Redis
async fn test_throttler_monotonic_then_blocked() {
    let store = RateLimiterStore::with_defaults(redis_client().await, metrics());
    let key = unique("ip");

    for expected in 1..=5u64 {
        let outcome = store
            .increment(&key, 60_000, 5, 10_000, "login")
            .await
            .unwrap();
        assert_eq!(outcome.total_hits, expected);
        assert!(!outcome.is_blocked);
        assert!(outcome.time_to_expire_ms > 0);
    }

    let outcome = store
        .increment(&key, 60_000, 5, 10_000, "login")
        .await
        .unwrap();
    assert_eq!(outcome.total_hits, 6);
    assert!(outcome.is_blocked);
    assert!(outcome.time_to_block_ms > 0);

    // Hits during the block neither increment nor extend anything.
    for _ in 0..3 {
        let outcome = store
            .increment(&key, 60_000, 5, 10_000, "login")
            .await
            .unwrap();
        assert!(outcome.is_blocked);
        assert_eq!(outcome.total_hits, 6);
    }
}

#[tokio::test]
#[ignore] // requires running Redis
async fn test_throttler_window_resets_after_expiry() {
    let store = RateLimiterStore::with_defaults(redis_client().await, metrics());
    let key = unique("ip");

    assert_eq!(
        store.increment(&key, 500, 2, 0, "api").await.unwrap().total_hits,
        1
    );
    assert_eq!(
        store.increment(&key, 500, 2, 0, "api").await.unwrap().total_hits,
        2
    );

    sleep(Duration::from_millis(700)).await;

    let outcome = store.increment(&key, 500, 2, 0, "api").await.unwrap();
    assert_eq!(outcome.total_hits, 1);
    assert!(!outcome.is_blocked);
}

#[tokio::test]
#[ignore] // requires running Redis
async fn test_throttler_soft_limit_counts_past_limit() {
    let store = RateLimiterStore::with_defaults(redis_client().await, metrics());
    let key = unique("ip");

    for expected in 1..=4u64 {
        let outcome = store.increment(&key, 60_000, 1, 0, "audit").await.unwrap();
        assert_eq!(outcome.total_hits, expected);
        assert!(!outcome.is_blocked);
    }
}

#[tokio::test]
#[ignore] // requires running Redis
async fn test_throttler_two_instance_scenario() {
    let redis = redis_client().await;
    let a = RateLimiterStore::with_defaults(redis.clone(), metrics());
    let b = RateLimiterStore::with_defaults(redis, metrics());
    let key = unique("ip:1.2.3.4");

    let first = a.increment(&key, 60_000, 1, 1_000, "login").await.unwrap();
    assert_eq!(first.total_hits, 1);
    assert!(!first.is_blocked);

    let second = b.increment(&key, 60_000, 1, 1_000, "login").await.unwrap();
    assert_eq!(second.total_hits, 2);
    assert!(second.is_blocked);
    assert!(second.time_to_block_ms > 0 && second.time_to_block_ms <= 1_000);
    assert_eq!(second.time_to_block_secs(), 1);

    sleep(Duration::from_millis(1_200)).await;

    let after = a.increment(&key, 500, 1, 1_000, "login").await.unwrap();
    assert!(!after.is_blocked);
}

#[tokio::test]
#[ignore] // requires running Redis
async fn test_config_refresh_broadcast_over_redis() {
    let redis = redis_client().await;
    let repository = Arc::new(InMemorySettingsRepository::new());
    let channel = unique("config:refresh");

    let make = |redis: RedisClient| {
        Arc::new(ConfigCacheBroadcaster::new(
            repository.clone(),
            Arc::new(RedisRefreshBus::new(redis, channel.clone())),
            SettingsCipher::new("integration-secret").unwrap(),
            metrics(),
        ))
    };

    let a = make(redis.clone());
    let b = make(redis);
    a.clone().init().await.unwrap();
    b.clone().init().await.unwrap();

    a.create(SettingRow {
        key: "maintenance.banner".to_string(),
        value: "upgrading at 22:00 UTC".to_string(),
        is_encrypted: false,
        group: None,
    })
    .await
    .unwrap();

    // Signal delivery crosses a real pub/sub hop; give it a moment.
    sleep(Duration::from_millis(300)).await;
    assert_eq!(
        b.get("maintenance.banner").await.as_deref(),
        Some("upgrading at 22:00 UTC")
    );

    a.shutdown().await;
    b.shutdown().await;
}
