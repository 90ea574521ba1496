use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Clamp a TTL reply from the store to a usable value.
///
/// PTTL replies with -1 (no expiry) or -2 (no key); both mean "no TTL
/// pending" to callers.
pub fn clamp_ttl_ms(ttl_ms: i64) -> i64 {
    ttl_ms.max(0)
}

/// Ceiling conversion of a millisecond TTL to whole seconds.
///
/// Values of zero or below report 0, meaning no TTL is pending.
pub fn ms_to_secs_ceil(ttl_ms: i64) -> u64 {
    if ttl_ms <= 0 {
        0
    } else {
        (ttl_ms as u64).div_ceil(1000)
    }
}

/// Wall-clock timestamp at which a pending millisecond TTL elapses.
pub fn reset_at(ttl_ms: i64) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::milliseconds(clamp_ttl_ms(ttl_ms))
}

/// Generate an owner token unique to this process instance.
///
/// Used as the value of lock keys to prove exclusive ownership; generated
/// once per `DistributedLock` and stable for its lifetime.
pub fn generate_owner_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_ttl_ms() {
        assert_eq!(clamp_ttl_ms(-2), 0);
        assert_eq!(clamp_ttl_ms(-1), 0);
        assert_eq!(clamp_ttl_ms(0), 0);
        assert_eq!(clamp_ttl_ms(1500), 1500);
    }

    #[test]
    fn test_ms_to_secs_ceil() {
        assert_eq!(ms_to_secs_ceil(-1), 0);
        assert_eq!(ms_to_secs_ceil(0), 0);
        assert_eq!(ms_to_secs_ceil(1), 1);
        assert_eq!(ms_to_secs_ceil(999), 1);
        assert_eq!(ms_to_secs_ceil(1000), 1);
        assert_eq!(ms_to_secs_ceil(1001), 2);
        assert_eq!(ms_to_secs_ceil(60_000), 60);
    }

    #[test]
    fn test_reset_at_is_in_the_future() {
        let now = Utc::now();
        let at = reset_at(5_000);
        assert!(at > now);
        assert!(at <= now + ChronoDuration::milliseconds(5_500));
    }

    #[test]
    fn test_owner_tokens_are_unique() {
        assert_ne!(generate_owner_token(), generate_owner_token());
    }
}
