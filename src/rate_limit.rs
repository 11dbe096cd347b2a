//! Per-connection, per-verb rate limiting. Grounded on the teacher's
//! `RoomRateLimiter`: a fixed-window counter behind a lock, reset when the
//! window elapses, with a background task to drop entries nobody has
//! touched recently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    Exceeded { retry_after_ms: u64 },
}

struct Bucket {
    window_start: i64,
    count: u32,
    last_touched: i64,
}

/// Tracks request counts per `(peer, verb)` pair within a fixed window. One
/// instance is shared across all connections.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<(SocketAddr, &'static str), Bucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn rule(&self, verb: &str) -> crate::config::RateLimitRule {
        match verb {
            "hello" => self.config.hello,
            "get_frame" => self.config.get_frame,
            "join_room" => self.config.join_room,
            "resync" => self.config.resync,
            "join_random" => self.config.join_random,
            "join_by_id" => self.config.join_by_id,
            "create_public_and_submit" => self.config.create_public_and_submit,
            "submit_frame" => self.config.submit_frame,
            _ => self.config.default,
        }
    }

    /// Checks and records one request from `peer` for `verb` at time `now`
    /// (milliseconds). Returns an error carrying the remaining time until the
    /// window resets if the peer is over its limit for this verb.
    pub fn check(&self, peer: SocketAddr, verb: &'static str, now: i64) -> Result<(), RateLimitError> {
        let rule = self.rule(verb);
        let window_ms = i64::try_from(rule.window_secs.saturating_mul(1000)).unwrap_or(i64::MAX);

        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry((peer, verb)).or_insert_with(|| Bucket {
            window_start: now,
            count: 0,
            last_touched: now,
        });

        if now - bucket.window_start >= window_ms {
            bucket.window_start = now;
            bucket.count = 0;
        }
        bucket.last_touched = now;

        if bucket.count >= rule.max {
            let retry_after_ms = (bucket.window_start + window_ms - now).max(0) as u64;
            return Err(RateLimitError::Exceeded { retry_after_ms });
        }

        bucket.count += 1;
        Ok(())
    }

    /// Drops buckets untouched for longer than `max_idle_ms`. Run
    /// periodically so a long-lived server doesn't accumulate one entry per
    /// peer-verb pair ever seen.
    pub fn cleanup(&self, now: i64, max_idle_ms: i64) {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        buckets.retain(|_, bucket| now - bucket.last_touched < max_idle_ms);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn allows_requests_under_the_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..120 {
            assert!(limiter.check(peer(1), "hello", 1000).is_ok());
        }
    }

    #[test]
    fn rejects_once_over_the_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..120 {
            limiter.check(peer(1), "hello", 1000).unwrap();
        }
        let result = limiter.check(peer(1), "hello", 1000);
        assert!(matches!(result, Err(RateLimitError::Exceeded { .. })));
    }

    #[test]
    fn window_reset_allows_requests_again() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..120 {
            limiter.check(peer(1), "hello", 1000).unwrap();
        }
        assert!(limiter.check(peer(1), "hello", 1000).is_err());
        assert!(limiter.check(peer(1), "hello", 11_001).is_ok());
    }

    #[test]
    fn different_peers_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..120 {
            limiter.check(peer(1), "hello", 1000).unwrap();
        }
        assert!(limiter.check(peer(2), "hello", 1000).is_ok());
    }

    #[test]
    fn different_verbs_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        for _ in 0..120 {
            limiter.check(peer(1), "hello", 1000).unwrap();
        }
        assert!(limiter.check(peer(1), "submit_frame", 1000).is_ok());
    }

    #[test]
    fn cleanup_drops_idle_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        limiter.check(peer(1), "hello", 1000).unwrap();
        assert_eq!(limiter.bucket_count(), 1);
        limiter.cleanup(1000 + 60_000, 30_000);
        assert_eq!(limiter.bucket_count(), 0);
    }
}
