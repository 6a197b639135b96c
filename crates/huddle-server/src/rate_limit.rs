use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Per-IP token bucket state.
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// IP-keyed token-bucket rate limiter guarding room creation, join-token
/// issuance, and WebSocket admission.
pub struct IpRateLimiter {
    buckets: Mutex<HashMap<IpAddr, TokenBucket>>,
    burst: f64,
    refill_per_sec: f64,
}

impl IpRateLimiter {
    pub fn new(burst: f64, refill_per_sec: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            burst,
            refill_per_sec,
        }
    }

    /// Returns `true` if the request is allowed, `false` if rate-limited.
    pub async fn allow(&self, ip: IpAddr) -> bool {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        let bucket = buckets.entry(ip).or_insert_with(|| TokenBucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that have not been touched within `max_age`.
    pub async fn cleanup(&self, max_age: Duration) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn burst_is_honored_then_exhausted() {
        let limiter = IpRateLimiter::new(2.0, 0.0); // no refill
        assert!(limiter.allow(ip(1)).await);
        assert!(limiter.allow(ip(1)).await);
        assert!(!limiter.allow(ip(1)).await);
    }

    #[tokio::test]
    async fn buckets_are_independent_per_ip() {
        let limiter = IpRateLimiter::new(1.0, 0.0);
        assert!(limiter.allow(ip(1)).await);
        assert!(!limiter.allow(ip(1)).await);
        assert!(limiter.allow(ip(2)).await);
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let limiter = IpRateLimiter::new(1.0, 50.0);
        assert!(limiter.allow(ip(1)).await);
        assert!(!limiter.allow(ip(1)).await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.allow(ip(1)).await);
    }

    #[tokio::test]
    async fn cleanup_drops_stale_buckets() {
        let limiter = IpRateLimiter::new(5.0, 1.0);
        limiter.allow(ip(1)).await;
        assert_eq!(limiter.buckets.lock().await.len(), 1);
        limiter.cleanup(Duration::ZERO).await;
        assert!(limiter.buckets.lock().await.is_empty());
    }
}
