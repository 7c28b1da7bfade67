use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token-bucket limiter shared by every caller of one upstream provider.
///
/// Callers `acquire()` before each request; the bucket refills continuously at
/// `requests_per_second` and holds at most `burst` tokens.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    requests_per_second: f64,
    burst: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            requests_per_second,
            burst,
        }
    }

    /// A limiter that never waits; used for local backends.
    pub fn unlimited() -> Self {
        Self::new(0.0, 1)
    }

    fn is_unlimited(&self) -> bool {
        !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0
    }

    pub async fn acquire(&self) {
        if self.is_unlimited() {
            return;
        }

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens =
                    (bucket.tokens + elapsed * self.requests_per_second).min(self.burst);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }

                Duration::from_secs_f64((1.0 - bucket.tokens) / self.requests_per_second)
            };

            tracing::trace!("Rate limiter waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn available(&self) -> f64 {
        self.bucket.lock().await.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_is_available_immediately() {
        let limiter = RateLimiter::new(1.0, 3);
        let start = std::time::Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() < Duration::from_millis(200));
        assert!(limiter.available().await < 1.0);
    }

    #[tokio::test]
    async fn test_waits_for_refill_after_burst() {
        let limiter = RateLimiter::new(20.0, 1);
        let start = std::time::Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // Two refills at 20/s take roughly 100ms.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_unlimited_never_blocks() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..100 {
            limiter.acquire().await;
        }
    }
}
