use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default spacing between upstream EPC requests.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1200);

/// Process-wide minimum-interval gate around outbound EPC requests.
///
/// One instance per process, shared through `Arc` and handed to every client
/// at construction. Waiters queue on a FIFO `tokio::sync::Mutex`; the
/// timestamp is written only when a caller is released, so a wait that is
/// cancelled (its future dropped) leaves the previous timestamp in place.
#[derive(Debug)]
pub struct RateLimiter {
    last_acquired: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_acquired: Mutex::new(None),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Returns once at least `min_interval` has passed since the previous
    /// successful acquisition.
    pub async fn acquire(&self) {
        let mut last = self.last_acquired.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("EPC rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.min_interval(), Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn test_first_acquire_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sequential_acquires_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(150));

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }

        // two waits of 150ms
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_concurrent_acquires_are_spaced() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(100)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut released = Vec::new();
        for handle in handles {
            released.push(handle.await.unwrap());
        }
        released.sort();

        for pair in released.windows(2) {
            // small allowance for timer jitter between release and observation
            assert!(pair[1] - pair[0] >= Duration::from_millis(95));
        }
    }

    #[tokio::test]
    async fn test_cancelled_wait_records_nothing() {
        let limiter = RateLimiter::new(Duration::from_millis(200));
        limiter.acquire().await;
        let first = Instant::now();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(cancelled.is_err());

        // Once the interval since the first acquisition has passed the next
        // caller proceeds immediately; the cancelled wait left no timestamp.
        tokio::time::sleep_until(first + Duration::from_millis(220)).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert!(before.elapsed() < Duration::from_millis(50));
    }
}
