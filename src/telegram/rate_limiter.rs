//! Per-chat rate limiter for outgoing edits.
//!
//! Long-running handlers (the post countdown in particular) edit the same
//! message over and over. Telegram answers that with flood waits, so every
//! edit goes through this limiter, which spaces operations on the same chat
//! by a minimum interval.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Rate limiter that enforces minimum intervals between operations on the
/// same key.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum duration between operations on one key.
    min_interval: Duration,

    /// Earliest instant the next operation on each key may run.
    next_allowed: Mutex<HashMap<i64, Instant>>,
}

impl RateLimiter {
    /// Creates a new rate limiter with the specified minimum interval.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a rate limiter from milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Waits until an operation on `key` is allowed and reserves the slot.
    ///
    /// Returns the duration waited (0 if no wait was needed).
    pub async fn wait_and_acquire(&self, key: i64) -> Duration {
        let wait = {
            let mut next = self.next_allowed.lock().await;
            let now = Instant::now();
            let slot = next.get(&key).copied().filter(|t| *t > now).unwrap_or(now);
            next.insert(key, slot + self.min_interval);
            slot - now
        };

        if !wait.is_zero() {
            debug!("Rate limiter: waiting {:?} before editing in {}", wait, key);
            tokio::time::sleep(wait).await;
        }

        wait
    }

    /// Returns the time remaining until the next operation on `key`.
    pub async fn time_until_allowed(&self, key: i64) -> Duration {
        let next = self.next_allowed.lock().await;
        next.get(&key)
            .map_or(Duration::ZERO, |t| t.saturating_duration_since(Instant::now()))
    }

    /// Pushes the next slot of `key` past a flood wait reported by Telegram.
    pub async fn handle_flood_wait(&self, key: i64, wait_seconds: u32) {
        warn!(
            "Received flood wait from Telegram for {}: {} seconds",
            key, wait_seconds
        );
        let mut next = self.next_allowed.lock().await;
        next.insert(
            key,
            Instant::now() + Duration::from_secs(u64::from(wait_seconds)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_operation_does_not_wait() {
        let limiter = RateLimiter::from_millis(1000);
        assert_eq!(limiter.time_until_allowed(1).await, Duration::ZERO);

        let waited = limiter.wait_and_acquire(1).await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_subsequent_operation_is_delayed() {
        let limiter = RateLimiter::new(Duration::from_millis(100));

        limiter.wait_and_acquire(7).await;
        assert!(limiter.time_until_allowed(7).await > Duration::ZERO);

        let waited = limiter.wait_and_acquire(7).await;
        assert!(waited > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60));

        limiter.wait_and_acquire(1).await;
        assert_eq!(limiter.time_until_allowed(2).await, Duration::ZERO);
        assert_eq!(limiter.wait_and_acquire(2).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_flood_wait_delays_only_its_key() {
        let limiter = RateLimiter::new(Duration::from_millis(10));

        limiter.handle_flood_wait(3, 30).await;
        assert!(limiter.time_until_allowed(3).await > Duration::from_secs(29));

        assert_eq!(limiter.time_until_allowed(4).await, Duration::ZERO);
    }
}
