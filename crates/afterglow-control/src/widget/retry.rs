//! Timeout and retry combinators

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Exponential backoff: `base * 2^attempt`, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(4),
        }
    }
}

impl Backoff {
    /// Delay after the zero-based failed `attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Run `fut` for at most `limit`. `None` on timeout.
pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Option<T>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(limit, fut).await.ok()
}

/// Run `attempt` up to `max_attempts` times, sleeping with `backoff` in between.
///
/// Attempts are strictly sequential. Returns the first `Some`.
pub async fn with_retry<T, Fut, F>(
    label: &str,
    max_attempts: u32,
    backoff: Backoff,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let max_attempts = max_attempts.max(1);
    for n in 0..max_attempts {
        if let Some(value) = attempt(n).await {
            return Some(value);
        }
        if n + 1 < max_attempts {
            let delay = backoff.delay(n);
            debug!(
                "'{}' attempt {}/{} failed, retrying in {:?}",
                label,
                n + 1,
                max_attempts,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(1), Duration::from_millis(500));
        assert_eq!(backoff.delay(3), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(4));
        assert_eq!(backoff.delay(40), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let slow = tokio::time::sleep(Duration::from_secs(10));
        assert!(with_timeout(Duration::from_secs(1), slow).await.is_none());
        assert_eq!(with_timeout(Duration::from_secs(1), async { 7 }).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_between_attempts() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = with_retry("flaky", 4, Backoff::default(), |n| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { (n == 2).then_some(n) }
        })
        .await;

        assert_eq!(result, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 250 ms + 500 ms of backoff
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(750), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(800), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion() {
        let calls = AtomicU32::new(0);
        let result: Option<()> = with_retry("dead", 3, Backoff::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;
        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
