//! Fixed-delay retry policy. Delays never grow between attempts.

use std::time::Duration;

/// Fixed delay with an optional cap on attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub delay: Duration,
    /// Maximum attempts, counting the first one. `None` = retry forever.
    pub max_attempts: Option<u32>,
}

impl Backoff {
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Returns the delay before the next try after `attempt` failed (1-based).
    /// Returns `None` once the attempt budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }

    /// Sleep for one delay.
    pub async fn wait(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_exhausts() {
        let b = Backoff::bounded(Duration::from_millis(100), 3);
        assert_eq!(b.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(b.next_delay(2), Some(Duration::from_millis(100)));
        assert_eq!(b.next_delay(3), None);
    }

    #[test]
    fn unbounded_never_exhausts() {
        let b = Backoff::unbounded(Duration::from_millis(5));
        assert_eq!(b.next_delay(10_000), Some(Duration::from_millis(5)));
    }

    #[test]
    fn zero_attempts_means_one_try() {
        let b = Backoff::bounded(Duration::from_millis(1), 0);
        assert_eq!(b.next_delay(1), None);
    }

    #[tokio::test]
    async fn wait_sleeps_for_delay() {
        let b = Backoff::unbounded(Duration::from_millis(5));
        let start = tokio::time::Instant::now();
        b.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
