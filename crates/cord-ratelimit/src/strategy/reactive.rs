//! Reactive strategy: wait only once the bucket is empty

use super::{live, RateLimitStrategy};
use crate::bucket::Bucket;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReactiveStrategy;

impl ReactiveStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RateLimitStrategy for ReactiveStrategy {
    fn should_wait(&self, bucket: Option<&Bucket>) -> bool {
        live(bucket).is_some_and(Bucket::is_exhausted)
    }

    fn calculate_wait(&self, bucket: Option<&Bucket>) -> Duration {
        match live(bucket) {
            Some(b) if b.is_exhausted() => b.time_until_reset(),
            _ => Duration::ZERO,
        }
    }

    fn name(&self) -> &'static str {
        "reactive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_waits_only_when_exhausted() {
        let reset = Instant::now() + Duration::from_secs(3);
        let strategy = ReactiveStrategy::new();

        assert!(!strategy.should_wait(Some(&Bucket::new("b", 10, 1, reset))));
        assert_eq!(
            strategy.calculate_wait(Some(&Bucket::new("b", 10, 1, reset))),
            Duration::ZERO
        );

        let empty = Bucket::new("b", 10, 0, reset);
        assert!(strategy.should_wait(Some(&empty)));
        let wait = strategy.calculate_wait(Some(&empty));
        assert!(wait > Duration::from_millis(2900) && wait <= Duration::from_secs(3));
    }
}
