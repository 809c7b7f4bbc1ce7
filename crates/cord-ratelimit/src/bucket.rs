//! Rate limit bucket

use std::time::Duration;
use tokio::time::Instant;

/// Request budget for one route class, or for the whole account when `global`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Server bucket id, or the route string when the server sent none
    pub key: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset: Instant,
    pub global: bool,
}

impl Bucket {
    /// Create a per-route bucket. `remaining` is capped at `limit`.
    #[must_use]
    pub fn new(key: impl Into<String>, limit: u32, remaining: u32, reset: Instant) -> Self {
        Self {
            key: key.into(),
            limit,
            remaining: remaining.min(limit),
            reset,
            global: false,
        }
    }

    /// Create the account-wide bucket
    #[must_use]
    pub fn global(limit: u32, remaining: u32, reset: Instant) -> Self {
        Self {
            global: true,
            ..Self::new("global", limit, remaining, reset)
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.reset <= now
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Zero once the reset instant has passed
    #[must_use]
    pub fn time_until_reset(&self) -> Duration {
        self.reset.saturating_duration_since(Instant::now())
    }

    /// `remaining / limit`, or `None` for a bucket without a known limit
    #[must_use]
    pub fn remaining_fraction(&self) -> Option<f64> {
        if self.limit == 0 {
            None
        } else {
            Some(f64::from(self.remaining) / f64::from(self.limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_is_capped_at_limit() {
        let bucket = Bucket::new("b", 5, 9, Instant::now() + Duration::from_secs(1));
        assert_eq!(bucket.remaining, 5);
    }

    #[test]
    fn test_expiry() {
        let now = Instant::now();
        let bucket = Bucket::new("b", 5, 0, now + Duration::from_secs(1));
        assert!(!bucket.is_expired_at(now));
        assert!(bucket.is_expired_at(now + Duration::from_secs(1)));
        assert!(bucket.is_exhausted());
    }

    #[test]
    fn test_remaining_fraction() {
        let reset = Instant::now() + Duration::from_secs(1);
        assert_eq!(Bucket::new("b", 10, 3, reset).remaining_fraction(), Some(0.3));
        assert_eq!(Bucket::global(0, 0, reset).remaining_fraction(), None);
    }
}
