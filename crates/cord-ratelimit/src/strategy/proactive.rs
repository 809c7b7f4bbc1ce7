//! Proactive strategy: slow down before the bucket runs dry

use super::{drain_ratio, live, RateLimitStrategy};
use crate::bucket::Bucket;
use std::time::Duration;

pub const DEFAULT_THRESHOLD: f64 = 0.1;
pub const DEFAULT_SAFETY_MARGIN: u32 = 1;

/// Waits once `remaining` falls to `safety_margin` or the remaining fraction
/// falls to `threshold`
///
/// At or below the safety margin the full time until reset is waited;
/// otherwise the wait grows from 10% to 100% of it as the bucket drains.
#[derive(Debug, Clone, Copy)]
pub struct ProactiveStrategy {
    threshold: f64,
    safety_margin: u32,
}

impl Default for ProactiveStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_SAFETY_MARGIN)
    }
}

impl ProactiveStrategy {
    /// `threshold` is clamped to `[0, 1]`
    #[must_use]
    pub fn new(threshold: f64, safety_margin: u32) -> Self {
        let threshold = if threshold.is_nan() {
            DEFAULT_THRESHOLD
        } else {
            threshold.clamp(0.0, 1.0)
        };
        Self {
            threshold,
            safety_margin,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[must_use]
    pub fn safety_margin(&self) -> u32 {
        self.safety_margin
    }
}

impl RateLimitStrategy for ProactiveStrategy {
    fn should_wait(&self, bucket: Option<&Bucket>) -> bool {
        let Some(b) = live(bucket) else {
            return false;
        };
        let Some(fraction) = b.remaining_fraction() else {
            return false;
        };
        b.remaining <= self.safety_margin || fraction <= self.threshold
    }

    fn calculate_wait(&self, bucket: Option<&Bucket>) -> Duration {
        if !self.should_wait(bucket) {
            return Duration::ZERO;
        }
        let Some(b) = bucket else {
            return Duration::ZERO;
        };

        let full = b.time_until_reset();
        if b.remaining <= self.safety_margin {
            return full;
        }
        let fraction = b.remaining_fraction().unwrap_or(0.0);
        full.mul_f64(drain_ratio(self.threshold, fraction))
    }

    fn name(&self) -> &'static str {
        "proactive"
    }
}
