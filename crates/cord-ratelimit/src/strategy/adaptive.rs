//! Adaptive strategy: proactive waiting with a learned threshold
//!
//! The threshold moves between `min_threshold` and `max_threshold` based on
//! how often recent requests still ran into a 429. The decision rules match
//! [`super::ProactiveStrategy`] without the safety margin, and the computed
//! wait is stretched by up to 50% while the recent hit rate is high.

use super::{drain_ratio, live, OutcomeRecorder, RateLimitStrategy};
use crate::bucket::Bucket;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

pub const DEFAULT_MIN_THRESHOLD: f64 = 0.05;
pub const DEFAULT_MAX_THRESHOLD: f64 = 0.3;
pub const DEFAULT_LEARNING_WINDOW: usize = 50;
pub const MIN_LEARNING_WINDOW: usize = 10;

/// Hit rate the threshold is steered towards
const TARGET_HIT_RATE: f64 = 0.01;
/// Threshold step per adjustment, scaled by distance from the target
const ADJUSTMENT_FACTOR: f64 = 0.1;

/// One completed request as seen by the learner
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub hit_limit: bool,
    pub timestamp: DateTime<Utc>,
    pub remaining: Option<u32>,
    pub limit: Option<u32>,
}

/// Snapshot of the learner's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveStats {
    pub current_threshold: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub history_size: usize,
    pub learning_window: usize,
    pub recent_hit_rate: f64,
    pub total_hits: u64,
    pub total_successes: u64,
}

#[derive(Debug)]
struct AdaptiveState {
    min_threshold: f64,
    max_threshold: f64,
    current_threshold: f64,
    learning_window: usize,
    history: VecDeque<RequestOutcome>,
    total_hits: u64,
    total_successes: u64,
}

impl AdaptiveState {
    fn hit_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let hits = self.history.iter().filter(|o| o.hit_limit).count();
        hits as f64 / self.history.len() as f64
    }

    fn adapt(&mut self) {
        let rate = self.hit_rate();
        if rate > TARGET_HIT_RATE {
            let step = ADJUSTMENT_FACTOR * (rate / TARGET_HIT_RATE);
            self.current_threshold = (self.current_threshold + step).min(self.max_threshold);
        } else if rate < TARGET_HIT_RATE && self.current_threshold > self.min_threshold {
            let step = ADJUSTMENT_FACTOR * (1.0 - rate / TARGET_HIT_RATE);
            self.current_threshold = (self.current_threshold - step).max(self.min_threshold);
        }
    }
}

/// Learning rate limit strategy
#[derive(Debug)]
pub struct AdaptiveStrategy {
    state: Mutex<AdaptiveState>,
}

impl Default for AdaptiveStrategy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MIN_THRESHOLD,
            DEFAULT_MAX_THRESHOLD,
            DEFAULT_LEARNING_WINDOW,
        )
    }
}

impl AdaptiveStrategy {
    /// Create a learner starting half way between the bounds
    ///
    /// A negative `min` or a `max` above 1 falls back to the default bound,
    /// reversed bounds are swapped, and the window is at least 10.
    #[must_use]
    pub fn new(min_threshold: f64, max_threshold: f64, learning_window: usize) -> Self {
        let mut min = if min_threshold.is_nan() || min_threshold < 0.0 {
            DEFAULT_MIN_THRESHOLD
        } else {
            min_threshold
        };
        let mut max = if max_threshold.is_nan() || max_threshold > 1.0 {
            DEFAULT_MAX_THRESHOLD
        } else {
            max_threshold
        };
        if min > max {
            std::mem::swap(&mut min, &mut max);
        }
        let learning_window = learning_window.max(MIN_LEARNING_WINDOW);

        Self {
            state: Mutex::new(AdaptiveState {
                min_threshold: min,
                max_threshold: max,
                current_threshold: (min + max) / 2.0,
                learning_window,
                history: VecDeque::with_capacity(learning_window),
                total_hits: 0,
                total_successes: 0,
            }),
        }
    }

    #[must_use]
    pub fn current_threshold(&self) -> f64 {
        self.state.lock().current_threshold
    }

    #[must_use]
    pub fn stats(&self) -> AdaptiveStats {
        let state = self.state.lock();
        AdaptiveStats {
            current_threshold: state.current_threshold,
            min_threshold: state.min_threshold,
            max_threshold: state.max_threshold,
            history_size: state.history.len(),
            learning_window: state.learning_window,
            recent_hit_rate: state.hit_rate(),
            total_hits: state.total_hits,
            total_successes: state.total_successes,
        }
    }

    /// Record an outcome (see [`OutcomeRecorder`])
    pub fn record_request(&self, bucket: Option<&Bucket>, hit_limit: bool) {
        let mut state = self.state.lock();
        state.history.push_back(RequestOutcome {
            hit_limit,
            timestamp: Utc::now(),
            remaining: bucket.map(|b| b.remaining),
            limit: bucket.map(|b| b.limit),
        });
        while state.history.len() > state.learning_window {
            state.history.pop_front();
        }

        if hit_limit {
            state.total_hits += 1;
        } else {
            state.total_successes += 1;
        }

        if state.history.len() >= state.learning_window {
            let before = state.current_threshold;
            state.adapt();
            if (state.current_threshold - before).abs() > f64::EPSILON {
                tracing::debug!(
                    from = before,
                    to = state.current_threshold,
                    hit_rate = state.hit_rate(),
                    "Adaptive rate limit threshold adjusted"
                );
            }
        }
    }
}

impl OutcomeRecorder for AdaptiveStrategy {
    fn record_request(&self, bucket: Option<&Bucket>, hit_limit: bool) {
        AdaptiveStrategy::record_request(self, bucket, hit_limit);
    }
}

impl RateLimitStrategy for AdaptiveStrategy {
    fn should_wait(&self, bucket: Option<&Bucket>) -> bool {
        let Some(fraction) = live(bucket).and_then(Bucket::remaining_fraction) else {
            return false;
        };
        fraction <= self.current_threshold()
    }

    fn calculate_wait(&self, bucket: Option<&Bucket>) -> Duration {
        let Some(b) = live(bucket) else {
            return Duration::ZERO;
        };
        let Some(fraction) = b.remaining_fraction() else {
            return Duration::ZERO;
        };

        let (threshold, hit_rate) = {
            let state = self.state.lock();
            (state.current_threshold, state.hit_rate())
        };
        if fraction > threshold {
            return Duration::ZERO;
        }

        let full = b.time_until_reset();
        let scaled = full.mul_f64(drain_ratio(threshold, fraction) * (1.0 + 0.5 * hit_rate));
        scaled.min(full)
    }

    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn outcome_recorder(&self) -> Option<&dyn OutcomeRecorder> {
        Some(self)
    }
}
