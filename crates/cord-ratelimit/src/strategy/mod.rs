//! Rate limit strategies
//!
//! A strategy decides, from a bucket snapshot, whether a request should be
//! held back before it is sent and for how long. Strategies that learn from
//! request outcomes expose that through [`RateLimitStrategy::outcome_recorder`].

mod adaptive;
mod proactive;
mod reactive;

pub use adaptive::{AdaptiveStats, AdaptiveStrategy, RequestOutcome};
pub use proactive::ProactiveStrategy;
pub use reactive::ReactiveStrategy;

use crate::bucket::Bucket;
use cord_common::{RateLimitSettings, StrategyKind};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Wait policy consulted before every request
pub trait RateLimitStrategy: Send + Sync + fmt::Debug {
    fn should_wait(&self, bucket: Option<&Bucket>) -> bool;

    /// Never longer than the bucket's time until reset
    fn calculate_wait(&self, bucket: Option<&Bucket>) -> Duration;

    fn name(&self) -> &'static str;

    /// Learning capability, for strategies that adapt to request outcomes
    fn outcome_recorder(&self) -> Option<&dyn OutcomeRecorder> {
        None
    }
}

/// Receives the outcome of every completed request
pub trait OutcomeRecorder: Send + Sync {
    fn record_request(&self, bucket: Option<&Bucket>, hit_limit: bool);
}

/// Shared strategy handle
pub type SharedStrategy = Arc<dyn RateLimitStrategy>;

/// Build the strategy selected by `kind`
#[must_use]
pub fn create_strategy(kind: StrategyKind, settings: &RateLimitSettings) -> SharedStrategy {
    match kind {
        StrategyKind::Reactive => Arc::new(ReactiveStrategy::new()),
        StrategyKind::Proactive => Arc::new(ProactiveStrategy::new(
            settings.threshold,
            settings.safety_margin,
        )),
        StrategyKind::Adaptive => Arc::new(AdaptiveStrategy::new(
            settings.adaptive_min,
            settings.adaptive_max,
            settings.learning_window,
        )),
    }
}

/// The bucket, unless it is missing or already past its reset
fn live(bucket: Option<&Bucket>) -> Option<&Bucket> {
    let now = Instant::now();
    bucket.filter(|b| !b.is_expired_at(now))
}

/// Fraction of the reset window to wait once `fraction` has fallen to
/// `threshold` or below; between 0.1 and 1.0.
fn drain_ratio(threshold: f64, fraction: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    ((threshold - fraction) / threshold).clamp(0.1, 1.0)
}
