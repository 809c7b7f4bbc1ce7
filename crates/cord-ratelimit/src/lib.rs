//! # cord-ratelimit
//!
//! Client-side rate limit governor for the REST API.
//!
//! ## Features
//!
//! - **Bucket tracking**: per-route budgets parsed from `X-RateLimit-*` headers,
//!   with route aliasing onto server-assigned bucket ids and a global bucket
//! - **Strategies**: reactive, proactive, and adaptive (learning) wait policies
//!
//! ## Example
//!
//! ```ignore
//! use cord_ratelimit::{create_strategy, MemoryTracker, RateLimitTracker, route_key};
//!
//! let tracker = MemoryTracker::new();
//! let strategy = create_strategy(StrategyKind::Adaptive, &settings);
//!
//! let route = route_key("POST", "/channels/1/messages");
//! let bucket = tracker.bucket(&route);
//! if strategy.should_wait(bucket.as_ref()) {
//!     tokio::time::sleep(strategy.calculate_wait(bucket.as_ref())).await;
//! }
//! tracker.wait(&cancel, &route).await?;
//! ```

pub mod bucket;
pub mod headers;
pub mod strategy;
pub mod tracker;

pub use bucket::Bucket;
pub use headers::RateLimitHeaders;
pub use strategy::{
    create_strategy, AdaptiveStats, AdaptiveStrategy, OutcomeRecorder, ProactiveStrategy,
    RateLimitStrategy, ReactiveStrategy, RequestOutcome, SharedStrategy,
};
pub use tracker::{route_key, MemoryTracker, RateLimitTracker, SharedTracker};
