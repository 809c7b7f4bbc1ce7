//! Bucket tracking
//!
//! Keeps per-route buckets keyed by the server's bucket id, an alias map
//! from route strings to those ids, and the account-wide global bucket.

use crate::bucket::Bucket;
use crate::headers::RateLimitHeaders;
use async_trait::async_trait;
use cord_common::SdkError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Build the route key used before a server bucket id is known
#[must_use]
pub fn route_key(method: &str, endpoint: &str) -> String {
    format!("{}:{endpoint}", method.to_ascii_uppercase())
}

/// Store of rate limit state, shared by every request a client issues
#[async_trait]
pub trait RateLimitTracker: Send + Sync {
    /// Block until `route` may be requested
    ///
    /// Returns immediately when no live bucket gates the route, and
    /// [`SdkError::Cancelled`] if `cancel` fires before the wait completes.
    async fn wait(&self, cancel: &CancellationToken, route: &str) -> Result<(), SdkError>;

    /// Record the rate limit metadata of a response to `route`
    fn update(&self, route: &str, headers: &RateLimitHeaders);

    /// Snapshot of the bucket for a route or bucket id
    fn bucket(&self, route_or_key: &str) -> Option<Bucket>;

    /// Drop all state
    fn clear(&self);
}

/// Shared tracker handle
pub type SharedTracker = Arc<dyn RateLimitTracker>;

#[derive(Debug, Default)]
struct TrackerState {
    buckets: HashMap<String, Bucket>,
    routes: HashMap<String, String>,
    global: Option<Bucket>,
}

impl TrackerState {
    fn resolve<'a>(&'a self, route_or_key: &'a str) -> &'a str {
        self.routes
            .get(route_or_key)
            .map_or(route_or_key, String::as_str)
    }

    fn wait_deadline(&self, route: &str, now: Instant) -> Option<Instant> {
        if let Some(global) = &self.global {
            if !global.is_expired_at(now) {
                return Some(global.reset);
            }
        }

        self.buckets
            .get(self.resolve(route))
            .filter(|b| b.is_exhausted() && !b.is_expired_at(now))
            .map(|b| b.reset)
    }

    fn prune(&mut self, now: Instant) {
        self.buckets.retain(|_, bucket| !bucket.is_expired_at(now));
        let buckets = &self.buckets;
        self.routes.retain(|_, key| buckets.contains_key(key));
        if self.global.as_ref().is_some_and(|g| g.is_expired_at(now)) {
            self.global = None;
        }
    }
}

/// In-process [`RateLimitTracker`]
///
/// Readers share the lock; updates take it exclusively. The lock is never
/// held across a sleep.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    state: RwLock<TrackerState>,
}

impl MemoryTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new_shared() -> SharedTracker {
        Arc::new(Self::new())
    }

    /// The global bucket, if one has been recorded and not yet pruned
    #[must_use]
    pub fn global_bucket(&self) -> Option<Bucket> {
        self.state.read().global.clone()
    }

    /// Number of per-route buckets currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RateLimitTracker for MemoryTracker {
    async fn wait(&self, cancel: &CancellationToken, route: &str) -> Result<(), SdkError> {
        let deadline = self.state.read().wait_deadline(route, Instant::now());

        let Some(deadline) = deadline else {
            return Ok(());
        };

        tracing::debug!(
            route,
            wait_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Waiting for rate limit reset"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SdkError::Cancelled),
            () = tokio::time::sleep_until(deadline) => Ok(()),
        }
    }

    fn update(&self, route: &str, headers: &RateLimitHeaders) {
        if headers.is_empty() {
            return;
        }

        let now = Instant::now();
        let reset = headers.reset_instant(now).unwrap_or(now);
        let limit = headers.limit.unwrap_or(0);
        let remaining = headers.remaining.unwrap_or(0);

        let mut state = self.state.write();
        if headers.global {
            tracing::warn!(route, "Global rate limit recorded");
            state.global = Some(Bucket::global(limit, remaining, reset));
        } else {
            let key = headers.bucket.clone().unwrap_or_else(|| route.to_string());
            state
                .buckets
                .insert(key.clone(), Bucket::new(key.clone(), limit, remaining, reset));
            state.routes.insert(route.to_string(), key);
        }
        state.prune(now);
    }

    fn bucket(&self, route_or_key: &str) -> Option<Bucket> {
        let state = self.state.read();
        state.buckets.get(state.resolve(route_or_key)).cloned()
    }

    fn clear(&self) {
        let mut state = self.state.write();
        state.buckets.clear();
        state.routes.clear();
        state.global = None;
    }
}
