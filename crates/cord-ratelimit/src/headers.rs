//! Rate limit response metadata
//!
//! Parses the `X-RateLimit-*` family of response headers.

use chrono::Utc;
use http::HeaderMap;
use std::time::Duration;
use tokio::time::Instant;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Longest wait any single response may impose; larger values saturate here
pub const MAX_RESET_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Rate limit fields carried by one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Relative reset; preferred over `reset_at`
    pub reset_after: Option<Duration>,
    /// Absolute reset as fractional Unix seconds
    pub reset_at: Option<f64>,
    pub bucket: Option<String>,
    pub global: bool,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        Self {
            limit: text(HEADER_LIMIT).and_then(|v| v.parse().ok()),
            remaining: text(HEADER_REMAINING).and_then(|v| v.parse().ok()),
            reset_after: text(HEADER_RESET_AFTER).and_then(parse_seconds),
            reset_at: text(HEADER_RESET)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite()),
            bucket: text(HEADER_BUCKET).map(str::to_string),
            global: text(HEADER_GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            retry_after: text(HEADER_RETRY_AFTER).and_then(parse_seconds),
        }
    }

    /// True when the response carried no rate limit information at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.remaining.is_none()
            && self.reset_after.is_none()
            && self.reset_at.is_none()
            && self.bucket.is_none()
            && !self.global
    }

    /// Resolve the reset instant relative to `now`
    ///
    /// Uses `reset_after` when present, then the absolute `reset_at`, then
    /// `retry_after` (global limits often carry only that).
    #[must_use]
    pub fn reset_instant(&self, now: Instant) -> Option<Instant> {
        if let Some(after) = self.reset_after {
            return Some(offset(now, after));
        }
        if let Some(at) = self.reset_at {
            let now_unix = Utc::now().timestamp_millis() as f64 / 1000.0;
            return Some(seconds_to_wait(at - now_unix).map_or(now, |d| offset(now, d)));
        }
        self.retry_after.map(|after| offset(now, after))
    }
}

fn offset(now: Instant, after: Duration) -> Instant {
    let after = after.min(MAX_RESET_WAIT);
    now.checked_add(after).unwrap_or(now)
}

/// Non-negative seconds as a wait, saturating at [`MAX_RESET_WAIT`]
fn seconds_to_wait(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(
        Duration::try_from_secs_f64(secs)
            .map_or(MAX_RESET_WAIT, |d| d.min(MAX_RESET_WAIT)),
    )
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    raw.parse::<f64>().ok().and_then(seconds_to_wait)
}
