//! Request executor
//!
//! Wraps one logical REST call with rate limit gating, retry with
//! exponential backoff, and error classification.

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
use cord_common::{ApiError, ClientSettings, SdkError, SdkResult, DEFAULT_API_URL};
use cord_ratelimit::{
    create_strategy, route_key, Bucket, MemoryTracker, RateLimitHeaders, SharedStrategy,
    SharedTracker,
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

pub const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/seung/cord, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Executes REST requests against one API base URL with one bot token
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    tracker: SharedTracker,
    strategy: SharedStrategy,
    base_url: String,
    authorization: HeaderValue,
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    span: Span,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("base_url", &self.base_url)
            .field("strategy", &self.strategy.name())
            .field("max_retries", &self.max_retries)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .finish()
    }
}

impl RequestExecutor {
    #[must_use]
    pub fn builder(token: impl Into<String>) -> RequestExecutorBuilder {
        RequestExecutorBuilder::new(token)
    }

    #[must_use]
    pub fn tracker(&self) -> &SharedTracker {
        &self.tracker
    }

    #[must_use]
    pub fn strategy(&self) -> &SharedStrategy {
        &self.strategy
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Execute one logical request
    ///
    /// `path` is relative to the base URL and doubles as the rate limit route.
    /// Up to `max_retries + 1` attempts are made. 2xx responses are returned;
    /// other 4xx responses fail immediately; 429s, 5xx responses, and network
    /// errors are retried, a 429's `retry_after` replacing the next backoff.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> SdkResult<HttpResponse> {
        let route = route_key(method.as_str(), path);
        let url = format!("{}{path}", self.base_url);
        let span = tracing::debug_span!(parent: &self.span, "rest_request", route = %route);

        self.run_attempts(cancel, &method, &route, &url, body.as_deref())
            .instrument(span)
            .await
    }

    async fn run_attempts(
        &self,
        cancel: &CancellationToken,
        method: &Method,
        route: &str,
        url: &str,
        body: Option<&[u8]>,
    ) -> SdkResult<HttpResponse> {
        let attempts = self.max_retries + 1;
        let mut backoff = self.backoff_base;
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tracing::debug!(attempt, backoff_ms = backoff.as_millis() as u64, "Backing off");
                sleep_or_cancel(cancel, backoff).await?;
                backoff = backoff.saturating_mul(2).min(self.backoff_max);
            }

            self.gate(cancel, route).await?;

            let request = self.build_request(method, url, body);
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SdkError::Cancelled),
                result = self.transport.send(request) => result,
            };

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Request failed");
                    last_error = Some(err);
                    continue;
                }
            };

            let headers = RateLimitHeaders::from_headers(&response.headers);
            self.tracker.update(route, &headers);
            let bucket = self.tracker.bucket(route);

            if response.status.is_success() {
                self.record(bucket.as_ref(), false);
                return Ok(response);
            }

            let mut api = ApiError::from_response(response.status.as_u16(), &response.body);
            if api.is_rate_limited() {
                self.record(bucket.as_ref(), true);
                if let Some(retry_after) = api.retry_after.or(headers.retry_after) {
                    backoff = retry_after;
                    api.retry_after = Some(retry_after);
                }
                tracing::warn!(
                    attempt,
                    retry_after_ms = backoff.as_millis() as u64,
                    global = headers.global,
                    "Rate limited"
                );
                last_error = Some(SdkError::Api(api));
                continue;
            }
            if api.is_server_error() {
                tracing::warn!(attempt, status = api.status, "Server error");
                last_error = Some(SdkError::Api(api));
                continue;
            }

            return Err(SdkError::Api(api));
        }

        let last = last_error
            .unwrap_or_else(|| SdkError::network(route, anyhow::anyhow!("no attempt was made")));
        tracing::error!(attempts, error = %last, "Request exhausted retries");
        Err(SdkError::Exhausted {
            attempts,
            last: Box::new(last),
        })
    }

    /// Proactive strategy wait followed by the tracker's reactive gate
    async fn gate(&self, cancel: &CancellationToken, route: &str) -> SdkResult<()> {
        let bucket = self.tracker.bucket(route);
        if self.strategy.should_wait(bucket.as_ref()) {
            let wait = self.strategy.calculate_wait(bucket.as_ref());
            if !wait.is_zero() {
                tracing::debug!(
                    strategy = self.strategy.name(),
                    wait_ms = wait.as_millis() as u64,
                    "Strategy delaying request"
                );
                sleep_or_cancel(cancel, wait).await?;
            }
        }
        self.tracker.wait(cancel, route).await
    }

    fn record(&self, bucket: Option<&Bucket>, hit_limit: bool) {
        if let Some(recorder) = self.strategy.outcome_recorder() {
            recorder.record_request(bucket, hit_limit);
        }
    }

    fn build_request(&self, method: &Method, url: &str, body: Option<&[u8]>) -> HttpRequest {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.authorization.clone());
        headers.insert(http::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        HttpRequest {
            method: method.clone(),
            url: url.to_string(),
            headers,
            body: body.map(<[u8]>::to_vec),
        }
    }

    /// `GET` and decode a JSON response
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
    ) -> SdkResult<T> {
        self.execute(cancel, Method::GET, path, None).await?.json()
    }

    /// `POST` a JSON body and decode a JSON response
    pub async fn post_json<B, T>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        body: &B,
    ) -> SdkResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_vec(body)?;
        self.execute(cancel, Method::POST, path, Some(body))
            .await?
            .json()
    }

    /// `DELETE`, discarding any response body
    pub async fn delete(&self, cancel: &CancellationToken, path: &str) -> SdkResult<()> {
        self.execute(cancel, Method::DELETE, path, None).await?;
        Ok(())
    }
}

async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> SdkResult<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SdkError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Builder for [`RequestExecutor`]
pub struct RequestExecutorBuilder {
    token: String,
    base_url: String,
    transport: Option<Arc<dyn HttpTransport>>,
    tracker: Option<SharedTracker>,
    strategy: Option<SharedStrategy>,
    settings: ClientSettings,
    span: Option<Span>,
}

impl RequestExecutorBuilder {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_API_URL.to_string(),
            transport: None,
            tracker: None,
            strategy: None,
            settings: ClientSettings::default(),
            span: None,
        }
    }

    /// Take base URL, timeout, retries, backoff, and strategy from settings
    #[must_use]
    pub fn settings(mut self, settings: &ClientSettings) -> Self {
        self.base_url.clone_from(&settings.base_url);
        self.settings = settings.clone();
        self
    }

    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.settings.retries = retries;
        self
    }

    #[must_use]
    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.settings.rate_limit.backoff_base_ms = base.as_millis() as u64;
        self.settings.rate_limit.backoff_max_ms = max.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn tracker(mut self, tracker: SharedTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: SharedStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Span that request logs are recorded under
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> SdkResult<RequestExecutor> {
        let token = self.token.trim();
        if token.is_empty() {
            return Err(SdkError::TokenRequired);
        }
        let mut authorization = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|_| SdkError::validation("token", "contains characters not allowed in a header"))?;
        authorization.set_sensitive(true);

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.settings.timeout())?),
        };
        let rate_limit = &self.settings.rate_limit;
        let strategy = self
            .strategy
            .unwrap_or_else(|| create_strategy(rate_limit.strategy, rate_limit));

        Ok(RequestExecutor {
            transport,
            tracker: self.tracker.unwrap_or_else(MemoryTracker::new_shared),
            strategy,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            authorization,
            max_retries: self.settings.retries,
            backoff_base: rate_limit.backoff_base(),
            backoff_max: rate_limit.backoff_max(),
            span: self
                .span
                .unwrap_or_else(|| tracing::info_span!("rest_executor")),
        })
    }
}
