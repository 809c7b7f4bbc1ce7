//! SDK error types
//!
//! Classification shared by the REST executor and the gateway layers.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// A required field was missing or malformed. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation failed for {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an empty required field
    #[must_use]
    pub fn required(field: impl Into<String>) -> Self {
        Self::new(field, "is required")
    }
}

/// Ceiling applied to a server-provided `retry_after`
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Non-2xx REST response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    /// Vendor error code from the response body, when present
    pub code: Option<u64>,
    /// Server-provided delay before the request may be retried
    pub retry_after: Option<Duration>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<u64>,
    #[serde(default)]
    retry_after: Option<f64>,
}

impl ApiError {
    #[must_use]
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
            retry_after: None,
        }
    }

    /// Build an error from a response status and raw body
    ///
    /// JSON bodies of the shape `{message, code, retry_after}` are decoded;
    /// anything else is kept verbatim as the message.
    #[must_use]
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        match serde_json::from_slice::<ApiErrorBody>(body) {
            Ok(parsed) => Self {
                status,
                message: parsed.message,
                code: parsed.code,
                retry_after: parsed
                    .retry_after
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(|secs| {
                        Duration::try_from_secs_f64(secs)
                            .map_or(MAX_RETRY_AFTER, |d| d.min(MAX_RETRY_AFTER))
                    }),
            },
            Err(_) => Self::new(status, String::from_utf8_lossy(body).trim().to_string()),
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        self.status == 400
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    #[must_use]
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "api error {}", self.status)?;
        if let Some(code) = self.code {
            write!(f, " (code {code})")?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// SDK-wide error type
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("network error during {op}: {source}")]
    Network {
        op: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("request failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<SdkError>,
    },

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bot token is required")]
    TokenRequired,
}

impl SdkError {
    /// Wrap a transport failure for the named operation
    pub fn network(op: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Network {
            op: op.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(field, message))
    }

    /// Whether the REST executor may try the request again
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Api(api) => api.is_rate_limited() || api.is_server_error(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The API error behind this error, looking through retry exhaustion
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            Self::Exhausted { last, .. } => last.api_error(),
            _ => None,
        }
    }
}

/// Result type alias for SDK operations
pub type SdkResult<T> = Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_from_json_body() {
        let err = ApiError::from_response(
            429,
            br#"{"message":"You are being rate limited.","retry_after":1.5,"global":false}"#,
        );
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after, Some(Duration::from_millis(1500)));
        assert_eq!(err.message, "You are being rate limited.");
    }

    #[test]
    fn test_api_error_huge_retry_after_saturates() {
        let err = ApiError::from_response(429, br#"{"message":"slow down","retry_after":1e20}"#);
        assert_eq!(err.retry_after, Some(MAX_RETRY_AFTER));

        let err = ApiError::from_response(429, br#"{"retry_after":-3}"#);
        assert_eq!(err.retry_after, None);
    }

    #[test]
    fn test_api_error_from_plain_body() {
        let err = ApiError::from_response(502, b"  Bad Gateway \n");
        assert!(err.is_server_error());
        assert_eq!(err.message, "Bad Gateway");
        assert_eq!(err.code, None);
    }

    #[test]
    fn test_api_error_predicates() {
        assert!(ApiError::new(401, "").is_unauthorized());
        assert!(ApiError::new(403, "").is_unauthorized());
        assert!(ApiError::new(404, "").is_not_found());
        assert!(ApiError::new(400, "").is_bad_request());
        assert!(ApiError::new(418, "").is_client_error());
        assert!(!ApiError::new(418, "").is_server_error());
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::from_response(404, br#"{"message":"Unknown Channel","code":10003}"#);
        assert_eq!(err.to_string(), "api error 404 (code 10003): Unknown Channel");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SdkError::network("GET /x", anyhow::anyhow!("reset")).is_retryable());
        assert!(SdkError::Api(ApiError::new(429, "")).is_retryable());
        assert!(SdkError::Api(ApiError::new(503, "")).is_retryable());
        assert!(!SdkError::Api(ApiError::new(404, "")).is_retryable());
        assert!(!SdkError::validation("guild_id", "is required").is_retryable());
        assert!(!SdkError::Cancelled.is_retryable());
    }

    #[test]
    fn test_exhausted_preserves_last_cause() {
        let err = SdkError::Exhausted {
            attempts: 4,
            last: Box::new(SdkError::Api(ApiError::new(500, "boom"))),
        };
        assert_eq!(
            err.to_string(),
            "request failed after 4 attempts: api error 500: boom"
        );
        assert_eq!(err.api_error().map(|e| e.status), Some(500));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::required("guild_id");
        assert_eq!(err.to_string(), "validation failed for guild_id: is required");
    }
}
