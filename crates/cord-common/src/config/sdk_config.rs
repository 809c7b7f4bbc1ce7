//! SDK configuration structs
//!
//! Loads configuration from environment variables and config files.

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// REST API base URL used when none is configured.
pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

/// Gateway URL used when none is configured.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Heartbeat interval used until the server's hello overrides it.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41_250;

/// Main SDK configuration
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct SdkConfig {
    pub discord: DiscordSettings,
    #[validate(nested)]
    pub client: ClientSettings,
    #[validate(nested)]
    pub gateway: GatewaySettings,
    pub logging: LoggingSettings,
}

/// Credentials and identifiers
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiscordSettings {
    pub bot_token: String,
    pub application_id: String,
}

impl std::fmt::Debug for DiscordSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordSettings")
            .field("bot_token", &"[redacted]")
            .field("application_id", &self.application_id)
            .finish()
    }
}

/// REST client configuration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub retries: u32,
    #[validate(nested)]
    pub rate_limit: RateLimitSettings,
}

/// Client-side rate limiting configuration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_backoff"))]
pub struct RateLimitSettings {
    pub strategy: StrategyKind,
    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold: f64,
    pub safety_margin: u32,
    #[validate(range(min = 0.0, max = 1.0))]
    pub adaptive_min: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub adaptive_max: f64,
    #[validate(range(min = 10))]
    pub learning_window: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

/// Gateway session configuration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct GatewaySettings {
    pub url: String,
    /// Raw intents mask; `None` selects the default intent set.
    pub intents: Option<u64>,
    #[validate(range(min = 1))]
    pub shard_count: u32,
    pub heartbeat_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl LoggingSettings {
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Rate limit strategy selector
///
/// Names are matched case-insensitively; anything unrecognised selects
/// [`StrategyKind::Adaptive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum StrategyKind {
    Reactive,
    Proactive,
    #[default]
    Adaptive,
}

impl StrategyKind {
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "reactive" => Self::Reactive,
            "proactive" => Self::Proactive,
            _ => Self::Adaptive,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reactive => "reactive",
            Self::Proactive => "proactive",
            Self::Adaptive => "adaptive",
        }
    }
}

impl From<String> for StrategyKind {
    fn from(value: String) -> Self {
        Self::from_name(&value)
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Default value functions
fn default_timeout_secs() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_threshold() -> f64 {
    0.1
}

fn default_safety_margin() -> u32 {
    1
}

fn default_adaptive_min() -> f64 {
    0.05
}

fn default_adaptive_max() -> f64 {
    0.3
}

fn default_learning_window() -> usize {
    50
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            threshold: default_threshold(),
            safety_margin: default_safety_margin(),
            adaptive_min: default_adaptive_min(),
            adaptive_max: default_adaptive_max(),
            learning_window: default_learning_window(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RateLimitSettings {
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

fn validate_backoff(settings: &RateLimitSettings) -> Result<(), validator::ValidationError> {
    if settings.backoff_base_ms > settings.backoff_max_ms {
        return Err(validator::ValidationError::new("backoff_base_exceeds_max"));
    }
    Ok(())
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            intents: None,
            shard_count: 1,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

impl GatewaySettings {
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl SdkConfig {
    /// Load configuration from environment variables
    ///
    /// A `.env` file in the working directory is loaded first when present.
    ///
    /// # Errors
    /// Returns an error if a variable holds an unparseable value or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: String| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };

        let config = Self {
            discord: DiscordSettings {
                bot_token: text("DISCORD_BOT_TOKEN", String::new()),
                application_id: text("DISCORD_APPLICATION_ID", String::new()),
            },
            client: ClientSettings {
                base_url: text("DISCORD_API_URL", DEFAULT_API_URL.to_string()),
                timeout_secs: parse_var(&lookup, "DISCORD_TIMEOUT_SECS")?
                    .unwrap_or_else(default_timeout_secs),
                retries: parse_var(&lookup, "DISCORD_RETRIES")?.unwrap_or_else(default_retries),
                rate_limit: RateLimitSettings {
                    strategy: lookup("DISCORD_RATE_LIMIT_STRATEGY")
                        .map(|name| StrategyKind::from_name(&name))
                        .unwrap_or_default(),
                    threshold: parse_var(&lookup, "DISCORD_RATE_LIMIT_THRESHOLD")?
                        .unwrap_or_else(default_threshold),
                    safety_margin: parse_var(&lookup, "DISCORD_RATE_LIMIT_SAFETY_MARGIN")?
                        .unwrap_or_else(default_safety_margin),
                    backoff_base_ms: parse_var(&lookup, "DISCORD_BACKOFF_BASE_MS")?
                        .unwrap_or_else(default_backoff_base_ms),
                    backoff_max_ms: parse_var(&lookup, "DISCORD_BACKOFF_MAX_MS")?
                        .unwrap_or_else(default_backoff_max_ms),
                    ..RateLimitSettings::default()
                },
            },
            gateway: GatewaySettings {
                url: text("DISCORD_GATEWAY_URL", DEFAULT_GATEWAY_URL.to_string()),
                intents: parse_var(&lookup, "DISCORD_INTENTS")?,
                shard_count: parse_var(&lookup, "DISCORD_SHARD_COUNT")?.unwrap_or(1),
                heartbeat_interval_ms: parse_var(&lookup, "DISCORD_HEARTBEAT_INTERVAL_MS")?
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS),
            },
            logging: LoggingSettings {
                level: text("DISCORD_LOG_LEVEL", default_log_level()),
                format: text("DISCORD_LOG_FORMAT", default_log_format()),
            },
        };

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Load configuration from a YAML, TOML, or JSON file
    ///
    /// Values may be overridden with `DISCORD__<SECTION>__<FIELD>` variables,
    /// e.g. `DISCORD__CLIENT__RETRIES=5`. Zero durations and retry counts are
    /// treated as unset.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("DISCORD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Self = settings.try_deserialize()?;
        config.apply_defaults();
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Bot token, or an error naming the variable that should carry it
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        let token = self.discord.bot_token.trim();
        if token.is_empty() {
            return Err(ConfigError::MissingVar("DISCORD_BOT_TOKEN"));
        }
        Ok(token)
    }

    fn apply_defaults(&mut self) {
        let client = &mut self.client;
        if client.base_url.is_empty() {
            client.base_url = DEFAULT_API_URL.to_string();
        }
        if client.timeout_secs == 0 {
            client.timeout_secs = default_timeout_secs();
        }
        if client.retries == 0 {
            client.retries = default_retries();
        }
        if client.rate_limit.backoff_base_ms == 0 {
            client.rate_limit.backoff_base_ms = default_backoff_base_ms();
        }
        if client.rate_limit.backoff_max_ms == 0 {
            client.rate_limit.backoff_max_ms = default_backoff_max_ms();
        }

        if self.gateway.url.is_empty() {
            self.gateway.url = DEFAULT_GATEWAY_URL.to_string();
        }
        if self.gateway.heartbeat_interval_ms == 0 {
            self.gateway.heartbeat_interval_ms = DEFAULT_HEARTBEAT_INTERVAL_MS;
        }

        if self.logging.level.is_empty() {
            self.logging.level = default_log_level();
        }
        if self.logging.format.is_empty() {
            self.logging.format = default_log_format();
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        _ => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(validator::ValidationErrors),
}
