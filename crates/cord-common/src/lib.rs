//! # cord-common
//!
//! Shared utilities for the cord SDK: configuration, the error taxonomy, and telemetry.

pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    ClientSettings, ConfigError, DiscordSettings, GatewaySettings, LoggingSettings,
    RateLimitSettings, SdkConfig, StrategyKind, DEFAULT_API_URL, DEFAULT_GATEWAY_URL,
    DEFAULT_HEARTBEAT_INTERVAL_MS,
};
pub use error::{ApiError, ErrorList, SdkError, SdkResult, ValidationError, MAX_RETRY_AFTER};
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
