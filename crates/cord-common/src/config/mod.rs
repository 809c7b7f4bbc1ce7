//! Configuration structs

mod sdk_config;

pub use sdk_config::{
    ClientSettings, ConfigError, DiscordSettings, GatewaySettings, LoggingSettings,
    RateLimitSettings, SdkConfig, StrategyKind, DEFAULT_API_URL, DEFAULT_GATEWAY_URL,
    DEFAULT_HEARTBEAT_INTERVAL_MS,
};
