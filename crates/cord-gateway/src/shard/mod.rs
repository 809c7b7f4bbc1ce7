//! Sharding
//!
//! Splits a bot's guilds across several gateway sessions that share one
//! dispatcher.

mod info;
mod manager;
mod strategy;

pub use info::GatewayInfoSource;
pub use manager::{shard_gateway_url, Shard, ShardManager, ShardManagerBuilder};
pub use strategy::{FixedSharding, RecommendedSharding, ShardingStrategy, GUILDS_PER_SHARD};
