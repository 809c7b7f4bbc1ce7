//! # cord-gateway
//!
//! Persistent gateway connections for Discord bots: framing, heartbeats,
//! identify and resume, typed event dispatch, and shard management.
//!
//! ## Example
//!
//! ```ignore
//! use cord_gateway::{GatewayClient, Intents};
//!
//! let client = GatewayClient::builder(token)
//!     .intents(Intents::GUILDS | Intents::GUILD_MESSAGES)
//!     .build()?;
//!
//! client.dispatcher().on_message_create(|message| async move {
//!     tracing::info!(content = %message.content, "message");
//!     Ok(())
//! });
//!
//! client.connect(&cancel).await?;
//! ```

pub mod cache;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod protocol;
pub mod shard;
pub mod transport;

pub use cache::{CacheStats, MemoryCache, SharedCache, StateCache};
pub use client::{GatewayClient, GatewayClientBuilder, ReconnectStatus};
pub use connection::{Connection, ConnectionBuilder, ConnectionState};
pub use dispatcher::{Dispatcher, EventHandler, HandlerError};
pub use error::{GatewayError, GatewayResult};
pub use events::{EventType, GatewayEvent};
pub use protocol::{CloseCode, Intents, OpCode, Payload};
pub use shard::{
    shard_gateway_url, FixedSharding, GatewayInfoSource, RecommendedSharding, Shard,
    ShardManager, ShardManagerBuilder, ShardingStrategy,
};
pub use transport::{Dialer, Transport, TransportError};
