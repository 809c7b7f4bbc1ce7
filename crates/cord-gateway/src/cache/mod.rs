//! Gateway state cache
//!
//! Guilds, channels and members seen on the gateway, kept so handlers can
//! look them up without a REST round trip.

mod memory;

pub use memory::MemoryCache;

use crate::events::{Channel, GatewayEvent, Guild, Member};
use serde::Serialize;
use std::sync::Arc;

/// Lookup counters since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub guild_hits: u64,
    pub guild_misses: u64,
    pub channel_hits: u64,
    pub channel_misses: u64,
    pub member_hits: u64,
    pub member_misses: u64,
}

/// Store of gateway state shared between the read loop and handlers
pub trait StateCache: Send + Sync {
    fn guild(&self, guild_id: &str) -> Option<Arc<Guild>>;
    fn set_guild(&self, guild: Guild);
    /// Remove a guild together with its channels and members
    fn remove_guild(&self, guild_id: &str);

    fn channel(&self, channel_id: &str) -> Option<Arc<Channel>>;
    fn set_channel(&self, channel: Channel);
    fn remove_channel(&self, channel_id: &str);

    fn member(&self, guild_id: &str, user_id: &str) -> Option<Arc<Member>>;
    /// Members without a user are ignored
    fn set_member(&self, guild_id: &str, member: Member);
    fn remove_member(&self, guild_id: &str, user_id: &str);

    fn stats(&self) -> CacheStats;

    /// Fold a dispatched event into the cache
    ///
    /// GUILD_CREATE stores the guild with its channels and members,
    /// GUILD_UPDATE replaces the guild, GUILD_DELETE drops it. Other events
    /// are ignored.
    fn apply(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::GuildCreate(guild) => {
                for channel in &guild.channels {
                    let mut channel = channel.clone();
                    channel.guild_id.get_or_insert_with(|| guild.id.clone());
                    self.set_channel(channel);
                }
                for member in &guild.members {
                    self.set_member(&guild.id, member.clone());
                }
                self.set_guild(guild.clone());
            }
            GatewayEvent::GuildUpdate(guild) => self.set_guild(guild.clone()),
            GatewayEvent::GuildDelete(guild) => self.remove_guild(&guild.id),
            _ => {}
        }
    }
}

/// Shared cache handle
pub type SharedCache = Arc<dyn StateCache>;
