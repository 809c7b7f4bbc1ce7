//! Shard count strategies

/// Guilds one shard is expected to handle before another is needed
pub const GUILDS_PER_SHARD: u64 = 2000;

/// Decides how many shards to run for a bot
pub trait ShardingStrategy: Send + Sync {
    /// Shard count for `guild_count` guilds. Zero defers to the server's
    /// recommendation.
    fn calculate(&self, guild_count: u64) -> u32;

    /// Receive the server-recommended shard count before [`calculate`](Self::calculate).
    /// Strategies that do not use the hint ignore it.
    fn set_recommended(&mut self, _shards: u32) {}
}

/// Use the server's recommendation, or estimate one shard per
/// [`GUILDS_PER_SHARD`] guilds without it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecommendedSharding {
    recommended: u32,
}

impl RecommendedSharding {
    #[must_use]
    pub const fn new() -> Self {
        Self { recommended: 0 }
    }

    #[must_use]
    pub const fn recommended(&self) -> u32 {
        self.recommended
    }
}

impl ShardingStrategy for RecommendedSharding {
    fn calculate(&self, guild_count: u64) -> u32 {
        if self.recommended > 0 {
            return self.recommended;
        }
        if guild_count == 0 {
            return 1;
        }
        u32::try_from(guild_count / GUILDS_PER_SHARD + 1).unwrap_or(u32::MAX)
    }

    fn set_recommended(&mut self, shards: u32) {
        self.recommended = shards;
    }
}

/// Always the same number of shards, at least one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSharding(pub u32);

impl ShardingStrategy for FixedSharding {
    fn calculate(&self, _guild_count: u64) -> u32 {
        self.0.max(1)
    }
}
