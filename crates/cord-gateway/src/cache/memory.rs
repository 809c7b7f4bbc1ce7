//! In-memory state cache with optional expiry

use super::{CacheStats, SharedCache, StateCache};
use crate::events::{Channel, Guild, Member};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry<T> {
    value: Arc<T>,
    /// `None` never expires
    expires: Option<Instant>,
}

impl<T> Entry<T> {
    fn live(&self, now: Instant) -> Option<Arc<T>> {
        match self.expires {
            Some(at) if at <= now => None,
            _ => Some(Arc::clone(&self.value)),
        }
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct CacheState {
    guilds: HashMap<String, Entry<Guild>>,
    channels: HashMap<String, Entry<Channel>>,
    /// guild id -> user id -> member
    members: HashMap<String, HashMap<String, Entry<Member>>>,
}

#[derive(Debug, Default)]
struct Counters {
    guild_hits: AtomicU64,
    guild_misses: AtomicU64,
    channel_hits: AtomicU64,
    channel_misses: AtomicU64,
    member_hits: AtomicU64,
    member_misses: AtomicU64,
}

fn count<T>(found: Option<T>, hits: &AtomicU64, misses: &AtomicU64) -> Option<T> {
    let counter = if found.is_some() { hits } else { misses };
    counter.fetch_add(1, Ordering::Relaxed);
    found
}

/// In-process [`StateCache`]
///
/// With a TTL, entries stop being returned once it has elapsed since they
/// were stored; [`MemoryCache::purge_expired`] reclaims them. Lookups share
/// the lock and count hits and misses atomically.
#[derive(Debug, Default)]
pub struct MemoryCache {
    ttl: Option<Duration>,
    state: RwLock<CacheState>,
    counters: Counters,
}

impl MemoryCache {
    /// Cache whose entries never expire
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache whose entries expire `ttl` after being stored. A zero TTL
    /// disables expiry.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: (!ttl.is_zero()).then_some(ttl),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn new_shared(ttl: Option<Duration>) -> SharedCache {
        Arc::new(ttl.map_or_else(Self::new, Self::with_ttl))
    }

    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn entry<T>(&self, value: T) -> Entry<T> {
        let now = Instant::now();
        Entry {
            value: Arc::new(value),
            expires: self.ttl.and_then(|ttl| now.checked_add(ttl)),
        }
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write();
        let before = state.len();

        state.guilds.retain(|_, entry| !entry.is_expired_at(now));
        state.channels.retain(|_, entry| !entry.is_expired_at(now));
        for members in state.members.values_mut() {
            members.retain(|_, entry| !entry.is_expired_at(now));
        }
        state.members.retain(|_, members| !members.is_empty());

        before - state.len()
    }

    /// Number of entries held, expired or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.guilds.clear();
        state.channels.clear();
        state.members.clear();
    }
}

impl CacheState {
    fn len(&self) -> usize {
        let members: usize = self.members.values().map(HashMap::len).sum();
        self.guilds.len() + self.channels.len() + members
    }
}

impl StateCache for MemoryCache {
    fn guild(&self, guild_id: &str) -> Option<Arc<Guild>> {
        let found = self
            .state
            .read()
            .guilds
            .get(guild_id)
            .and_then(|entry| entry.live(Instant::now()));
        count(found, &self.counters.guild_hits, &self.counters.guild_misses)
    }

    fn set_guild(&self, guild: Guild) {
        let entry = self.entry(guild);
        self.state.write().guilds.insert(entry.value.id.clone(), entry);
    }

    fn remove_guild(&self, guild_id: &str) {
        let mut state = self.state.write();
        state.guilds.remove(guild_id);
        state.members.remove(guild_id);
        state
            .channels
            .retain(|_, entry| entry.value.guild_id.as_deref() != Some(guild_id));
    }

    fn channel(&self, channel_id: &str) -> Option<Arc<Channel>> {
        let found = self
            .state
            .read()
            .channels
            .get(channel_id)
            .and_then(|entry| entry.live(Instant::now()));
        count(found, &self.counters.channel_hits, &self.counters.channel_misses)
    }

    fn set_channel(&self, channel: Channel) {
        let entry = self.entry(channel);
        self.state.write().channels.insert(entry.value.id.clone(), entry);
    }

    fn remove_channel(&self, channel_id: &str) {
        self.state.write().channels.remove(channel_id);
    }

    fn member(&self, guild_id: &str, user_id: &str) -> Option<Arc<Member>> {
        let found = self
            .state
            .read()
            .members
            .get(guild_id)
            .and_then(|members| members.get(user_id))
            .and_then(|entry| entry.live(Instant::now()));
        count(found, &self.counters.member_hits, &self.counters.member_misses)
    }

    fn set_member(&self, guild_id: &str, member: Member) {
        let Some(user_id) = member.user_id().map(str::to_string) else {
            return;
        };
        let entry = self.entry(member);
        self.state
            .write()
            .members
            .entry(guild_id.to_string())
            .or_default()
            .insert(user_id, entry);
    }

    fn remove_member(&self, guild_id: &str, user_id: &str) {
        let mut state = self.state.write();
        if let Some(members) = state.members.get_mut(guild_id) {
            members.remove(user_id);
            if members.is_empty() {
                state.members.remove(guild_id);
            }
        }
    }

    fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            guild_hits: c.guild_hits.load(Ordering::Relaxed),
            guild_misses: c.guild_misses.load(Ordering::Relaxed),
            channel_hits: c.channel_hits.load(Ordering::Relaxed),
            channel_misses: c.channel_misses.load(Ordering::Relaxed),
            member_hits: c.member_hits.load(Ordering::Relaxed),
            member_misses: c.member_misses.load(Ordering::Relaxed),
        }
    }
}
