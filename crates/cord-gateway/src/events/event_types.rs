//! Dispatch event names

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event names carried in the `t` field of dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Sent after a successful Identify
    Ready,
    /// Sent after a successful Resume
    Resumed,

    MessageCreate,
    MessageUpdate,
    MessageDelete,

    /// Guild became available, was joined or created
    GuildCreate,
    GuildUpdate,
    /// Guild left, became unavailable or was deleted
    GuildDelete,

    InteractionCreate,
}

impl EventType {
    pub const ALL: [Self; 9] = [
        Self::Ready,
        Self::Resumed,
        Self::MessageCreate,
        Self::MessageUpdate,
        Self::MessageDelete,
        Self::GuildCreate,
        Self::GuildUpdate,
        Self::GuildDelete,
        Self::InteractionCreate,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Resumed => "RESUMED",
            Self::MessageCreate => "MESSAGE_CREATE",
            Self::MessageUpdate => "MESSAGE_UPDATE",
            Self::MessageDelete => "MESSAGE_DELETE",
            Self::GuildCreate => "GUILD_CREATE",
            Self::GuildUpdate => "GUILD_UPDATE",
            Self::GuildDelete => "GUILD_DELETE",
            Self::InteractionCreate => "INTERACTION_CREATE",
        }
    }

    /// Look up an event name; `None` for events without a typed model
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
