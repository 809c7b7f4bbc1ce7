//! Decoded dispatch events

use super::models::{Guild, Interaction, Message, MessageDelete, ReadyEvent, UnavailableGuild};
use super::EventType;
use serde_json::Value;

/// A dispatch the client knows how to decode
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Ready(ReadyEvent),
    Resumed,
    MessageCreate(Message),
    MessageUpdate(Message),
    MessageDelete(MessageDelete),
    GuildCreate(Guild),
    GuildUpdate(Guild),
    GuildDelete(UnavailableGuild),
    InteractionCreate(Interaction),
}

impl GatewayEvent {
    /// Decode the `d` of a dispatch named `name`
    ///
    /// Returns `Ok(None)` for event names without a typed model, and an
    /// error when a known event carries a malformed body.
    pub fn decode(name: &str, d: Value) -> Result<Option<Self>, serde_json::Error> {
        let Some(event_type) = EventType::from_name(name) else {
            return Ok(None);
        };

        let event = match event_type {
            EventType::Ready => Self::Ready(serde_json::from_value(d)?),
            EventType::Resumed => Self::Resumed,
            EventType::MessageCreate => Self::MessageCreate(serde_json::from_value(d)?),
            EventType::MessageUpdate => Self::MessageUpdate(serde_json::from_value(d)?),
            EventType::MessageDelete => Self::MessageDelete(serde_json::from_value(d)?),
            EventType::GuildCreate => Self::GuildCreate(serde_json::from_value(d)?),
            EventType::GuildUpdate => Self::GuildUpdate(serde_json::from_value(d)?),
            EventType::GuildDelete => Self::GuildDelete(serde_json::from_value(d)?),
            EventType::InteractionCreate => Self::InteractionCreate(serde_json::from_value(d)?),
        };
        Ok(Some(event))
    }

    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Ready(_) => EventType::Ready,
            Self::Resumed => EventType::Resumed,
            Self::MessageCreate(_) => EventType::MessageCreate,
            Self::MessageUpdate(_) => EventType::MessageUpdate,
            Self::MessageDelete(_) => EventType::MessageDelete,
            Self::GuildCreate(_) => EventType::GuildCreate,
            Self::GuildUpdate(_) => EventType::GuildUpdate,
            Self::GuildDelete(_) => EventType::GuildDelete,
            Self::InteractionCreate(_) => EventType::InteractionCreate,
        }
    }

    /// Session id of a READY event
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Ready(ready) if !ready.session_id.is_empty() => Some(&ready.session_id),
            _ => None,
        }
    }
}
