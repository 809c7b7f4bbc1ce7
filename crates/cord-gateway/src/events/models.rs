//! Dispatch payload models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

/// READY: the session has been established
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Gateway version
    #[serde(default)]
    pub v: u8,
    pub user: User,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    pub session_id: String,
    /// URL to use when resuming this session
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: String,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub unavailable: bool,
    /// Only present on GUILD_CREATE
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// Only present on GUILD_CREATE, and limited by intents
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Guild member. `user` is absent in some partial payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Member {
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.id.as_str())
    }
}

/// MESSAGE_CREATE and MESSAGE_UPDATE. Updates may be partial, so
/// everything except the ids is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Whether the message was sent by a bot account
    #[must_use]
    pub fn is_from_bot(&self) -> bool {
        self.author.as_ref().is_some_and(|author| author.bot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelete {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub application_id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    /// Continuation token for responding to the interaction
    pub token: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_keeps_unknown_fields() {
        let message: Message = serde_json::from_value(json!({
            "id": "10",
            "channel_id": "20",
            "content": "hi",
            "author": {"id": "30", "username": "ferris", "bot": true},
            "timestamp": "2024-05-01T12:00:00.000000+00:00",
            "pinned": false,
        }))
        .unwrap();

        assert!(message.is_from_bot());
        assert_eq!(message.extra.get("pinned"), Some(&json!(false)));
        assert!(message.timestamp.is_some());
        assert_eq!(message.edited_timestamp, None);
    }

    #[test]
    fn test_partial_message_update() {
        let message: Message =
            serde_json::from_value(json!({"id": "10", "channel_id": "20"})).unwrap();
        assert!(message.content.is_empty());
        assert!(!message.is_from_bot());
    }

    #[test]
    fn test_guild_create_carries_channels_and_members() {
        let guild: Guild = serde_json::from_value(json!({
            "id": "1",
            "name": "rustaceans",
            "channels": [{"id": "2", "type": 0, "name": "general"}],
            "members": [
                {"user": {"id": "3", "username": "ferris"}, "nick": "crab", "roles": ["9"]},
                {"nick": "ghost"},
            ],
            "large": false,
        }))
        .unwrap();

        assert_eq!(guild.channels[0].name.as_deref(), Some("general"));
        assert_eq!(guild.members[0].user_id(), Some("3"));
        assert_eq!(guild.members[1].user_id(), None);
        assert_eq!(guild.extra.get("large"), Some(&json!(false)));
        assert!(!guild.extra.contains_key("channels"));
    }
}
