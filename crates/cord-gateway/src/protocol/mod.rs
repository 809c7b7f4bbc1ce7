//! Gateway wire protocol
//!
//! Op codes, the `{op, d, s, t}` envelope, command payloads, intents and
//! close codes.

mod close_codes;
mod intents;
mod opcodes;
mod payload;
mod payloads;

pub use close_codes::CloseCode;
pub use intents::Intents;
pub use opcodes::OpCode;
pub use payload::Payload;
pub use payloads::{
    Activity, ActivityType, HelloPayload, IdentifyPayload, IdentifyProperties,
    PresenceUpdatePayload, RequestGuildMembersPayload, ResumePayload,
};
