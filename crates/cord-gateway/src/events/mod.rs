//! Gateway events
//!
//! Typed views of the dispatch payloads this crate understands. Fields the
//! models do not name are kept in `extra`.

mod event;
mod event_types;
mod models;

pub use event::GatewayEvent;
pub use event_types::EventType;
pub use models::{
    Channel, Guild, Interaction, Member, Message, MessageDelete, ReadyEvent, UnavailableGuild,
    User,
};
