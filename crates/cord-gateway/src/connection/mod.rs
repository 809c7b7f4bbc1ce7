//! Gateway connection
//!
//! One socket at a time, plus the session state that outlives it.

mod connection;
mod heartbeat;

pub use connection::{Connection, ConnectionBuilder, ConnectionState};
