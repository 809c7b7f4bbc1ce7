//! Gateway client
//!
//! Runs the identify handshake and reacts to server op codes on top of a
//! [`Connection`](crate::connection::Connection).

mod client;

pub use client::{GatewayClient, GatewayClientBuilder, ReconnectStatus};
