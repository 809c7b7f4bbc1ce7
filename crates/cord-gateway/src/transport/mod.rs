//! Gateway transport seam
//!
//! A [`Transport`] moves text frames over one established socket; a
//! [`Dialer`] opens new ones. The connection layer only sees these traits,
//! so tests can swap the WebSocket stack for the in-memory pair in
//! [`memory`].

pub mod memory;
mod websocket;

pub use websocket::{WebSocketDialer, WebSocketTransport};

use crate::protocol::CloseCode;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The peer closed the socket, or it was closed locally
    #[error("connection closed ({}): {reason}", display_code(*.code))]
    Closed { code: Option<u16>, reason: String },

    #[error("io error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

fn display_code(code: Option<u16>) -> String {
    match code.and_then(CloseCode::from_u16) {
        Some(known) => known.to_string(),
        None => code.map_or_else(|| "no code".to_string(), |c| c.to_string()),
    }
}

impl TransportError {
    pub(crate) fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Closed {
            code,
            reason: reason.into(),
        }
    }

    /// Gateway close code carried by a close frame, when recognised
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Closed { code, .. } => code.and_then(CloseCode::from_u16),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// One open gateway socket carrying JSON text frames
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, text: String) -> Result<(), TransportError>;

    /// Wait for the next text frame. Control frames are handled internally;
    /// a close frame surfaces as [`TransportError::Closed`].
    async fn receive(&self) -> Result<String, TransportError>;

    /// Close the socket. Closing an already closed socket succeeds.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens gateway sockets
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_display() {
        let err = TransportError::closed(Some(4004), "bad token");
        assert_eq!(
            err.to_string(),
            "connection closed (Authentication failed (4004)): bad token"
        );
        assert_eq!(err.close_code(), Some(CloseCode::AuthenticationFailed));

        let err = TransportError::closed(None, "stream ended");
        assert_eq!(err.to_string(), "connection closed (no code): stream ended");
        assert_eq!(err.close_code(), None);
    }

    #[test]
    fn test_unknown_close_code_kept() {
        let err = TransportError::closed(Some(1000), "");
        assert!(err.is_closed());
        assert_eq!(err.close_code(), None);
        assert!(err.to_string().contains("1000"));
    }
}
