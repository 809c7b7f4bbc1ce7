//! In-memory transport
//!
//! [`MemoryDialer`] hands every dialed socket's server end to a
//! [`MemoryListener`], so tests can script the gateway side of a session
//! and observe every frame the client writes.

use super::{Dialer, Transport, TransportError};
use crate::protocol::{OpCode, Payload};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

enum Frame {
    Text(String),
    Close(Option<u16>, String),
}

#[derive(Debug)]
pub struct MemoryDialer {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    dialed: Mutex<Vec<String>>,
    refuse: AtomicUsize,
}

impl MemoryDialer {
    #[must_use]
    pub fn new() -> (Self, MemoryListener) {
        let (peers, incoming) = mpsc::unbounded_channel();
        let dialer = Self {
            peers,
            dialed: Mutex::new(Vec::new()),
            refuse: AtomicUsize::new(0),
        };
        (dialer, MemoryListener { incoming })
    }

    /// Refuse the next `count` dial attempts
    pub fn refuse_next(&self, count: usize) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Every URL dialed so far, in order
    #[must_use]
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError> {
        self.dialed.lock().push(url.to_string());

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            from_client,
            to_client,
        };
        self.peers.send(peer).map_err(|_| TransportError::Connect {
            url: url.to_string(),
            reason: "listener dropped".to_string(),
        })?;

        Ok(Arc::new(MemoryTransport {
            to_peer: Mutex::new(Some(to_peer)),
            from_peer: tokio::sync::Mutex::new(from_peer),
            closed: CancellationToken::new(),
        }))
    }
}

/// Receives the server end of each dialed socket
#[derive(Debug)]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }
}

/// Server end of one in-memory socket
pub struct MemoryPeer {
    url: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Frame>,
}

impl MemoryPeer {
    /// URL the client dialed
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Queue a payload for the client. Returns false once the client is gone.
    pub fn send(&self, payload: &Payload) -> bool {
        payload
            .to_json()
            .is_ok_and(|text| self.send_text(text))
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Frame::Text(text.into())).is_ok()
    }

    /// Close the socket from the server side
    pub fn close(&self, code: Option<u16>, reason: impl Into<String>) {
        let _ = self.to_client.send(Frame::Close(code, reason.into()));
    }

    /// Next payload written by the client; `None` once the client closed.
    /// Frames that are not valid payloads are skipped.
    pub async fn recv(&mut self) -> Option<Payload> {
        loop {
            let text = self.from_client.recv().await?;
            if let Ok(payload) = Payload::from_json(&text) {
                return Some(payload);
            }
        }
    }

    /// Payload already written by the client, without waiting
    pub fn try_recv(&mut self) -> Option<Payload> {
        while let Ok(text) = self.from_client.try_recv() {
            if let Ok(payload) = Payload::from_json(&text) {
                return Some(payload);
            }
        }
        None
    }

    /// Next payload with the given op code, skipping any others
    pub async fn recv_op(&mut self, op: OpCode) -> Option<Payload> {
        loop {
            let payload = self.recv().await?;
            if payload.op == op {
                return Some(payload);
            }
        }
    }
}

impl std::fmt::Debug for MemoryPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPeer").field("url", &self.url).finish()
    }
}

/// Client end of one in-memory socket
pub struct MemoryTransport {
    to_peer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    from_peer: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    closed: CancellationToken,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        let to_peer = self
            .to_peer
            .lock()
            .clone()
            .ok_or_else(|| TransportError::closed(None, "closed locally"))?;
        to_peer
            .send(text)
            .map_err(|_| TransportError::closed(None, "peer dropped"))
    }

    async fn receive(&self) -> Result<String, TransportError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::closed(None, "closed locally")),
            frame = async { self.from_peer.lock().await.recv().await } => match frame {
                Some(Frame::Text(text)) => Ok(text),
                Some(Frame::Close(code, reason)) => Err(TransportError::closed(code, reason)),
                None => Err(TransportError::closed(None, "peer dropped")),
            },
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        self.to_peer.lock().take();
        Ok(())
    }
}
