//! Gateway connection
//!
//! Owns one socket at a time plus the session state that survives
//! reconnects: last sequence, session id, heartbeat interval. All writes go
//! through a single writer lock so heartbeats and commands never interleave.

use super::heartbeat::HeartbeatTask;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{OpCode, Payload, ResumePayload};
use crate::transport::{Dialer, Transport, WebSocketDialer};
use cord_common::{ValidationError, DEFAULT_GATEWAY_URL, DEFAULT_HEARTBEAT_INTERVAL_MS};
use parking_lot::{Mutex, RwLock};
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Span};

/// Socket lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open and heartbeating
    Connected,
    Disconnecting,
}

/// Handle to a gateway connection. Clones share the same socket and session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    token: String,
    gateway_url: String,
    dialer: Arc<dyn Dialer>,
    socket: RwLock<Option<Arc<dyn Transport>>>,
    /// Serializes socket writes
    writer: tokio::sync::Mutex<()>,
    /// Serializes connect and close
    lifecycle: tokio::sync::Mutex<()>,
    session: Mutex<Session>,
    heartbeat: tokio::sync::Mutex<Option<HeartbeatTask>>,
    span: Span,
}

struct Session {
    status: ConnectionState,
    sequence: u64,
    session_id: Option<String>,
    heartbeat_interval: Duration,
    /// Cancelled when the current socket is closed
    lifetime: Option<CancellationToken>,
    /// Bumped on every successful connect
    generation: u64,
    last_heartbeat: Option<Instant>,
    latency: Option<Duration>,
}

impl Connection {
    pub fn builder(token: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(token)
    }

    /// Dial the gateway and start heartbeating at the current interval
    ///
    /// The heartbeat lives until [`close`](Self::close) or until `cancel`
    /// fires.
    pub async fn connect(&self, cancel: &CancellationToken) -> GatewayResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.socket.read().is_some() {
            return Err(GatewayError::AlreadyConnected);
        }

        self.set_status(ConnectionState::Connecting);
        let dialed = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(GatewayError::Cancelled),
            result = self.inner.dialer.dial(&self.inner.gateway_url) => result.map_err(GatewayError::from),
        };
        let socket = match dialed {
            Ok(socket) => socket,
            Err(e) => {
                self.set_status(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        *self.inner.socket.write() = Some(socket);

        let lifetime = cancel.child_token();
        let interval = {
            let mut session = self.inner.session.lock();
            session.status = ConnectionState::Connected;
            session.generation += 1;
            session.lifetime = Some(lifetime.clone());
            session.heartbeat_interval
        };
        self.replace_heartbeat(interval, &lifetime).await;

        info!(url = %self.inner.gateway_url, "Gateway connected");
        Ok(())
    }

    /// Stop heartbeating and close the socket. Closing twice is a no-op.
    pub async fn close(&self) -> GatewayResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let lifetime = self.inner.session.lock().lifetime.take();
        if let Some(lifetime) = lifetime {
            lifetime.cancel();
        }
        let heartbeat = self.inner.heartbeat.lock().await.take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }

        let socket = self.inner.socket.write().take();
        let Some(socket) = socket else {
            self.set_status(ConnectionState::Disconnected);
            return Ok(());
        };

        self.set_status(ConnectionState::Disconnecting);
        let result = {
            let _writer = self.inner.writer.lock().await;
            socket.close().await
        };
        self.set_status(ConnectionState::Disconnected);
        info!("Gateway connection closed");

        result.map_err(GatewayError::from)
    }

    pub async fn send(&self, payload: &Payload) -> GatewayResult<()> {
        let text = payload.to_json()?;
        let socket = self.socket()?;

        let _writer = self.inner.writer.lock().await;
        socket.send(text).await?;
        trace!(op = %payload.op, "Payload sent");
        Ok(())
    }

    /// Read one payload, recording its sequence number when it carries one
    ///
    /// The stored sequence only moves forward within a session.
    pub async fn receive(&self, cancel: &CancellationToken) -> GatewayResult<Payload> {
        let socket = self.socket()?;
        let text = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(GatewayError::Cancelled),
            result = socket.receive() => result?,
        };
        let payload = Payload::from_json(&text)?;

        let mut session = self.inner.session.lock();
        if let Some(sequence) = payload.s.filter(|s| *s > 0) {
            session.sequence = session.sequence.max(sequence);
        }
        if payload.op == OpCode::HeartbeatAck {
            if let Some(sent) = session.last_heartbeat {
                session.latency = Some(sent.elapsed());
            }
        }
        drop(session);

        trace!(op = %payload.op, "Payload received");
        Ok(payload)
    }

    /// Send a heartbeat carrying the last sequence now
    pub async fn send_heartbeat(&self) -> GatewayResult<()> {
        self.send(&Payload::heartbeat(self.sequence())).await?;
        self.inner.session.lock().last_heartbeat = Some(Instant::now());
        Ok(())
    }

    /// Replace the heartbeat task with one running at `interval`
    pub async fn restart_heartbeat(&self, interval: Duration) -> GatewayResult<()> {
        if interval.is_zero() {
            return Err(ValidationError::new("heartbeat_interval", "must be positive").into());
        }

        let lifetime = {
            let mut session = self.inner.session.lock();
            session.heartbeat_interval = interval;
            session.lifetime.clone()
        };
        let lifetime = lifetime.ok_or(GatewayError::NotConnected)?;

        self.replace_heartbeat(interval, &lifetime).await;
        debug!(interval_ms = interval.as_millis() as u64, "Heartbeat restarted");
        Ok(())
    }

    /// Reattach to the stored session
    pub async fn resume(&self) -> GatewayResult<()> {
        let (session_id, seq) = {
            let session = self.inner.session.lock();
            (session.session_id.clone(), session.sequence)
        };
        let session_id = session_id.ok_or(GatewayError::SessionRequired)?;

        let body = ResumePayload {
            token: self.inner.token.clone(),
            session_id,
            seq,
        };
        self.send(&Payload::command(OpCode::Resume, &body)?).await?;
        info!(seq, "Resume sent");
        Ok(())
    }

    /// Close, reopen, and resume when a session exists
    pub async fn reconnect(&self, cancel: &CancellationToken) -> GatewayResult<()> {
        if let Err(e) = self.close().await {
            warn!(error = %e, "Error closing socket before reconnect");
        }
        self.connect(cancel).await?;
        if self.session_id().is_some() {
            self.resume().await?;
        }
        Ok(())
    }

    pub fn sequence(&self) -> u64 {
        self.inner.session.lock().sequence
    }

    pub fn set_sequence(&self, sequence: u64) {
        self.inner.session.lock().sequence = sequence;
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.session.lock().session_id.clone()
    }

    /// Store the session id to resume with. An empty id clears it.
    pub fn set_session(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        self.inner.session.lock().session_id = (!session_id.is_empty()).then_some(session_id);
    }

    /// Forget the session id and its sequence
    pub fn clear_session(&self) {
        let mut session = self.inner.session.lock();
        session.session_id = None;
        session.sequence = 0;
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.inner.session.lock().heartbeat_interval
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        self.inner.session.lock().latency
    }

    pub fn is_connected(&self) -> bool {
        self.inner.socket.read().is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().status
    }

    /// Number of successful connects so far; changes whenever the socket is replaced
    pub fn generation(&self) -> u64 {
        self.inner.session.lock().generation
    }

    pub fn gateway_url(&self) -> &str {
        &self.inner.gateway_url
    }

    pub(crate) fn token(&self) -> &str {
        &self.inner.token
    }

    fn socket(&self) -> GatewayResult<Arc<dyn Transport>> {
        self.inner
            .socket
            .read()
            .clone()
            .ok_or(GatewayError::NotConnected)
    }

    fn set_status(&self, status: ConnectionState) {
        self.inner.session.lock().status = status;
    }

    async fn replace_heartbeat(&self, interval: Duration, lifetime: &CancellationToken) {
        let mut slot = self.inner.heartbeat.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }

        let weak = Arc::downgrade(&self.inner);
        *slot = Some(HeartbeatTask::spawn(
            interval,
            lifetime,
            self.inner.span.clone(),
            move || beat(weak.clone()),
        ));
    }
}

async fn beat(weak: Weak<Inner>) -> ControlFlow<()> {
    let Some(inner) = weak.upgrade() else {
        return ControlFlow::Break(());
    };
    let connection = Connection { inner };
    if let Err(e) = connection.send_heartbeat().await {
        warn!(error = %e, "Heartbeat failed");
    }
    ControlFlow::Continue(())
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.session.lock();
        f.debug_struct("Connection")
            .field("gateway_url", &self.inner.gateway_url)
            .field("state", &session.status)
            .field("sequence", &session.sequence)
            .field("has_session", &session.session_id.is_some())
            .finish()
    }
}

/// Builder for [`Connection`]
pub struct ConnectionBuilder {
    token: String,
    gateway_url: String,
    dialer: Option<Arc<dyn Dialer>>,
    heartbeat_interval: Duration,
    span: Option<Span>,
}

impl ConnectionBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            dialer: None,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            span: None,
        }
    }

    #[must_use]
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    #[must_use]
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Interval used until the server's hello overrides it
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.heartbeat_interval = interval;
        }
        self
    }

    /// Span that heartbeat and connection logs are recorded under
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> GatewayResult<Connection> {
        if self.token.trim().is_empty() {
            return Err(GatewayError::TokenRequired);
        }

        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("gateway_connection"));
        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(WebSocketDialer::new()));

        Ok(Connection {
            inner: Arc::new(Inner {
                token: self.token,
                gateway_url: self.gateway_url,
                dialer,
                socket: RwLock::new(None),
                writer: tokio::sync::Mutex::new(()),
                lifecycle: tokio::sync::Mutex::new(()),
                session: Mutex::new(Session {
                    status: ConnectionState::Disconnected,
                    sequence: 0,
                    session_id: None,
                    heartbeat_interval: self.heartbeat_interval,
                    lifetime: None,
                    generation: 0,
                    last_heartbeat: None,
                    latency: None,
                }),
                heartbeat: tokio::sync::Mutex::new(None),
                span,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryDialer, MemoryListener, MemoryPeer};
    use serde_json::json;
    use tokio::time::{sleep, timeout};

    const WAIT: Duration = Duration::from_secs(5);

    fn memory_connection() -> (Connection, Arc<MemoryDialer>, MemoryListener) {
        let (dialer, listener) = MemoryDialer::new();
        let dialer = Arc::new(dialer);
        let connection = Connection::builder("test-token")
            .gateway_url("memory://gateway")
            .dialer(dialer.clone())
            .heartbeat_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        (connection, dialer, listener)
    }

    async fn connected() -> (Connection, MemoryPeer, MemoryListener, CancellationToken) {
        let (connection, _dialer, mut listener) = memory_connection();
        let cancel = CancellationToken::new();
        connection.connect(&cancel).await.unwrap();
        let peer = listener.accept().await.unwrap();
        (connection, peer, listener, cancel)
    }

    #[test]
    fn test_build_requires_token() {
        assert!(matches!(
            Connection::builder("  ").build(),
            Err(GatewayError::TokenRequired)
        ));
    }

    #[tokio::test]
    async fn test_connect_twice_fails() {
        let (connection, _peer, _listener, cancel) = connected().await;
        assert!(connection.is_connected());
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(connection.generation(), 1);

        let err = connection.connect(&cancel).await.unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyConnected));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let (connection, dialer, _listener) = memory_connection();
        dialer.refuse_next(1);

        let err = connection
            .connect(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert!(!connection.is_connected());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_cancelled() {
        let (connection, _dialer, _listener) = memory_connection();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = connection.connect(&cancel).await.unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connection, mut peer, _listener, _cancel) = connected().await;

        connection.close().await.unwrap();
        connection.close().await.unwrap();

        assert!(!connection.is_connected());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            connection.send(&Payload::heartbeat(0)).await,
            Err(GatewayError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_close_without_connect() {
        let (connection, _dialer, _listener) = memory_connection();
        connection.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_interval_drives_heartbeat_with_sequence() {
        let (connection, mut peer, _listener, cancel) = connected().await;

        peer.send(&Payload::dispatch("RESUMED", 7, serde_json::Value::Null));
        peer.send(&Payload::hello(Duration::from_millis(50)));

        let dispatch = connection.receive(&cancel).await.unwrap();
        assert_eq!(dispatch.op, OpCode::Dispatch);
        assert_eq!(connection.sequence(), 7);

        let hello = connection.receive(&cancel).await.unwrap();
        let interval = hello.hello_interval().unwrap();
        connection.restart_heartbeat(interval).await.unwrap();
        assert_eq!(connection.heartbeat_interval(), Duration::from_millis(50));

        let heartbeat = timeout(Duration::from_millis(100), peer.recv_op(OpCode::Heartbeat))
            .await
            .expect("heartbeat within two intervals")
            .unwrap();
        assert_eq!(heartbeat.d, json!(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_single_heartbeat_task() {
        let (connection, mut peer, _listener, _cancel) = connected().await;

        connection
            .restart_heartbeat(Duration::from_millis(50))
            .await
            .unwrap();
        connection
            .restart_heartbeat(Duration::from_millis(50))
            .await
            .unwrap();
        sleep(Duration::from_millis(120)).await;

        let mut beats = 0;
        while let Some(payload) = peer.try_recv() {
            assert_eq!(payload.op, OpCode::Heartbeat);
            assert_eq!(payload.d, serde_json::Value::Null);
            beats += 1;
        }
        assert_eq!(beats, 2);
    }

    #[tokio::test]
    async fn test_restart_requires_connection() {
        let (connection, _dialer, _listener) = memory_connection();
        assert!(matches!(
            connection.restart_heartbeat(Duration::from_millis(10)).await,
            Err(GatewayError::NotConnected)
        ));
        assert!(matches!(
            connection.restart_heartbeat(Duration::ZERO).await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_payload() {
        let (connection, mut peer, _listener, _cancel) = connected().await;
        connection.set_session("s1");
        connection.set_sequence(7);

        connection.resume().await.unwrap();

        let resume = timeout(WAIT, peer.recv_op(OpCode::Resume))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resume.d["session_id"], "s1");
        assert_eq!(resume.d["seq"], 7);
        assert_eq!(resume.d["token"], "test-token");
    }

    #[tokio::test]
    async fn test_resume_requires_session() {
        let (connection, _peer, _listener, _cancel) = connected().await;
        connection.set_session("");
        assert!(matches!(
            connection.resume().await,
            Err(GatewayError::SessionRequired)
        ));
    }

    #[tokio::test]
    async fn test_receive_keeps_sequence_without_s() {
        let (connection, peer, _listener, cancel) = connected().await;
        connection.set_sequence(4);

        peer.send(&Payload::heartbeat_ack());
        peer.send(&Payload::dispatch("RESUMED", 0, serde_json::Value::Null));
        connection.receive(&cancel).await.unwrap();
        connection.receive(&cancel).await.unwrap();

        assert_eq!(connection.sequence(), 4);
    }

    #[tokio::test]
    async fn test_receive_ignores_out_of_order_sequence() {
        let (connection, peer, _listener, cancel) = connected().await;

        peer.send(&Payload::dispatch("MESSAGE_CREATE", 9, serde_json::json!({})));
        peer.send(&Payload::dispatch("MESSAGE_CREATE", 7, serde_json::json!({})));
        peer.send(&Payload::dispatch("MESSAGE_CREATE", 10, serde_json::json!({})));

        connection.receive(&cancel).await.unwrap();
        connection.receive(&cancel).await.unwrap();
        assert_eq!(connection.sequence(), 9);

        connection.receive(&cancel).await.unwrap();
        assert_eq!(connection.sequence(), 10);
    }

    #[tokio::test]
    async fn test_receive_cancelled() {
        let (connection, _peer, _listener, cancel) = connected().await;
        let reader = {
            let connection = connection.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { connection.receive(&cancel).await })
        };

        cancel.cancel();
        let result = timeout(WAIT, reader).await.unwrap().unwrap();
        assert!(matches!(result, Err(GatewayError::Cancelled)));
    }

    #[tokio::test]
    async fn test_receive_surfaces_close_frame() {
        let (connection, peer, _listener, cancel) = connected().await;
        peer.close(Some(4004), "Authentication failed");

        let err = connection.receive(&cancel).await.unwrap_err();
        let GatewayError::Transport(transport) = err else {
            panic!("expected a transport error");
        };
        assert_eq!(
            transport.close_code(),
            Some(crate::protocol::CloseCode::AuthenticationFailed)
        );
    }

    #[tokio::test]
    async fn test_latency_recorded_on_ack() {
        let (connection, mut peer, _listener, cancel) = connected().await;
        assert_eq!(connection.latency(), None);

        connection.send_heartbeat().await.unwrap();
        peer.recv_op(OpCode::Heartbeat).await.unwrap();
        peer.send(&Payload::heartbeat_ack());
        connection.receive(&cancel).await.unwrap();

        assert!(connection.latency().is_some());
    }

    #[tokio::test]
    async fn test_reconnect_resumes_session() {
        let (connection, mut old_peer, mut listener, cancel) = connected().await;
        connection.set_session("abc");
        connection.set_sequence(12);

        connection.reconnect(&cancel).await.unwrap();

        assert!(old_peer.recv().await.is_none());
        let mut new_peer = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let resume = timeout(WAIT, new_peer.recv_op(OpCode::Resume))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resume.d["session_id"], "abc");
        assert_eq!(resume.d["seq"], 12);
        assert_eq!(connection.generation(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_without_session_skips_resume() {
        let (connection, _old_peer, mut listener, cancel) = connected().await;

        connection.reconnect(&cancel).await.unwrap();

        let mut new_peer = listener.accept().await.unwrap();
        connection.close().await.unwrap();
        assert!(new_peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_token_stops_heartbeat() {
        let (connection, mut peer, _listener, cancel) = connected().await;
        connection
            .restart_heartbeat(Duration::from_millis(10))
            .await
            .unwrap();
        timeout(WAIT, peer.recv_op(OpCode::Heartbeat))
            .await
            .unwrap()
            .unwrap();

        cancel.cancel();
        sleep(Duration::from_millis(30)).await;
        while peer.try_recv().is_some() {}
        sleep(Duration::from_millis(50)).await;
        assert!(peer.try_recv().is_none());
    }
}
