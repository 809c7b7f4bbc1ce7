//! Test helpers for integration tests
//!
//! [`MockGateway`] accepts real WebSocket connections and hands each one to
//! the test as a [`GatewaySession`] the test scripts by hand. [`MockRest`]
//! serves `/gateway/bot`, optionally rate limiting the first requests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use cord_gateway::{OpCode, Payload};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// How long a helper waits for the SDK before failing the test
pub const WAIT: Duration = Duration::from_secs(5);

/// Bot token every test uses
pub const TEST_TOKEN: &str = "integration-token";

async fn serve(app: Router) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok((addr, handle))
}

/// WebSocket server standing in for the Discord gateway
pub struct MockGateway {
    pub addr: SocketAddr,
    sessions: mpsc::UnboundedReceiver<GatewaySession>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Result<Self> {
        let (tx, sessions) = mpsc::unbounded_channel();
        let app = Router::new().route("/", get(gateway_handler)).with_state(tx);
        let (addr, handle) = serve(app).await?;

        Ok(Self {
            addr,
            sessions,
            _handle: handle,
        })
    }

    /// Gateway URL in the shape Discord hands out
    pub fn url(&self) -> String {
        format!("ws://{}/?v=10&encoding=json", self.addr)
    }

    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Result<GatewaySession> {
        timeout(WAIT, self.sessions.recv())
            .await?
            .ok_or_else(|| anyhow!("mock gateway stopped"))
    }

    /// Accept a connection, say Hello, and wait for its Identify
    pub async fn accept_identified(
        &mut self,
        heartbeat: Duration,
    ) -> Result<(GatewaySession, Payload)> {
        let mut session = self.accept().await?;
        session.hello(heartbeat)?;
        let identify = session.expect_op(OpCode::Identify).await?;
        Ok((session, identify))
    }
}

type SessionSender = mpsc::UnboundedSender<GatewaySession>;

async fn gateway_handler(
    State(sessions): State<SessionSender>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, query.unwrap_or_default(), sessions))
}

async fn handle_socket(socket: WebSocket, query: String, sessions: SessionSender) {
    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
    let (incoming_tx, incoming) = mpsc::unbounded_channel::<Payload>();
    let session = GatewaySession {
        query,
        outgoing,
        incoming,
    };
    if sessions.send(session).is_err() {
        return;
    }

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            message = outgoing_rx.recv() => match message {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if sink.send(message).await.is_err() || closing {
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(payload) = Payload::from_json(&text) {
                        let _ = incoming_tx.send(payload);
                    }
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// One client connection on the [`MockGateway`]
pub struct GatewaySession {
    query: String,
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: mpsc::UnboundedReceiver<Payload>,
}

impl GatewaySession {
    /// Raw query string the client dialed with
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn send(&self, payload: &Payload) -> Result<()> {
        let text = payload.to_json()?;
        self.outgoing
            .send(Message::Text(text.into()))
            .map_err(|_| anyhow!("gateway session closed"))
    }

    pub fn hello(&self, heartbeat: Duration) -> Result<()> {
        self.send(&Payload::hello(heartbeat))
    }

    pub fn ready(&self, session_id: &str, sequence: u64) -> Result<()> {
        self.send(&Payload::dispatch(
            "READY",
            sequence,
            json!({
                "v": 10,
                "user": {"id": "1", "username": "cord-test", "bot": true},
                "guilds": [{"id": "100", "unavailable": true}],
                "session_id": session_id,
                "resume_gateway_url": "wss://resume.example",
            }),
        ))
    }

    /// Close the socket with a gateway close code
    pub fn close(&self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        self.outgoing
            .send(Message::Close(Some(frame)))
            .map_err(|_| anyhow!("gateway session closed"))
    }

    /// Next payload from the client, `None` once the socket is gone
    pub async fn recv(&mut self) -> Result<Option<Payload>> {
        Ok(timeout(WAIT, self.incoming.recv()).await?)
    }

    /// Skip payloads until one with `op` arrives
    pub async fn expect_op(&mut self, op: OpCode) -> Result<Payload> {
        loop {
            match self.recv().await? {
                Some(payload) if payload.op == op => return Ok(payload),
                Some(_) => {}
                None => return Err(anyhow!("socket closed while waiting for {op}")),
            }
        }
    }

    /// Wait for the client to drop the socket
    pub async fn expect_closed(&mut self) -> Result<()> {
        while self.recv().await?.is_some() {}
        Ok(())
    }
}

/// REST server answering `GET /gateway/bot`
pub struct MockRest {
    pub addr: SocketAddr,
    state: Arc<RestState>,
    _handle: JoinHandle<()>,
}

struct RestState {
    gateway_url: String,
    shards: u32,
    rate_limited: AtomicU32,
    hits: AtomicU32,
}

impl MockRest {
    /// Serve `shards` as the recommendation, rate limiting the first
    /// `rate_limited` requests
    pub async fn start(gateway_url: impl Into<String>, shards: u32, rate_limited: u32) -> Result<Self> {
        let state = Arc::new(RestState {
            gateway_url: gateway_url.into(),
            shards,
            rate_limited: AtomicU32::new(rate_limited),
            hits: AtomicU32::new(0),
        });
        let app = Router::new()
            .route("/gateway/bot", get(gateway_bot))
            .with_state(Arc::clone(&state));
        let (addr, handle) = serve(app).await?;

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests served so far
    pub fn hits(&self) -> u32 {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn gateway_bot(State(state): State<Arc<RestState>>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let limited = state
        .rate_limited
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if limited {
        let body = json!({
            "message": "You are being rate limited.",
            "retry_after": 0.01,
            "global": false,
        });
        return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    }

    let body = json!({
        "url": state.gateway_url,
        "shards": state.shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": 999,
            "reset_after": 14_400_000,
            "max_concurrency": 1,
        },
    });
    (
        [
            ("X-RateLimit-Limit", "5"),
            ("X-RateLimit-Remaining", "4"),
            ("X-RateLimit-Reset-After", "5"),
            ("X-RateLimit-Bucket", "gateway-bot"),
        ],
        Json(body),
    )
        .into_response()
}
