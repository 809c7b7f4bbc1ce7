//! WebSocket transport over tokio-tungstenite

use super::{Dialer, Transport, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Self::closed(None, "connection already closed")
            }
            WsError::Io(e) => Self::Io(e.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Dials gateway URLs with tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketDialer {
    user_agent: String,
}

impl WebSocketDialer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_agent: cord_rest::USER_AGENT.to_string(),
        }
    }

    #[must_use]
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl Default for WebSocketDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let connect_error = |reason: String| TransportError::Connect {
            url: url.to_string(),
            reason,
        };

        let mut request = url
            .into_client_request()
            .map_err(|e| connect_error(e.to_string()))?;
        let user_agent =
            HeaderValue::from_str(&self.user_agent).map_err(|e| connect_error(e.to_string()))?;
        request.headers_mut().insert(header::USER_AGENT, user_agent);

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        Ok(Arc::new(WebSocketTransport::new(stream)))
    }
}

/// An open WebSocket, split so reads and writes do not block each other
pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketTransport {
    fn new(stream: WsStream) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.sink.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(text),
                    Err(_) => warn!("Discarding non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((None, String::new()), |frame| {
                        (Some(u16::from(frame.code)), frame.reason.into_owned())
                    });
                    return Err(TransportError::closed(code, reason));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::closed(None, "stream ended")),
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        match self.sink.lock().await.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
