//! Gateway client
//!
//! A read loop task receives every frame and drives the session: hello
//! restarts the heartbeat, dispatches are decoded and handed to the
//! [`Dispatcher`], reconnect requests run as a supervised background task
//! and invalid sessions trigger a fresh identify.

use crate::cache::SharedCache;
use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEvent;
use crate::protocol::{
    Activity, IdentifyPayload, IdentifyProperties, Intents, OpCode, Payload,
    PresenceUpdatePayload, RequestGuildMembersPayload,
};
use crate::transport::Dialer;
use cord_common::{GatewaySettings, ValidationError, DEFAULT_GATEWAY_URL};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument, Span};

/// Progress of the most recent server-requested reconnect
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReconnectStatus {
    #[default]
    Idle,
    InProgress,
    Succeeded,
    Failed(String),
}

/// Client for one gateway session. Clones share the same session.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

struct Inner {
    intents: Intents,
    shard: Option<[u32; 2]>,
    properties: IdentifyProperties,
    connection: Connection,
    dispatcher: Dispatcher,
    cache: Option<SharedCache>,
    /// Present while connected
    run: tokio::sync::Mutex<Option<RunHandle>>,
    presence: Mutex<Option<Presence>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_status: watch::Sender<ReconnectStatus>,
    span: Span,
}

struct RunHandle {
    cancel: CancellationToken,
    read_loop: JoinHandle<()>,
}

#[derive(Debug, Clone)]
struct Presence {
    status: String,
    activity: Option<Activity>,
}

impl GatewayClient {
    pub fn builder(token: impl Into<String>) -> GatewayClientBuilder {
        GatewayClientBuilder::new(token)
    }

    /// Open the connection, start the read loop and identify
    ///
    /// A presence set earlier with [`update_presence`](Self::update_presence)
    /// is sent again once identified. If identify fails the read loop is
    /// stopped, the socket closed and the error returned.
    pub async fn connect(&self, cancel: &CancellationToken) -> GatewayResult<()> {
        let mut run = self.inner.run.lock().await;
        if run.is_some() {
            return Err(GatewayError::AlreadyConnected);
        }

        let run_cancel = cancel.child_token();
        self.inner.connection.connect(&run_cancel).await?;

        let read_loop = tokio::spawn(
            self.clone()
                .read_loop(run_cancel.clone())
                .instrument(self.inner.span.clone()),
        );

        if let Err(e) = self.identify().await {
            run_cancel.cancel();
            join_logged(read_loop, "read loop").await;
            if let Err(close_err) = self.inner.connection.close().await {
                warn!(error = %close_err, "Failed to close socket after identify failure");
            }
            return Err(e);
        }
        if let Err(e) = self.replay_presence().await {
            warn!(error = %e, "Failed to restore presence");
        }

        *run = Some(RunHandle {
            cancel: run_cancel,
            read_loop,
        });
        info!(shard = ?self.inner.shard, "Gateway client connected");
        Ok(())
    }

    /// Stop the read loop, wait for it and any reconnect task, then close
    /// the socket. Disconnecting twice is a no-op.
    pub async fn disconnect(&self) -> GatewayResult<()> {
        let mut run = self.inner.run.lock().await;
        let Some(handle) = run.take() else {
            return Ok(());
        };

        handle.cancel.cancel();
        join_logged(handle.read_loop, "read loop").await;
        let reconnect = self.inner.reconnect_task.lock().take();
        if let Some(task) = reconnect {
            join_logged(task, "reconnect").await;
        }

        let result = self.inner.connection.close().await;
        info!(shard = ?self.inner.shard, "Gateway client disconnected");
        result
    }

    /// Set the bot's status and activity
    ///
    /// The presence is remembered and sent again after every connect and
    /// reconnect, even when sending it now fails.
    pub async fn update_presence(
        &self,
        status: impl Into<String>,
        activity: Option<Activity>,
    ) -> GatewayResult<()> {
        let status = status.into();
        if status.trim().is_empty() {
            return Err(ValidationError::required("status").into());
        }

        let presence = Presence { status, activity };
        *self.inner.presence.lock() = Some(presence.clone());
        self.send_presence(&presence).await
    }

    /// Ask the gateway for member chunks of a guild
    pub async fn request_guild_members(
        &self,
        guild_id: &str,
        query: Option<&str>,
        limit: Option<u32>,
    ) -> GatewayResult<()> {
        if guild_id.trim().is_empty() {
            return Err(ValidationError::required("guild_id").into());
        }

        let body = RequestGuildMembersPayload {
            guild_id: guild_id.to_string(),
            query: query.map(str::to_string),
            limit,
        };
        self.send(&Payload::command(OpCode::RequestGuildMembers, &body)?)
            .await
    }

    pub async fn send(&self, payload: &Payload) -> GatewayResult<()> {
        self.inner.connection.send(payload).await
    }

    /// Register an event handler on this client's dispatcher
    pub fn on<F, Fut>(&self, event_type: impl AsRef<str>, handler: F)
    where
        F: Fn(Arc<GatewayEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.dispatcher.on(event_type, handler);
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// `[shard_id, shard_count]` sent in identify
    pub fn shard(&self) -> Option<[u32; 2]> {
        self.inner.shard
    }

    pub fn intents(&self) -> Intents {
        self.inner.intents
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.connection.session_id()
    }

    /// State cache fed from guild events, when one was configured
    pub fn cache(&self) -> Option<&SharedCache> {
        self.inner.cache.as_ref()
    }

    pub fn reconnect_status(&self) -> ReconnectStatus {
        self.inner.reconnect_status.borrow().clone()
    }

    /// Watch reconnect progress
    pub fn subscribe_reconnects(&self) -> watch::Receiver<ReconnectStatus> {
        self.inner.reconnect_status.subscribe()
    }

    async fn identify(&self) -> GatewayResult<()> {
        let body = IdentifyPayload {
            token: self.inner.connection.token().to_string(),
            properties: self.inner.properties.clone(),
            intents: self.inner.intents.bits(),
            shard: self.inner.shard,
        };
        self.send(&Payload::command(OpCode::Identify, &body)?)
            .await?;
        info!(intents = body.intents, "Identify sent");
        Ok(())
    }

    async fn send_presence(&self, presence: &Presence) -> GatewayResult<()> {
        let body = PresenceUpdatePayload {
            since: None,
            activities: presence.activity.iter().cloned().collect(),
            status: presence.status.clone(),
            afk: false,
        };
        self.send(&Payload::command(OpCode::PresenceUpdate, &body)?)
            .await
    }

    async fn replay_presence(&self) -> GatewayResult<()> {
        let presence = self.inner.presence.lock().clone();
        match presence {
            Some(presence) => self.send_presence(&presence).await,
            None => Ok(()),
        }
    }

    async fn read_loop(self, cancel: CancellationToken) {
        debug!("Read loop started");
        loop {
            let generation = self.inner.connection.generation();
            match self.inner.connection.receive(&cancel).await {
                Ok(payload) => self.handle_payload(&cancel, payload).await,
                Err(GatewayError::Cancelled) => break,
                Err(GatewayError::Json(e)) => {
                    warn!(error = %e, "Discarding malformed gateway payload");
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if self.await_reconnect(&cancel, generation).await {
                        debug!("Reading from reconnected socket");
                        continue;
                    }

                    let close_code = match &e {
                        GatewayError::Transport(transport) => transport.close_code(),
                        _ => None,
                    };
                    match close_code {
                        Some(code) => error!(
                            close_code = code.as_u16(),
                            can_reconnect = code.can_reconnect(),
                            "Gateway closed the session: {code}"
                        ),
                        None => error!(error = %e, "Gateway read failed"),
                    }
                    break;
                }
            }
        }
        debug!("Read loop stopped");
    }

    /// After a read failure, wait out a reconnect in flight. True when the
    /// socket was replaced and reading can continue.
    async fn await_reconnect(&self, cancel: &CancellationToken, generation: u64) -> bool {
        let mut status = self.inner.reconnect_status.subscribe();
        let settled = async {
            status
                .wait_for(|s| *s != ReconnectStatus::InProgress)
                .await
                .map(|s| s.clone())
        };
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            result = settled => match result {
                Ok(outcome) => outcome,
                Err(_) => return false,
            },
        };

        outcome == ReconnectStatus::Succeeded
            && self.inner.connection.generation() != generation
            && self.inner.connection.is_connected()
    }

    async fn handle_payload(&self, cancel: &CancellationToken, payload: Payload) {
        match payload.op {
            OpCode::Hello => match payload.hello_interval() {
                Some(interval) if !interval.is_zero() => {
                    if let Err(e) = self.inner.connection.restart_heartbeat(interval).await {
                        warn!(error = %e, "Failed to apply hello interval");
                    }
                }
                _ => warn!("Hello without a usable heartbeat interval"),
            },
            OpCode::Dispatch => self.handle_dispatch(payload).await,
            OpCode::Reconnect => {
                info!("Server requested reconnect");
                self.spawn_reconnect(cancel);
            }
            OpCode::InvalidSession => {
                warn!(
                    resumable = payload.d.as_bool().unwrap_or(false),
                    "Session invalidated, identifying again"
                );
                self.inner.connection.clear_session();
                if let Err(e) = self.identify().await {
                    error!(error = %e, "Identify after invalid session failed");
                }
            }
            OpCode::Heartbeat => {
                if let Err(e) = self.inner.connection.send_heartbeat().await {
                    warn!(error = %e, "Requested heartbeat failed");
                }
            }
            OpCode::HeartbeatAck => {
                trace!(latency = ?self.inner.connection.latency(), "Heartbeat acknowledged");
            }
            other => debug!(op = %other, "Ignoring op code"),
        }
    }

    async fn handle_dispatch(&self, payload: Payload) {
        let Some(name) = payload.t else {
            warn!("Dispatch without an event name");
            return;
        };

        let event = match GatewayEvent::decode(&name, payload.d) {
            Ok(event) => event,
            Err(e) => {
                warn!(event = %name, error = %e, "Failed to decode dispatch");
                return;
            }
        };
        if let Some(session_id) = event.as_ref().and_then(GatewayEvent::session_id) {
            // A fresh session numbers its events from its own READY.
            self.inner.connection.set_sequence(payload.s.unwrap_or(0));
            self.inner.connection.set_session(session_id);
            info!("Session ready");
        }
        if let (Some(cache), Some(event)) = (&self.inner.cache, &event) {
            cache.apply(event);
        }

        if let Err(errors) = self.inner.dispatcher.dispatch(event.map(Arc::new)).await {
            debug!(event = %name, failures = errors.len(), "Dispatch finished with handler errors");
        }
    }

    fn spawn_reconnect(&self, cancel: &CancellationToken) {
        let mut slot = self.inner.reconnect_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Reconnect already in progress");
            return;
        }

        self.inner
            .reconnect_status
            .send_replace(ReconnectStatus::InProgress);

        let client = self.clone();
        let cancel = cancel.clone();
        let task = async move {
            let status = match client.reconnect(&cancel).await {
                Ok(()) => {
                    info!("Reconnected");
                    ReconnectStatus::Succeeded
                }
                Err(e) => {
                    if e.is_cancelled() {
                        debug!("Reconnect cancelled");
                    } else {
                        error!(error = %e, "Reconnect failed");
                    }
                    if let Err(close_err) = client.inner.connection.close().await {
                        warn!(error = %close_err, "Failed to close socket after reconnect failure");
                    }
                    ReconnectStatus::Failed(e.to_string())
                }
            };
            client.inner.reconnect_status.send_replace(status);
        };
        *slot = Some(tokio::spawn(task.instrument(self.inner.span.clone())));
    }

    async fn reconnect(&self, cancel: &CancellationToken) -> GatewayResult<()> {
        self.inner.connection.reconnect(cancel).await?;
        self.identify().await?;
        self.replay_presence().await
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("shard", &self.inner.shard)
            .field("intents", &self.inner.intents)
            .field("connection", &self.inner.connection)
            .finish()
    }
}

/// Builder for [`GatewayClient`]
pub struct GatewayClientBuilder {
    token: String,
    intents: Intents,
    gateway_url: String,
    dialer: Option<Arc<dyn Dialer>>,
    heartbeat_interval: Option<Duration>,
    dispatcher: Option<Dispatcher>,
    cache: Option<SharedCache>,
    shard: Option<[u32; 2]>,
    properties: IdentifyProperties,
    span: Option<Span>,
}

impl GatewayClientBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::default(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            dialer: None,
            heartbeat_interval: None,
            dispatcher: None,
            cache: None,
            shard: None,
            properties: IdentifyProperties::default(),
            span: None,
        }
    }

    /// Take URL, intents and heartbeat interval from loaded settings
    #[must_use]
    pub fn settings(mut self, settings: &GatewaySettings) -> Self {
        self.gateway_url.clone_from(&settings.url);
        self.intents = Intents::from_config(settings.intents);
        self.heartbeat_interval = Some(settings.heartbeat_interval());
        self
    }

    #[must_use]
    pub fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
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

    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Share a dispatcher, e.g. across shards
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Keep guilds, channels and members from guild events in `cache`
    /// before handlers run
    #[must_use]
    pub fn cache(mut self, cache: SharedCache) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn shard(mut self, id: u32, count: u32) -> Self {
        self.shard = Some([id, count]);
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: IdentifyProperties) -> Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> GatewayResult<GatewayClient> {
        if let Some([id, count]) = self.shard {
            if count == 0 || id >= count {
                return Err(ValidationError::new(
                    "shard",
                    format!("shard {id} is outside 0..{count}"),
                )
                .into());
            }
        }

        let span = self.span.unwrap_or_else(|| match self.shard {
            Some([id, count]) => tracing::info_span!("gateway", shard_id = id, shard_count = count),
            None => tracing::info_span!("gateway"),
        });

        let mut connection = Connection::builder(self.token)
            .gateway_url(self.gateway_url)
            .span(span.clone());
        if let Some(dialer) = self.dialer {
            connection = connection.dialer(dialer);
        }
        if let Some(interval) = self.heartbeat_interval {
            connection = connection.heartbeat_interval(interval);
        }
        let connection = connection.build()?;

        let (reconnect_status, _) = watch::channel(ReconnectStatus::Idle);

        Ok(GatewayClient {
            inner: Arc::new(Inner {
                intents: self.intents,
                shard: self.shard,
                properties: self.properties,
                connection,
                dispatcher: self.dispatcher.unwrap_or_default(),
                cache: self.cache,
                run: tokio::sync::Mutex::new(None),
                presence: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                reconnect_status,
                span,
            }),
        })
    }
}

/// Wait for a background task, logging instead of propagating a panic
async fn join_logged(handle: JoinHandle<()>, task: &'static str) {
    if let Err(e) = handle.await {
        if e.is_panic() {
            warn!(task, "Background task panicked");
        }
    }
}
