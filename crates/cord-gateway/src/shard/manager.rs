//! Shard manager
//!
//! Connects `shard_count` gateway clients, each identifying as
//! `[id, shard_count]` on a shard-qualified URL, all feeding one shared
//! dispatcher.

use super::{GatewayInfoSource, ShardingStrategy};
use crate::cache::SharedCache;
use crate::client::GatewayClient;
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEvent;
use crate::protocol::{Intents, Payload};
use crate::transport::Dialer;
use cord_common::{ErrorList, GatewaySettings, DEFAULT_GATEWAY_URL};
use cord_rest::RequestExecutor;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Span};

/// One connected shard
#[derive(Debug, Clone)]
pub struct Shard {
    pub id: u32,
    pub total_shards: u32,
    pub client: GatewayClient,
}

/// Gateway URL for shard `id` of `count`
pub fn shard_gateway_url(base: &str, id: u32, count: u32) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}shard={id},{count}")
}

pub struct ShardManager {
    token: String,
    intents: Intents,
    gateway_url: String,
    dialer: Option<Arc<dyn Dialer>>,
    heartbeat_interval: Option<Duration>,
    dispatcher: Dispatcher,
    cache: Option<SharedCache>,
    info_source: Option<Arc<dyn GatewayInfoSource>>,
    shard_count: AtomicU32,
    shards: tokio::sync::Mutex<Vec<Shard>>,
    span: Span,
}

impl ShardManager {
    pub fn builder(token: impl Into<String>) -> ShardManagerBuilder {
        ShardManagerBuilder::new(token)
    }

    /// Connect every shard in order
    ///
    /// Fails with [`GatewayError::AlreadyConnected`] while shards are held.
    /// If any shard fails, the shards connected before it are disconnected
    /// and the failure is returned wrapped with its shard id.
    pub async fn connect(&self, cancel: &CancellationToken) -> GatewayResult<()> {
        let mut shards = self.shards.lock().await;
        if !shards.is_empty() {
            return Err(GatewayError::AlreadyConnected);
        }

        let total = self.shard_count();
        let mut connected = Vec::with_capacity(total as usize);
        for id in 0..total {
            match self.connect_shard(cancel, id, total).await {
                Ok(shard) => {
                    info!(shard_id = id, shard_count = total, "Shard connected");
                    connected.push(shard);
                }
                Err(e) => {
                    error!(shard_id = id, error = %e, "Shard failed to connect");
                    for shard in &connected {
                        if let Err(err) = shard.client.disconnect().await {
                            warn!(shard_id = shard.id, error = %err, "Rollback disconnect failed");
                        }
                    }
                    return Err(GatewayError::shard(id, e));
                }
            }
        }

        *shards = connected;
        info!(shard_count = total, "All shards connected");
        Ok(())
    }

    /// Disconnect every shard and forget them, even when some fail
    pub async fn disconnect(&self) -> GatewayResult<()> {
        let shards = std::mem::take(&mut *self.shards.lock().await);

        let mut errors = ErrorList::new();
        for shard in shards {
            if let Err(e) = shard.client.disconnect().await {
                warn!(shard_id = shard.id, error = %e, "Shard failed to disconnect");
                errors.push(GatewayError::shard(shard.id, e));
            }
        }
        info!("Shards disconnected");

        errors.into_result().map_err(GatewayError::Shards)
    }

    /// Send a payload on every held shard
    pub async fn broadcast(&self, payload: &Payload) -> GatewayResult<()> {
        let shards = self.shards.lock().await.clone();

        let mut errors = ErrorList::new();
        for shard in shards {
            if let Err(e) = shard.client.send(payload).await {
                errors.push(GatewayError::shard(shard.id, e));
            }
        }
        errors.into_result().map_err(GatewayError::Shards)
    }

    /// Pick a shard count from server guidance and a strategy
    ///
    /// The strategy sees the server's recommended count first. A strategy
    /// answer of zero falls back to the recommendation, and a zero
    /// recommendation to one shard. Connected shards are left alone; the
    /// next [`connect`](Self::connect) uses the new count.
    pub async fn auto_scale(
        &self,
        cancel: &CancellationToken,
        guild_count: u64,
        strategy: &mut dyn ShardingStrategy,
    ) -> GatewayResult<u32> {
        if self.token.trim().is_empty() {
            return Err(GatewayError::TokenRequired);
        }

        let source: Arc<dyn GatewayInfoSource> = match &self.info_source {
            Some(source) => Arc::clone(source),
            None => Arc::new(
                RequestExecutor::builder(self.token.clone())
                    .span(self.span.clone())
                    .build()?,
            ),
        };
        let info = source.gateway_bot(cancel).await?;

        strategy.set_recommended(info.shards);
        let mut count = strategy.calculate(guild_count);
        if count == 0 {
            count = info.shards;
        }
        if count == 0 {
            count = 1;
        }

        self.shard_count.store(count, Ordering::SeqCst);
        info!(
            shard_count = count,
            recommended = info.shards,
            guild_count,
            "Shard count updated"
        );
        Ok(count)
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count.load(Ordering::SeqCst)
    }

    /// Shard count for the next connect, at least one
    pub fn set_shard_count(&self, count: u32) {
        self.shard_count.store(count.max(1), Ordering::SeqCst);
    }

    /// Currently held shards
    pub async fn shards(&self) -> Vec<Shard> {
        self.shards.lock().await.clone()
    }

    pub async fn shard(&self, id: u32) -> Option<Shard> {
        self.shards
            .lock()
            .await
            .iter()
            .find(|shard| shard.id == id)
            .cloned()
    }

    /// Dispatcher shared by every shard
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn cache(&self) -> Option<&SharedCache> {
        self.cache.as_ref()
    }

    pub fn on<F, Fut>(&self, event_type: impl AsRef<str>, handler: F)
    where
        F: Fn(Arc<GatewayEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispatcher.on(event_type, handler);
    }

    async fn connect_shard(
        &self,
        cancel: &CancellationToken,
        id: u32,
        total: u32,
    ) -> GatewayResult<Shard> {
        let mut builder = GatewayClient::builder(self.token.clone())
            .intents(self.intents)
            .gateway_url(shard_gateway_url(&self.gateway_url, id, total))
            .dispatcher(self.dispatcher.clone())
            .shard(id, total)
            .span(tracing::info_span!(parent: &self.span, "shard", shard_id = id, shard_count = total));
        if let Some(dialer) = &self.dialer {
            builder = builder.dialer(Arc::clone(dialer));
        }
        if let Some(interval) = self.heartbeat_interval {
            builder = builder.heartbeat_interval(interval);
        }
        if let Some(cache) = &self.cache {
            builder = builder.cache(Arc::clone(cache));
        }

        let client = builder.build()?;
        client.connect(cancel).await?;
        Ok(Shard {
            id,
            total_shards: total,
            client,
        })
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("gateway_url", &self.gateway_url)
            .field("intents", &self.intents)
            .field("shard_count", &self.shard_count())
            .finish()
    }
}

/// Builder for [`ShardManager`]
pub struct ShardManagerBuilder {
    token: String,
    intents: Intents,
    gateway_url: String,
    shard_count: u32,
    dialer: Option<Arc<dyn Dialer>>,
    heartbeat_interval: Option<Duration>,
    dispatcher: Option<Dispatcher>,
    cache: Option<SharedCache>,
    info_source: Option<Arc<dyn GatewayInfoSource>>,
    span: Option<Span>,
}

impl ShardManagerBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::default(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            shard_count: 1,
            dialer: None,
            heartbeat_interval: None,
            dispatcher: None,
            cache: None,
            info_source: None,
            span: None,
        }
    }

    /// Take URL, intents, shard count and heartbeat interval from loaded settings
    #[must_use]
    pub fn settings(mut self, settings: &GatewaySettings) -> Self {
        self.gateway_url.clone_from(&settings.url);
        self.intents = Intents::from_config(settings.intents);
        self.shard_count = settings.shard_count;
        self.heartbeat_interval = Some(settings.heartbeat_interval());
        self
    }

    #[must_use]
    pub fn shard_count(mut self, count: u32) -> Self {
        self.shard_count = count;
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

    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// State cache shared by every shard
    #[must_use]
    pub fn cache(mut self, cache: SharedCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Where [`ShardManager::auto_scale`] gets guidance. Defaults to a
    /// [`RequestExecutor`] for the manager's token.
    #[must_use]
    pub fn info_source(mut self, source: Arc<dyn GatewayInfoSource>) -> Self {
        self.info_source = Some(source);
        self
    }

    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> ShardManager {
        ShardManager {
            token: self.token,
            intents: self.intents,
            gateway_url: self.gateway_url,
            dialer: self.dialer,
            heartbeat_interval: self.heartbeat_interval,
            dispatcher: self.dispatcher.unwrap_or_default(),
            cache: self.cache,
            info_source: self.info_source,
            shard_count: AtomicU32::new(self.shard_count.max(1)),
            shards: tokio::sync::Mutex::new(Vec::new()),
            span: self
                .span
                .unwrap_or_else(|| tracing::info_span!("shard_manager")),
        }
    }
}
