//! Event dispatcher
//!
//! Handlers are kept per event name and run one after another in
//! registration order. A failing handler never stops the rest; every failure
//! is logged and returned together.

use crate::events::{EventType, GatewayEvent, Guild, Interaction, Message, ReadyEvent};
use cord_common::ErrorList;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

pub type EventHandler = Arc<dyn Fn(Arc<GatewayEvent>) -> HandlerFuture + Send + Sync>;

/// A handler returned an error
#[derive(Debug, thiserror::Error)]
#[error("{event} handler #{index} failed: {source}")]
pub struct HandlerError {
    pub event: String,
    /// Position of the handler in registration order
    pub index: usize,
    #[source]
    pub source: anyhow::Error,
}

/// Registry of event handlers. Clones share the same registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event name
    pub fn on<F, Fut>(&self, event_type: impl AsRef<str>, handler: F)
    where
        F: Fn(Arc<GatewayEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.handlers
            .write()
            .entry(event_type.as_ref().to_string())
            .or_default()
            .push(handler);
    }

    pub fn on_ready<F, Fut>(&self, handler: F)
    where
        F: Fn(ReadyEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_typed(EventType::Ready, handler, |event| match event {
            GatewayEvent::Ready(ready) => Some(ready.clone()),
            _ => None,
        });
    }

    pub fn on_message_create<F, Fut>(&self, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_typed(EventType::MessageCreate, handler, |event| match event {
            GatewayEvent::MessageCreate(message) => Some(message.clone()),
            _ => None,
        });
    }

    /// Handle edits; the payload may be partial, so most fields can be empty
    pub fn on_message_update<F, Fut>(&self, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_typed(EventType::MessageUpdate, handler, |event| match event {
            GatewayEvent::MessageUpdate(message) => Some(message.clone()),
            _ => None,
        });
    }

    pub fn on_guild_create<F, Fut>(&self, handler: F)
    where
        F: Fn(Guild) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_typed(EventType::GuildCreate, handler, |event| match event {
            GatewayEvent::GuildCreate(guild) => Some(guild.clone()),
            _ => None,
        });
    }

    pub fn on_interaction_create<F, Fut>(&self, handler: F)
    where
        F: Fn(Interaction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_typed(EventType::InteractionCreate, handler, |event| match event {
            GatewayEvent::InteractionCreate(interaction) => Some(interaction.clone()),
            _ => None,
        });
    }

    fn on_typed<T, F, Fut>(
        &self,
        event_type: EventType,
        handler: F,
        extract: fn(&GatewayEvent) -> Option<T>,
    ) where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on(event_type, move |event: Arc<GatewayEvent>| {
            let call = extract(&event).map(&handler);
            async move {
                match call {
                    Some(call) => call.await,
                    None => Ok(()),
                }
            }
        });
    }

    /// Run every handler registered for the event's name
    ///
    /// Handlers see a snapshot taken when dispatch starts, so they may
    /// register further handlers. `None` dispatches to nothing.
    pub async fn dispatch(
        &self,
        event: impl Into<Option<Arc<GatewayEvent>>>,
    ) -> Result<(), ErrorList<HandlerError>> {
        let Some(event) = event.into() else {
            return Ok(());
        };
        let name = event.event_type().as_str();
        let handlers = self.handlers.read().get(name).cloned().unwrap_or_default();

        let mut errors = ErrorList::new();
        for (index, handler) in handlers.iter().enumerate() {
            if let Err(source) = handler(Arc::clone(&event)).await {
                warn!(event = name, index, error = %source, "Event handler failed");
                errors.push(HandlerError {
                    event: name.to_string(),
                    index,
                    source,
                });
            }
        }
        errors.into_result()
    }

    pub fn handler_count(&self, event_type: impl AsRef<str>) -> usize {
        self.handlers
            .read()
            .get(event_type.as_ref())
            .map_or(0, Vec::len)
    }

    /// Remove every handler for an event name
    pub fn clear(&self, event_type: impl AsRef<str>) {
        self.handlers.write().remove(event_type.as_ref());
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("Dispatcher").field("handlers", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::User;
    use parking_lot::Mutex;
    use serde_json::Map;

    fn ready_event() -> Arc<GatewayEvent> {
        Arc::new(GatewayEvent::Ready(ReadyEvent {
            v: 10,
            user: User {
                id: "1".into(),
                username: "bot".into(),
                discriminator: None,
                global_name: None,
                bot: true,
            },
            guilds: Vec::new(),
            session_id: "session".into(),
            resume_gateway_url: None,
            shard: None,
            extra: Map::new(),
        }))
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_others() {
        let dispatcher = Dispatcher::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&calls);
        dispatcher.on("READY", move |_| {
            log.lock().push("first");
            async { anyhow::bail!("first handler broke") }
        });
        let log = Arc::clone(&calls);
        dispatcher.on(EventType::Ready, move |_| {
            log.lock().push("second");
            async { Ok(()) }
        });

        let errors = dispatcher.dispatch(ready_event()).await.unwrap_err();

        assert_eq!(*calls.lock(), vec!["first", "second"]);
        assert_eq!(errors.len(), 1);
        let first = errors.first().unwrap();
        assert_eq!(first.event, "READY");
        assert_eq!(first.index, 0);
        assert_eq!(first.source.to_string(), "first handler broke");
    }

    #[tokio::test]
    async fn test_all_failures_collected_in_order() {
        let dispatcher = Dispatcher::new();
        for i in 0..3 {
            dispatcher.on("READY", move |_| async move { anyhow::bail!("failure {i}") });
        }

        let errors = dispatcher.dispatch(ready_event()).await.unwrap_err();
        let indexes: Vec<usize> = errors.errors().iter().map(|e| e.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_none_dispatches_nothing() {
        let dispatcher = Dispatcher::new();
        dispatcher.on("READY", |_| async { anyhow::bail!("should not run") });

        dispatcher.dispatch(None::<Arc<GatewayEvent>>).await.unwrap();
    }

    #[tokio::test]
    async fn test_other_event_types_not_invoked() {
        let dispatcher = Dispatcher::new();
        dispatcher.on("MESSAGE_CREATE", |_| async { anyhow::bail!("wrong event") });

        dispatcher.dispatch(ready_event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_may_register_handlers() {
        let dispatcher = Dispatcher::new();
        let registry = dispatcher.clone();
        dispatcher.on("READY", move |_| {
            registry.on("READY", |_| async { Ok(()) });
            async { Ok(()) }
        });

        dispatcher.dispatch(ready_event()).await.unwrap();
        assert_eq!(dispatcher.handler_count("READY"), 2);
    }

    #[tokio::test]
    async fn test_typed_ready_handler() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        dispatcher.on_ready(move |ready| {
            *slot.lock() = Some(ready.session_id);
            async { Ok(()) }
        });

        dispatcher.dispatch(ready_event()).await.unwrap();
        assert_eq!(seen.lock().as_deref(), Some("session"));
    }

    #[tokio::test]
    async fn test_typed_message_update_handler() {
        let dispatcher = Dispatcher::new();
        let edits = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&edits);
        dispatcher.on_message_update(move |message| {
            log.lock().push((message.id, message.content));
            async { Ok(()) }
        });

        let message: Message = serde_json::from_value(serde_json::json!({
            "id": "55",
            "channel_id": "7",
            "content": "edited",
            "edited_timestamp": "2024-01-01T00:00:00Z",
        }))
        .unwrap();
        dispatcher
            .dispatch(Some(Arc::new(GatewayEvent::MessageCreate(message.clone()))))
            .await
            .unwrap();
        dispatcher
            .dispatch(Some(Arc::new(GatewayEvent::MessageUpdate(message))))
            .await
            .unwrap();

        assert_eq!(*edits.lock(), vec![("55".to_string(), "edited".to_string())]);
    }

    #[test]
    fn test_clear() {
        let dispatcher = Dispatcher::new();
        dispatcher.on("READY", |_| async { Ok(()) });
        dispatcher.clear("READY");
        assert_eq!(dispatcher.handler_count("READY"), 0);
    }
}
