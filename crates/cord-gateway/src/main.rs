//! Gateway runner
//!
//! Run with:
//! ```bash
//! DISCORD_BOT_TOKEN=... cargo run -p cord-gateway
//! ```
//!
//! Configuration is loaded from environment variables. Set
//! `DISCORD_AUTO_SCALE=true` to size the shard count from `/gateway/bot`.

use cord_common::{try_init_tracing_with_config, SdkConfig, TracingConfig};
use cord_gateway::{EventType, GatewayEvent, MemoryCache, RecommendedSharding, ShardManager};
use cord_rest::RequestExecutor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match SdkConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::from_settings(&config.logging)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "Gateway runner failed");
        std::process::exit(1);
    }
}

async fn run(config: SdkConfig) -> anyhow::Result<()> {
    let token = config.require_token()?.to_string();
    let cancel = CancellationToken::new();

    let executor = RequestExecutor::builder(token.clone())
        .settings(&config.client)
        .build()?;
    let manager = ShardManager::builder(token)
        .settings(&config.gateway)
        .info_source(Arc::new(executor))
        .cache(MemoryCache::new_shared(None))
        .build();

    if auto_scale_enabled() {
        let count = manager
            .auto_scale(&cancel, 0, &mut RecommendedSharding::new())
            .await?;
        info!(shard_count = count, "Using recommended shard count");
    }

    register_logging_handlers(&manager);

    info!(
        shard_count = manager.shard_count(),
        url = %config.gateway.url,
        "Connecting to gateway"
    );
    manager.connect(&cancel).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cancel.cancel();
    manager.disconnect().await?;
    if let Some(cache) = manager.cache() {
        info!(stats = ?cache.stats(), "State cache totals");
    }
    Ok(())
}

fn auto_scale_enabled() -> bool {
    std::env::var("DISCORD_AUTO_SCALE")
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn register_logging_handlers(manager: &ShardManager) {
    let dispatcher = manager.dispatcher();

    dispatcher.on_ready(|ready| async move {
        info!(
            user = %ready.user.username,
            session_id = %ready.session_id,
            guilds = ready.guilds.len(),
            "Ready"
        );
        Ok(())
    });

    dispatcher.on_message_create(|message| async move {
        info!(
            channel_id = %message.channel_id,
            message_id = %message.id,
            bot = message.is_from_bot(),
            "Message received"
        );
        Ok(())
    });

    dispatcher.on_guild_create(|guild| async move {
        info!(guild_id = %guild.id, name = %guild.name, "Guild available");
        Ok(())
    });

    dispatcher.on(EventType::GuildDelete, |event: Arc<GatewayEvent>| async move {
        if let GatewayEvent::GuildDelete(guild) = &*event {
            info!(guild_id = %guild.id, "Guild unavailable");
        }
        Ok(())
    });
}
