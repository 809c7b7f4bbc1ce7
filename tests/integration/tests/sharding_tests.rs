//! Shard manager and REST guidance tests over real sockets
//!
//! Run with: cargo test -p integration-tests --test sharding_tests

use cord_gateway::{
    GatewayError, OpCode, Payload, RecommendedSharding, ShardManager, ShardingStrategy,
};
use cord_ratelimit::{route_key, RateLimitTracker};
use cord_rest::{RequestExecutor, GATEWAY_BOT_PATH};
use integration_tests::{MockGateway, MockRest, TEST_TOKEN};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn executor_for(rest: &MockRest) -> RequestExecutor {
    RequestExecutor::builder(TEST_TOKEN)
        .base_url(rest.base_url())
        .backoff(Duration::from_millis(1), Duration::from_millis(20))
        .build()
        .expect("executor should build")
}

struct GuildCountSharding;

impl ShardingStrategy for GuildCountSharding {
    fn calculate(&self, guild_count: u64) -> u32 {
        (guild_count / 10) as u32
    }
}

#[tokio::test]
async fn test_gateway_bot_retries_rate_limit() {
    let rest = MockRest::start("wss://gateway.example", 4, 1).await.unwrap();
    let executor = executor_for(&rest);

    let info = executor
        .gateway_bot(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(info.url, "wss://gateway.example");
    assert_eq!(info.shards, 4);
    assert_eq!(info.session_start_limit.remaining, 999);
    assert_eq!(rest.hits(), 2);

    let bucket = executor
        .tracker()
        .bucket(&route_key("GET", GATEWAY_BOT_PATH))
        .expect("bucket recorded from headers");
    assert_eq!(bucket.limit, 5);
    assert_eq!(bucket.remaining, 4);
}

#[tokio::test]
async fn test_shards_connect_with_shard_urls() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = ShardManager::builder(TEST_TOKEN)
        .gateway_url(gateway.url())
        .shard_count(2)
        .build();

    manager.connect(&CancellationToken::new()).await.unwrap();

    let mut sessions = Vec::new();
    for id in 0..2u32 {
        let mut session = gateway.accept().await.unwrap();
        assert!(session.query().ends_with(&format!("&shard={id},2")));
        let identify = session.expect_op(OpCode::Identify).await.unwrap();
        assert_eq!(identify.d["shard"], json!([id, 2]));
        sessions.push(session);
    }

    let err = manager
        .connect(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AlreadyConnected));

    manager.broadcast(&Payload::heartbeat(0)).await.unwrap();
    for session in &mut sessions {
        session.expect_op(OpCode::Heartbeat).await.unwrap();
    }

    manager.disconnect().await.unwrap();
    for session in &mut sessions {
        session.expect_closed().await.unwrap();
    }
    assert!(manager.shards().await.is_empty());
}

#[tokio::test]
async fn test_auto_scale_then_connect() {
    let mut gateway = MockGateway::start().await.unwrap();
    let rest = MockRest::start(gateway.url(), 3, 0).await.unwrap();
    let manager = ShardManager::builder(TEST_TOKEN)
        .gateway_url(gateway.url())
        .info_source(Arc::new(executor_for(&rest)))
        .build();

    let mut strategy = RecommendedSharding::new();
    let count = manager
        .auto_scale(&CancellationToken::new(), 5_000, &mut strategy)
        .await
        .unwrap();
    assert_eq!(count, 3);
    assert_eq!(manager.shard_count(), 3);

    manager.connect(&CancellationToken::new()).await.unwrap();
    for id in 0..3u32 {
        let mut session = gateway.accept().await.unwrap();
        let identify = session.expect_op(OpCode::Identify).await.unwrap();
        assert_eq!(identify.d["shard"], json!([id, 3]));
    }
    assert_eq!(manager.shards().await.len(), 3);

    manager.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_auto_scale_with_custom_strategy() {
    let rest = MockRest::start("wss://gateway.example", 2, 0).await.unwrap();
    let manager = ShardManager::builder(TEST_TOKEN)
        .info_source(Arc::new(executor_for(&rest)))
        .build();

    let count = manager
        .auto_scale(&CancellationToken::new(), 45, &mut GuildCountSharding)
        .await
        .unwrap();
    assert_eq!(count, 4);

    // Too few guilds for the strategy, so the server recommendation wins
    let count = manager
        .auto_scale(&CancellationToken::new(), 5, &mut GuildCountSharding)
        .await
        .unwrap();
    assert_eq!(count, 2);
}
