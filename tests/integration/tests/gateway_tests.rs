//! Gateway client tests over real WebSocket connections
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use cord_gateway::events::Message;
use cord_gateway::protocol::Activity;
use cord_gateway::{
    CloseCode, Connection, GatewayClient, GatewayError, Intents, OpCode, Payload,
    ReconnectStatus, TransportError,
};
use integration_tests::{MockGateway, TEST_TOKEN, WAIT};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const SLOW_HEARTBEAT: Duration = Duration::from_secs(60);

fn client_for(gateway: &MockGateway) -> GatewayClient {
    GatewayClient::builder(TEST_TOKEN)
        .gateway_url(gateway.url())
        .intents(Intents::GUILDS | Intents::GUILD_MESSAGES)
        .build()
        .expect("client should build")
}

fn message_channel(client: &GatewayClient) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.dispatcher().on_message_create(move |message| {
        let _ = tx.send(message);
        async { Ok(()) }
    });
    rx
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_identify_and_ready() {
    let mut gateway = MockGateway::start().await.unwrap();
    let client = client_for(&gateway);

    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    client.dispatcher().on_ready(move |ready| {
        let _ = ready_tx.send(ready);
        async { Ok(()) }
    });

    client.connect(&CancellationToken::new()).await.unwrap();
    let (session, identify) = gateway.accept_identified(SLOW_HEARTBEAT).await.unwrap();

    assert_eq!(session.query(), "v=10&encoding=json");
    assert_eq!(identify.d["token"], TEST_TOKEN);
    assert_eq!(
        identify.d["intents"],
        (Intents::GUILDS | Intents::GUILD_MESSAGES).bits()
    );
    assert!(identify.d["properties"]["os"].is_string());
    assert!(identify.d.get("shard").is_none());

    session.ready("session-abc", 1).unwrap();
    let ready = timeout(WAIT, ready_rx.recv()).await.unwrap().unwrap();
    assert_eq!(ready.session_id, "session-abc");
    assert_eq!(ready.user.username, "cord-test");
    assert_eq!(client.session_id().as_deref(), Some("session-abc"));
    assert_eq!(client.connection().sequence(), 1);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_carries_last_sequence() {
    let mut gateway = MockGateway::start().await.unwrap();
    let client = client_for(&gateway);
    let mut messages = message_channel(&client);

    client.connect(&CancellationToken::new()).await.unwrap();
    let (mut session, _) = gateway
        .accept_identified(Duration::from_millis(50))
        .await
        .unwrap();

    session
        .send(&Payload::dispatch(
            "MESSAGE_CREATE",
            7,
            json!({"id": "m1", "channel_id": "c1", "content": "hi"}),
        ))
        .unwrap();
    timeout(WAIT, messages.recv()).await.unwrap().unwrap();

    loop {
        let heartbeat = session.expect_op(OpCode::Heartbeat).await.unwrap();
        if heartbeat.d == json!(7) {
            break;
        }
    }
    session.send(&Payload::heartbeat_ack()).unwrap();

    client.disconnect().await.unwrap();
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_presence_and_member_requests() {
    let mut gateway = MockGateway::start().await.unwrap();
    let client = client_for(&gateway);

    client.connect(&CancellationToken::new()).await.unwrap();
    let (mut session, _) = gateway.accept_identified(SLOW_HEARTBEAT).await.unwrap();

    client
        .update_presence("idle", Some(Activity::playing("integration tests")))
        .await
        .unwrap();
    let presence = session.expect_op(OpCode::PresenceUpdate).await.unwrap();
    assert_eq!(presence.d["status"], "idle");
    assert_eq!(presence.d["activities"][0]["name"], "integration tests");
    assert_eq!(presence.d["activities"][0]["type"], 0);
    assert_eq!(presence.d["afk"], false);

    client
        .request_guild_members("100", Some("ab"), Some(10))
        .await
        .unwrap();
    let request = session.expect_op(OpCode::RequestGuildMembers).await.unwrap();
    assert_eq!(request.d["guild_id"], "100");
    assert_eq!(request.d["query"], "ab");
    assert_eq!(request.d["limit"], 10);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_closes_socket() {
    let mut gateway = MockGateway::start().await.unwrap();
    let client = client_for(&gateway);

    client.connect(&CancellationToken::new()).await.unwrap();
    let (mut session, _) = gateway.accept_identified(SLOW_HEARTBEAT).await.unwrap();

    client.disconnect().await.unwrap();
    session.expect_closed().await.unwrap();
    assert!(!client.is_connected());

    // Second disconnect is a no-op
    client.disconnect().await.unwrap();
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test]
async fn test_server_requested_reconnect_resumes() {
    let mut gateway = MockGateway::start().await.unwrap();
    let client = client_for(&gateway);
    let mut messages = message_channel(&client);
    let mut reconnects = client.subscribe_reconnects();

    client.connect(&CancellationToken::new()).await.unwrap();
    let (mut first, _) = gateway.accept_identified(SLOW_HEARTBEAT).await.unwrap();
    first.ready("session-r", 3).unwrap();
    timeout(WAIT, async {
        while client.session_id().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    first.send(&Payload::reconnect()).unwrap();

    let mut second = gateway.accept().await.unwrap();
    second.hello(SLOW_HEARTBEAT).unwrap();
    let resume = second.expect_op(OpCode::Resume).await.unwrap();
    assert_eq!(resume.d["session_id"], "session-r");
    assert_eq!(resume.d["seq"], 3);
    assert_eq!(resume.d["token"], TEST_TOKEN);
    second.expect_op(OpCode::Identify).await.unwrap();
    first.expect_closed().await.unwrap();

    timeout(
        WAIT,
        reconnects.wait_for(|status| *status == ReconnectStatus::Succeeded),
    )
    .await
    .unwrap()
    .unwrap();

    second
        .send(&Payload::dispatch(
            "MESSAGE_CREATE",
            4,
            json!({"id": "after", "channel_id": "c1", "content": "still here"}),
        ))
        .unwrap();
    let message = timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(message.id, "after");

    client.disconnect().await.unwrap();
}

// ============================================================================
// Close codes
// ============================================================================

#[tokio::test]
async fn test_close_code_surfaces_from_receive() {
    let mut gateway = MockGateway::start().await.unwrap();
    let connection = Connection::builder(TEST_TOKEN)
        .gateway_url(gateway.url())
        .build()
        .unwrap();
    let cancel = CancellationToken::new();

    connection.connect(&cancel).await.unwrap();
    let session = gateway.accept().await.unwrap();
    session.hello(SLOW_HEARTBEAT).unwrap();

    let hello = connection.receive(&cancel).await.unwrap();
    assert_eq!(hello.op, OpCode::Hello);
    assert_eq!(hello.hello_interval(), Some(SLOW_HEARTBEAT));

    session.close(4004, "Authentication failed").unwrap();
    let err = timeout(WAIT, connection.receive(&cancel))
        .await
        .unwrap()
        .unwrap_err();
    let GatewayError::Transport(transport) = err else {
        panic!("expected a transport error");
    };
    assert!(matches!(
        transport,
        TransportError::Closed {
            code: Some(4004),
            ..
        }
    ));
    let code = transport.close_code().unwrap();
    assert_eq!(code, CloseCode::AuthenticationFailed);
    assert!(!code.can_reconnect());

    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_connect_to_unreachable_gateway_fails() {
    let client = GatewayClient::builder(TEST_TOKEN)
        .gateway_url("ws://127.0.0.1:1/?v=10&encoding=json")
        .build()
        .unwrap();

    let err = client
        .connect(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Transport(TransportError::Connect { .. })
    ));
    assert!(!client.is_connected());
}
