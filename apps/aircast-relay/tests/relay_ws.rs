use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use aircast_relay::{registry::Registry, router};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay() -> String {
    let registry = Arc::new(Registry::new());
    let app = router(registry);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve relay");
    });
    format!("ws://{}/ws", addr)
}

async fn connect(url: &str) -> WsClient {
    let (ws, _) = connect_async(url).await.expect("connect to relay");
    ws
}

async fn register(ws: &mut WsClient, id: &str) {
    let msg = json!({"type": "register", "id": id}).to_string();
    ws.send(Message::Text(msg)).await.expect("send register");
}

async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for relayed message")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("parse relayed json");
        }
    }
}

async fn expect_silence(ws: &mut WsClient) {
    let outcome = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(outcome.is_err(), "expected no message, got {:?}", outcome);
}

#[tokio::test]
async fn routes_signal_between_registered_peers() {
    let url = spawn_relay().await;
    let mut sender = connect(&url).await;
    let mut receiver = connect(&url).await;

    register(&mut sender, "sender").await;
    register(&mut receiver, "receiver").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let payload = json!({"type": "offer", "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1"});
    let envelope = json!({
        "type": "signal",
        "target": "receiver",
        "from": "sender",
        "signal": payload,
    });
    sender
        .send(Message::Text(envelope.to_string()))
        .await
        .expect("send signal");

    let relayed = next_json(&mut receiver).await;
    assert_eq!(relayed["type"], "signal");
    assert_eq!(relayed["from"], "sender");
    assert_eq!(relayed["signal"], payload);

    // Exactly one delivery.
    expect_silence(&mut receiver).await;
}

#[tokio::test]
async fn unknown_target_is_dropped_silently() {
    let url = spawn_relay().await;
    let mut sender = connect(&url).await;
    register(&mut sender, "sender").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let envelope = json!({
        "type": "signal",
        "target": "nobody",
        "from": "sender",
        "signal": {"type": "offer", "sdp": "v=0"},
    });
    sender
        .send(Message::Text(envelope.to_string()))
        .await
        .expect("send signal");

    // No error response, no echo, connection stays usable.
    expect_silence(&mut sender).await;
}

#[tokio::test]
async fn malformed_frames_do_not_affect_other_connections() {
    let url = spawn_relay().await;
    let mut broken = connect(&url).await;
    let mut sender = connect(&url).await;
    let mut receiver = connect(&url).await;

    register(&mut sender, "sender").await;
    register(&mut receiver, "receiver").await;

    broken
        .send(Message::Text("this is not json".to_string()))
        .await
        .expect("send garbage");
    broken
        .send(Message::Text(json!({"type": "mystery"}).to_string()))
        .await
        .expect("send unknown type");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let envelope = json!({
        "type": "signal",
        "target": "receiver",
        "from": "sender",
        "signal": {"type": "answer", "sdp": "v=0"},
    });
    sender
        .send(Message::Text(envelope.to_string()))
        .await
        .expect("send signal");

    let relayed = next_json(&mut receiver).await;
    assert_eq!(relayed["from"], "sender");
}

#[tokio::test]
async fn closed_channel_becomes_routing_miss() {
    let url = spawn_relay().await;
    let mut sender = connect(&url).await;
    let mut receiver = connect(&url).await;

    register(&mut sender, "sender").await;
    register(&mut receiver, "receiver").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    receiver.close(None).await.expect("close receiver");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let envelope = json!({
        "type": "signal",
        "target": "receiver",
        "from": "sender",
        "signal": {"type": "offer", "sdp": "v=0"},
    });
    sender
        .send(Message::Text(envelope.to_string()))
        .await
        .expect("send signal");

    // Silent miss: the sender hears nothing and stays connected.
    expect_silence(&mut sender).await;
}
