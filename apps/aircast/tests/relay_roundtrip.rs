//! RelayClient against a real relay instance.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use aircast::protocol::{ClientEnvelope, ServerEnvelope, SignalPayload};
use aircast::relay::{RelayClient, RelayLink};
use aircast_relay::registry::Registry;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_relay() -> String {
    let registry = Arc::new(Registry::new());
    let app = aircast_relay::router(registry);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("ws://{}/ws", addr)
}

async fn raw_register(url: &str, id: &str) -> WsClient {
    let (mut ws, _) = connect_async(url).await.expect("connect");
    let frame = serde_json::json!({"type": "register", "id": id}).to_string();
    ws.send(Message::Text(frame)).await.expect("register");
    ws
}

async fn next_signal(ws: &mut WsClient) -> ServerEnvelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for signal")
            .expect("socket ended")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("parse envelope");
        }
    }
}

#[tokio::test]
async fn sends_issued_before_open_flush_exactly_once() {
    let url = spawn_relay().await;
    let mut receiver = raw_register(&url, "receiver").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = RelayClient::new(url);
    // Both issued before the socket has opened; they must queue, then flush
    // in order once it does.
    client
        .send(ClientEnvelope::Register {
            id: "sender".to_string(),
        })
        .expect("queue register");
    client
        .send(ClientEnvelope::Signal {
            target: "receiver".to_string(),
            from: "sender".to_string(),
            signal: SignalPayload::Offer {
                sdp: "v=0".to_string(),
            },
        })
        .expect("queue signal");

    let ServerEnvelope::Signal { signal, from } = next_signal(&mut receiver).await;
    assert_eq!(from, "sender");
    assert_eq!(
        signal,
        SignalPayload::Offer {
            sdp: "v=0".to_string()
        }
    );

    // Exactly once: no duplicate delivery from any retry path.
    let extra = tokio::time::timeout(Duration::from_millis(300), receiver.next()).await;
    assert!(extra.is_err(), "unexpected extra frame: {extra:?}");
}

#[tokio::test]
async fn relayed_replies_reach_the_client() {
    let url = spawn_relay().await;

    let client = RelayClient::new(url.clone());
    client
        .send(ClientEnvelope::Register {
            id: "sender".to_string(),
        })
        .expect("queue register");
    client.wait_open().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut peer = raw_register(&url, "receiver").await;
    let frame = serde_json::json!({
        "type": "signal",
        "target": "sender",
        "from": "receiver",
        "signal": {"type": "answer", "sdp": "v=0"},
    })
    .to_string();
    peer.send(Message::Text(frame)).await.expect("send signal");

    let envelope = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("timed out waiting for reply")
        .expect("relay channel ended");
    let ServerEnvelope::Signal { signal, from } = envelope;
    assert_eq!(from, "receiver");
    assert_eq!(
        signal,
        SignalPayload::Answer {
            sdp: "v=0".to_string()
        }
    );
}
