//! Push Transport Integration Tests
//!
//! Drives the `/ws` route with a real WebSocket client and checks the
//! subscribe / update / unsubscribe flow against the broadcaster.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use market_feed_aggregator::infrastructure::config::OrchestratorSettings;
use market_feed_aggregator::infrastructure::server::router;
use market_feed_aggregator::{
    AppState, CanonicalRecord, ProcessingPipeline, Resolution, SessionOrchestrator,
    SubscriptionBroadcaster,
};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serve the public router on a random port.
async fn setup_server() -> (String, Arc<SubscriptionBroadcaster>) {
    let broadcaster = Arc::new(SubscriptionBroadcaster::new(
        Arc::new(ProcessingPipeline::default()),
        16,
    ));
    let orchestrator = Arc::new(SessionOrchestrator::new(OrchestratorSettings::default(), None));
    let app = router(AppState::new(Arc::clone(&broadcaster), orchestrator));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/ws"), broadcaster)
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(client: &mut Client, value: &Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

fn candle(symbol: &str, ts: i64) -> CanonicalRecord {
    CanonicalRecord {
        symbol: symbol.to_string(),
        exchange: "binance".to_string(),
        timestamp: ts,
        open: 100.0,
        high: 102.0,
        low: 99.0,
        close: 101.0,
        volume: 4.0,
        resolution: Resolution::OneMinute,
        source: "binance_futures".to_string(),
        aggregated_from: None,
        raw: Value::Null,
    }
}

async fn wait_for_clients(broadcaster: &SubscriptionBroadcaster, expected: usize) {
    for _ in 0..100 {
        if broadcaster.get_client_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client count never reached {expected}");
}

// =============================================================================
// Handshake and Control Messages
// =============================================================================

#[tokio::test]
async fn welcome_then_ping_pong() {
    let (url, broadcaster) = setup_server().await;
    let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    let welcome = next_json(&mut client).await;
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["clientId"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(broadcaster.get_client_count(), 1);

    send_json(&mut client, &json!({"type": "ping"})).await;
    let pong = next_json(&mut client).await;
    assert_eq!(pong["type"], "pong");
    assert!(pong["timestamp"].as_i64().is_some());
}

#[tokio::test]
async fn malformed_message_gets_error_and_connection_survives() {
    let (url, _broadcaster) = setup_server().await;
    let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let _ = next_json(&mut client).await;

    client.send(Message::Text("{not json".into())).await.unwrap();
    assert_eq!(next_json(&mut client).await["type"], "error");

    send_json(&mut client, &json!({"type": "teleport"})).await;
    assert_eq!(next_json(&mut client).await["type"], "error");

    send_json(&mut client, &json!({"type": "ping"})).await;
    assert_eq!(next_json(&mut client).await["type"], "pong");
}

// =============================================================================
// Updates
// =============================================================================

#[tokio::test]
async fn subscribed_client_receives_only_its_symbols() {
    let (url, broadcaster) = setup_server().await;
    let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let _ = next_json(&mut client).await;

    send_json(
        &mut client,
        &json!({"type": "subscribe", "symbol": "binance:btcusdt", "indicators": ["rsi"]}),
    )
    .await;
    let ack = next_json(&mut client).await;
    assert_eq!(ack["type"], "subscribed");
    assert_eq!(ack["symbol"], "binance:BTCUSDT");
    assert_eq!(ack["indicators"], json!(["rsi"]));

    let other = broadcaster.broadcast(&candle("ETHUSDT", 60_000));
    assert_eq!(other.delivered, 0);
    let mine = broadcaster.broadcast(&candle("BTCUSDT", 60_000));
    assert_eq!(mine.delivered, 1);

    let update = next_json(&mut client).await;
    assert_eq!(update["type"], "ohlcv_update");
    assert_eq!(update["data"]["symbol"], "BTCUSDT");
    assert_eq!(update["data"]["close"], 101.0);
}

#[tokio::test]
async fn unsubscribe_all_stops_updates() {
    let (url, broadcaster) = setup_server().await;
    let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let _ = next_json(&mut client).await;

    send_json(&mut client, &json!({"type": "subscribe", "symbol": "binance:BTCUSDT"})).await;
    let _ = next_json(&mut client).await;
    send_json(&mut client, &json!({"type": "unsubscribe"})).await;
    assert_eq!(next_json(&mut client).await["type"], "unsubscribed_all");

    assert_eq!(broadcaster.broadcast(&candle("BTCUSDT", 1)).delivered, 0);

    send_json(&mut client, &json!({"type": "list_symbols"})).await;
    let list = next_json(&mut client).await;
    assert_eq!(list["type"], "symbol_list");
    assert_eq!(list["symbols"], json!(["binance:BTCUSDT"]));
}

#[tokio::test]
async fn disconnect_removes_client() {
    let (url, broadcaster) = setup_server().await;
    let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let _ = next_json(&mut client).await;
    send_json(&mut client, &json!({"type": "subscribe", "symbol": "binance:BTCUSDT"})).await;
    let _ = next_json(&mut client).await;

    client.close(None).await.unwrap();
    drop(client);
    wait_for_clients(&broadcaster, 0).await;

    assert_eq!(broadcaster.broadcast(&candle("BTCUSDT", 1)).delivered, 0);
}
