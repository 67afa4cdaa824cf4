//! End-to-end pipeline test: mock venue WebSocket in, in-memory bus out.

use futures_util::{SinkExt, StreamExt};
use prism_bus::MemorySink;
use prism_collector::{AppConfig, Application};
use prism_core::{resolve_stream_subject, DataType, Exchange, MarketType, StreamKind};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;
use tokio_tungstenite::{accept_async, tungstenite::Message};

const BOOK_SNAPSHOT: &str = r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot","data":[{"asks":[["42220.1","1.5","0","3"],["42221","2","0","1"]],"bids":[["42219.9","0.8","0","2"],["42219","4","0","5"]],"ts":"1700000000000","prevSeqId":-1,"seqId":10}]}"#;

const BOOK_UPDATE: &str = r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"update","data":[{"asks":[],"bids":[["42219.9","0","0","0"]],"ts":"1700000000100","prevSeqId":10,"seqId":11}]}"#;

const TRADE: &str = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"130639474","px":"42219.9","sz":"0.12","side":"buy","ts":"1700000000200"}]}"#;

const UNSUBSCRIBED_TRADE: &str = r#"{"arg":{"channel":"trades","instId":"ETH-USDT"},"data":[{"instId":"ETH-USDT","tradeId":"1","px":"2200","sz":"1","side":"sell","ts":"1700000000300"}]}"#;

/// Accepts one session, waits for the subscription, then pushes `frames`
/// and keeps answering text pings.
async fn mock_venue(frames: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                if text.contains("subscribe") {
                    break;
                }
            }
        }
        for frame in frames {
            ws.send(Message::Text(frame.to_string())).await.unwrap();
        }
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                if text == "ping" {
                    let _ = ws.send(Message::Text("pong".to_string())).await;
                }
            }
        }
    });

    format!("ws://{addr}")
}

fn subject(kind: StreamKind, data_type: DataType, symbol: &str) -> String {
    resolve_stream_subject(kind, data_type, Exchange::OkxSpot, MarketType::Spot, symbol).unwrap()
}

#[tokio::test]
async fn test_stream_frames_reach_the_bus() {
    let url = mock_venue(vec![BOOK_SNAPSHOT, BOOK_UPDATE, TRADE, UNSUBSCRIBED_TRADE]).await;
    let config = AppConfig::from_toml(&format!(
        r#"
        shutdown_grace_ms = 2000

        [[feeds]]
        exchange = "okx_spot"
        market_type = "spot"
        symbols = ["BTC-USDT"]
        data_types = ["orderbook", "trade"]
        ws_url = "{url}"

        [book]
        snapshot_interval_ms = 600000
        "#
    ))
    .unwrap();

    let sink = MemorySink::new();
    let app = assert_ok!(Application::new(config));
    let pipeline = assert_ok!(app.start(sink.clone()));

    let snapshot_subject = subject(StreamKind::Snapshot, DataType::Orderbook, "BTC-USDT");
    let diff_subject = subject(StreamKind::Incremental, DataType::Orderbook, "BTC-USDT");
    let trade_subject = subject(StreamKind::Incremental, DataType::Trade, "BTC-USDT");

    timeout(Duration::from_secs(5), async {
        while sink.count_for(&snapshot_subject) == 0
            || sink.count_for(&diff_subject) == 0
            || sink.count_for(&trade_subject) == 0
        {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("snapshot, diff and trade published");

    assert_eq!(sink.count_for(&diff_subject), 1);
    assert_eq!(sink.count_for(&trade_subject), 1);
    assert_eq!(
        sink.count_for(&subject(StreamKind::Incremental, DataType::Trade, "ETH-USDT")),
        0
    );

    let snapshot = sink
        .messages()
        .into_iter()
        .find(|m| m.subject == snapshot_subject)
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&snapshot.payload).unwrap();
    assert_eq!(body["type"], "order_book_snapshot");
    assert_eq!(body["sequence"], 10);

    let books = pipeline.context().books.clone();
    assert_eq!(books.len(), 1);
    pipeline.stop().await;
}

#[test]
fn test_shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
    let config = assert_ok!(AppConfig::from_file(path));
    assert_eq!(config.feeds.len(), 5);
    assert_eq!(config.telemetry.metrics_addr.as_deref(), Some("0.0.0.0:9090"));
}
