//! Publisher integration tests against the in-memory sink.

use prism_bus::{Envelope, MemorySink, PublishError, Publisher, PublisherConfig};
use prism_core::{
    Exchange, InstrumentKey, Liquidation, MarketType, NormalizedEvent, Price, RetryPolicy, Side,
    Size, Trade,
};
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

fn trade(trade_id: &str, ingested_at: i64) -> NormalizedEvent {
    NormalizedEvent::Trade(Trade {
        key: InstrumentKey::new(Exchange::BinanceSpot, MarketType::Spot, "BTC-USDT"),
        trade_id: trade_id.to_string(),
        price: Price::new(dec!(50000)),
        quantity: Size::new(dec!(0.25)),
        side: Side::Buy,
        exchange_ts: 1_700_000_000_000,
        ingested_at,
    })
}

fn config(queue_capacity: usize) -> PublisherConfig {
    PublisherConfig {
        queue_capacity,
        ack_timeout_ms: 1_000,
        retry: RetryPolicy::new(3, 1, 5),
    }
}

async fn wait_for_len(sink: &MemorySink, len: usize) {
    timeout(Duration::from_secs(3), async {
        while sink.len() < len {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("messages published within timeout");
}

#[tokio::test]
async fn test_replayed_event_has_single_downstream_effect() {
    let sink = MemorySink::new();
    let shutdown = CancellationToken::new();
    let publisher = Publisher::new(sink.clone(), config(100), &shutdown);
    let handle = publisher.handle();
    let task = tokio::spawn(publisher.run());

    // Same trade observed twice, e.g. around a reconnect.
    handle.submit(trade("991", 10));
    handle.submit(trade("991", 25));
    handle.submit(trade("992", 30));
    wait_for_len(&sink, 2).await;
    sleep(Duration::from_millis(20)).await;

    assert_eq!(sink.len(), 2);
    assert_eq!(sink.count_for("trade.binance_spot.spot.BTC-USDT"), 2);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_same_millisecond_liquidations_are_all_stored() {
    let sink = MemorySink::new();
    let shutdown = CancellationToken::new();
    let publisher = Publisher::new(sink.clone(), config(100), &shutdown);
    let handle = publisher.handle();
    let task = tokio::spawn(publisher.run());

    for price in [dec!(50000), dec!(49990)] {
        handle.submit(NormalizedEvent::Liquidation(Liquidation {
            key: InstrumentKey::new(Exchange::DeribitDerivatives, MarketType::Perpetual, "BTC-USD"),
            trade_id: None,
            side: Side::Sell,
            price: Price::new(price),
            quantity: Size::new(dec!(500)),
            exchange_ts: 1_700_000_000_000,
            ingested_at: 1_700_000_000_005,
        }));
    }
    wait_for_len(&sink, 2).await;

    assert_eq!(
        sink.count_for("liquidation.deribit_derivatives.perpetual.BTC-USD"),
        2
    );

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_publish_retries_then_succeeds() {
    let sink = MemorySink::new();
    let shutdown = CancellationToken::new();
    let publisher = Publisher::new(sink.clone(), config(10), &shutdown);

    sink.fail_next(2);
    let envelope = Envelope::new(trade("1", 1)).unwrap();
    let ack = publisher.publish(&envelope).await.unwrap();
    assert!(!ack.duplicate);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn test_publish_gives_up_after_budget() {
    let sink = MemorySink::new();
    let shutdown = CancellationToken::new();
    let publisher = Publisher::new(sink.clone(), config(10), &shutdown);

    sink.fail_next(10);
    let envelope = Envelope::new(trade("1", 1)).unwrap();
    match publisher.publish(&envelope).await {
        Err(PublishError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_queue_drops_oldest_under_backpressure() {
    let sink = MemorySink::new();
    let shutdown = CancellationToken::new();
    let publisher = Publisher::new(sink.clone(), config(2), &shutdown);
    let handle = publisher.handle();

    // Nothing drains yet.
    handle.submit(trade("1", 1));
    handle.submit(trade("2", 2));
    handle.submit(trade("3", 3));
    assert_eq!(handle.dropped(), 1);
    assert_eq!(handle.queue_depth(), 2);

    let task = tokio::spawn(publisher.run());
    wait_for_len(&sink, 2).await;

    let keys: Vec<String> = sink.messages().into_iter().map(|m| m.dedup_key).collect();
    assert_eq!(
        keys,
        vec!["trade:binance_spot:BTC-USDT:2", "trade:binance_spot:BTC-USDT:3"]
    );

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flushes_queue() {
    let sink = MemorySink::new();
    let shutdown = CancellationToken::new();
    let publisher = Publisher::new(sink.clone(), config(100), &shutdown);
    let handle = publisher.handle();

    for i in 0..5 {
        handle.submit(trade(&i.to_string(), i));
    }
    shutdown.cancel();
    publisher.run().await;
    assert_eq!(sink.len(), 5);
}
