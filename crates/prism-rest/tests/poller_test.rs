//! Poller behaviour against a local scripted HTTP server.

use prism_bus::{MemorySink, Publisher, PublisherConfig};
use prism_core::{
    resolve_subject, DataType, Exchange, InstrumentKey, MarketType, NormalizedEvent, RetryPolicy,
};
use prism_feed::adapter_for;
use prism_rest::{
    PollError, PollScheduler, Poller, RestClient, RestConfig, RestEndpoints, SnapshotClient,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

/// Serves `responses` in order, repeating the last one. Returns the base URL
/// and the hit counter.
async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let (status, body) = responses[n.min(responses.len() - 1)];

            let mut buf = vec![0u8; 8192];
            let mut read = 0;
            while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf[read..]).await {
                    Ok(0) | Err(_) => break,
                    Ok(m) => read += m,
                }
            }

            let response = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{addr}"), hits)
}

fn client(base_url: &str, max_attempts: u32) -> Arc<RestClient> {
    let config = RestConfig {
        timeout_ms: 2_000,
        retry: RetryPolicy::new(max_attempts, 1, 5),
        endpoints: RestEndpoints::uniform(base_url),
    };
    Arc::new(RestClient::new(config).unwrap())
}

fn futures_key() -> InstrumentKey {
    InstrumentKey::new(Exchange::BinanceDerivatives, MarketType::Perpetual, "BTC-USDT")
}

fn futures_poller(base_url: &str, max_attempts: u32) -> Poller {
    let adapter = adapter_for(Exchange::BinanceDerivatives, MarketType::Perpetual).unwrap();
    Poller::new(client(base_url, max_attempts), adapter)
}

const PREMIUM_INDEX: &str = r#"{"symbol":"BTCUSDT","markPrice":"50010.5","indexPrice":"50000.1","lastFundingRate":"0.0001","nextFundingTime":1700006400000,"time":1700000000000}"#;

#[tokio::test]
async fn test_rate_limited_endpoint_hit_exactly_max_attempts() {
    let (url, hits) = serve(vec![(429, r#"{"code":-1003}"#)]).await;
    let poller = futures_poller(&url, 3);

    let err = poller
        .fetch(&futures_key(), DataType::FundingRate)
        .await
        .unwrap_err();

    match err {
        PollError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, PollError::RateLimited));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_server_error_then_success() {
    let (url, hits) = serve(vec![(503, ""), (200, PREMIUM_INDEX)]).await;
    let poller = futures_poller(&url, 3);

    let event = assert_ok!(poller.fetch(&futures_key(), DataType::FundingRate).await);

    let NormalizedEvent::FundingRate(funding) = event else {
        panic!("expected funding rate");
    };
    assert_eq!(funding.funding_rate.to_string(), "0.0001");
    assert_eq!(funding.next_funding_time, Some(1_700_006_400_000));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let (url, hits) = serve(vec![(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#)]).await;
    let poller = futures_poller(&url, 5);

    let err = assert_err!(poller.fetch(&futures_key(), DataType::OpenInterest).await);

    assert!(matches!(err, PollError::Status { status: 400, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bad_bodies() {
    let (url, hits) = serve(vec![(200, "")]).await;
    let err = futures_poller(&url, 3)
        .fetch(&futures_key(), DataType::FundingRate)
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::ParseFailure(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let (url, _) = serve(vec![(200, "not json")]).await;
    let err = futures_poller(&url, 3)
        .fetch(&futures_key(), DataType::FundingRate)
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::ParseFailure(_)));

    let (url, _) = serve(vec![(200, r#"{"symbol":"BTCUSDT"}"#)]).await;
    let err = futures_poller(&url, 3)
        .fetch(&futures_key(), DataType::FundingRate)
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::SchemaMismatch(_)));
}

#[tokio::test]
async fn test_unsupported_data_type_makes_no_request() {
    let (url, hits) = serve(vec![(200, "{}")]).await;
    let adapter = adapter_for(Exchange::BinanceSpot, MarketType::Spot).unwrap();
    let poller = Poller::new(client(&url, 3), adapter);
    let key = InstrumentKey::new(Exchange::BinanceSpot, MarketType::Spot, "BTC-USDT");

    let err = poller.fetch(&key, DataType::FundingRate).await.unwrap_err();

    assert!(matches!(err, PollError::Unsupported(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_depth_snapshot() {
    let body = r#"{"lastUpdateId":1027024,"bids":[["4.00000000","431.00000000"]],"asks":[["4.00000200","12.00000000"]]}"#;
    let (url, _) = serve(vec![(200, body)]).await;
    let adapter = adapter_for(Exchange::BinanceSpot, MarketType::Spot).unwrap();
    let snapshots = SnapshotClient::new(client(&url, 3), adapter, 100);
    let key = InstrumentKey::new(Exchange::BinanceSpot, MarketType::Spot, "BTC-USDT");

    let snapshot = assert_ok!(snapshots.fetch_depth(&key).await);

    assert_eq!(snapshot.sequence, 1_027_024);
    assert_eq!(snapshot.bids.len(), 1);
    assert_eq!(snapshot.asks[0].price.to_string(), "4.00000200");
    assert_eq!(snapshot.exchange_ts, snapshot.retrieved_at);
}

#[tokio::test]
async fn test_scheduler_keeps_polling_through_failures() {
    let (url, hits) = serve(vec![(500, ""), (500, ""), (200, PREMIUM_INDEX)]).await;
    let shutdown = CancellationToken::new();
    let sink = MemorySink::new();
    let publisher = Publisher::new(sink.clone(), PublisherConfig::default(), &shutdown);
    let scheduler = PollScheduler::new(publisher.handle(), &shutdown);
    let publisher_task = tokio::spawn(publisher.run());

    // Single attempt per tick: the first two ticks fail outright.
    let poll_task = scheduler.spawn(
        futures_poller(&url, 1),
        futures_key(),
        DataType::FundingRate,
        Duration::from_millis(20),
    );

    timeout(Duration::from_secs(3), async {
        while sink.is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("funding rate published");
    assert!(hits.load(Ordering::SeqCst) >= 3);

    shutdown.cancel();
    poll_task.await.unwrap();
    publisher_task.await.unwrap();
    let expected = resolve_subject(
        DataType::FundingRate,
        Exchange::BinanceDerivatives,
        MarketType::Perpetual,
        "BTC-USDT",
    )
    .unwrap();
    assert_eq!(sink.messages()[0].subject, expected);
}
