//! WebSocket event routing.
//!
//! One router per connection normalizes its frames and hands order-book
//! events to the instrument's worker, everything else to the publisher.
//! A full book queue drops that book's update after `book.send_timeout_ms`
//! so other instruments keep flowing; the dropped diff surfaces as a
//! sequence gap and the book resyncs.

use crate::context::PipelineContext;
use prism_book::{BookCommand, BookError};
use prism_core::{DataType, InstrumentKey, NormalizedEvent};
use prism_feed::Normalizer;
use prism_telemetry::Metrics;
use prism_ws::{RawFrame, WsEvent};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// What one connection carries.
pub struct FeedRoute {
    normalizer: Normalizer,
    keys: HashSet<InstrumentKey>,
    data_types: HashSet<DataType>,
}

impl FeedRoute {
    pub fn new(normalizer: Normalizer, keys: Vec<InstrumentKey>, data_types: Vec<DataType>) -> Self {
        Self {
            normalizer,
            keys: keys.into_iter().collect(),
            data_types: data_types.into_iter().collect(),
        }
    }

    fn accepts(&self, event: &NormalizedEvent) -> bool {
        self.keys.contains(event.key()) && self.data_types.contains(&event.data_type())
    }

    fn book_keys(&self) -> impl Iterator<Item = &InstrumentKey> {
        let books = self.data_types.contains(&DataType::Orderbook);
        self.keys.iter().filter(move |_| books)
    }
}

pub struct Router {
    connection_id: String,
    route: FeedRoute,
    rx: mpsc::Receiver<WsEvent>,
    ctx: PipelineContext,
    send_timeout: Duration,
}

impl Router {
    pub fn new(
        ctx: PipelineContext,
        connection_id: impl Into<String>,
        route: FeedRoute,
        rx: mpsc::Receiver<WsEvent>,
    ) -> Self {
        let send_timeout = Duration::from_millis(ctx.config.book.send_timeout_ms);
        Self {
            connection_id: connection_id.into(),
            route,
            rx,
            ctx,
            send_timeout,
        }
    }

    pub async fn run(mut self) {
        info!(connection = %self.connection_id, "Router started");
        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        debug!(connection = %self.connection_id, "Router stopped");
    }

    async fn handle(&self, event: WsEvent) {
        match event {
            WsEvent::Connected {
                connection,
                session,
            } => {
                Metrics::ws_connected(&connection);
                // Books derived from the previous session are void.
                for key in self.route.book_keys() {
                    let command = BookCommand::SessionReset { session };
                    if let Err(e) = self.ctx.books.send(key, command).await {
                        warn!(book = %key, error = %e, "Session reset not delivered");
                    }
                }
            }
            WsEvent::Frame(frame) => self.on_frame(frame).await,
            WsEvent::Disconnected {
                connection,
                session,
                reason,
            } => {
                Metrics::ws_disconnected(&connection);
                Metrics::ws_reconnect(&connection, "disconnected");
                info!(%connection, session, %reason, "Session ended");
            }
        }
    }

    async fn on_frame(&self, frame: RawFrame) {
        Metrics::ws_frame(&frame.connection);
        let exchange = self.route.normalizer.exchange();

        let events = match self.route.normalizer.process(&frame.text, frame.received_at) {
            Ok(events) => events,
            Err(e) => {
                Metrics::normalize_dropped(exchange.as_str(), e.reason());
                return;
            }
        };

        for event in events {
            if !self.route.accepts(&event) {
                trace!(instrument = %event.key(), data_type = %event.data_type(), "Unsubscribed event dropped");
                Metrics::normalize_dropped(exchange.as_str(), "unsubscribed");
                continue;
            }
            Metrics::normalized(exchange.as_str(), event.data_type().as_str());
            self.dispatch(event).await;
        }
    }

    async fn dispatch(&self, event: NormalizedEvent) {
        let (key, command) = match event {
            NormalizedEvent::OrderBookDiff(diff) => (diff.key.clone(), BookCommand::Diff(diff)),
            NormalizedEvent::OrderBookSnapshot(snapshot) => {
                (snapshot.key.clone(), BookCommand::Snapshot(snapshot))
            }
            other => {
                self.ctx.publisher.submit(other);
                return;
            }
        };
        match self.ctx.books.send_timeout(&key, command, self.send_timeout).await {
            Ok(()) => {}
            Err(BookError::QueueFull(_)) => {
                Metrics::book_diff_dropped(&key.to_string(), "queue_full");
                warn!(book = %key, "Book queue full, update dropped");
            }
            Err(e) => warn!(book = %key, error = %e, "Book update not delivered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use prism_book::{BookConfig, BookRegistry, OrderBookEngine, ResyncReason, ResyncRequest};
    use prism_bus::{MemorySink, Publisher, PublisherConfig};
    use prism_feed::adapter_for;
    use std::sync::Arc;
    use tokio::time::{sleep, timeout};
    use tokio_util::sync::CancellationToken;

    const CONNECTION: &str = "okx_spot.spot";

    const BOOK_UPDATE: &str = r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"update","data":[{"asks":[],"bids":[["42219.9","1","0","1"]],"ts":"1700000000100","prevSeqId":10,"seqId":11}]}"#;

    const TRADE: &str = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"130639474","px":"42219.9","sz":"0.12","side":"buy","ts":"1700000000200"}]}"#;

    const ETH_TRADE: &str = r#"{"arg":{"channel":"trades","instId":"ETH-USDT"},"data":[{"instId":"ETH-USDT","tradeId":"1","px":"2200","sz":"1","side":"sell","ts":"1700000000300"}]}"#;

    const TRADE_SUBJECT: &str = "trade.okx_spot.spot.BTC-USDT";

    struct Fixture {
        ctx: PipelineContext,
        sink: MemorySink,
        resync_rx: mpsc::Receiver<ResyncRequest>,
    }

    fn fixture() -> Fixture {
        let config = AppConfig::from_toml(
            r#"
            [[feeds]]
            exchange = "okx_spot"
            market_type = "spot"
            symbols = ["BTC-USDT"]
            data_types = ["orderbook", "trade"]

            [book]
            queue_capacity = 1
            snapshot_interval_ms = 600000
            send_timeout_ms = 10
            "#,
        )
        .unwrap();
        let sink = MemorySink::new();
        let shutdown = CancellationToken::new();
        let publisher = Publisher::new(sink.clone(), PublisherConfig::default(), &shutdown);
        let (resync_tx, resync_rx) = mpsc::channel(8);
        let ctx = PipelineContext {
            config: Arc::new(config),
            shutdown,
            publisher: publisher.handle(),
            books: BookRegistry::new(),
            resync_tx,
        };
        tokio::spawn(publisher.run());
        Fixture {
            ctx,
            sink,
            resync_rx,
        }
    }

    fn register_book(ctx: &PipelineContext) -> prism_book::BookWorker {
        let feed = &ctx.config.feeds[0];
        let adapter = adapter_for(feed.exchange, feed.market_type).unwrap();
        let key = feed.keys().remove(0);
        let book: BookConfig = ctx.config.book.clone();
        let engine =
            OrderBookEngine::new(key, adapter.sequence_rule(), adapter.checksum_rule(), book.engine);
        ctx.books.register(
            engine,
            ctx.publisher.clone(),
            ctx.resync_tx.clone(),
            book,
            &ctx.shutdown,
        )
    }

    fn spawn_router(ctx: &PipelineContext) -> mpsc::Sender<WsEvent> {
        let feed = &ctx.config.feeds[0];
        let adapter = adapter_for(feed.exchange, feed.market_type).unwrap();
        let route = FeedRoute::new(Normalizer::new(adapter), feed.keys(), feed.streamed());
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(Router::new(ctx.clone(), CONNECTION, route, rx).run());
        tx
    }

    fn frame(text: &str) -> WsEvent {
        WsEvent::Frame(RawFrame {
            connection: Arc::from(CONNECTION),
            session: 1,
            text: text.to_string(),
            received_at: 1_700_000_000_500,
        })
    }

    async fn wait_for_subject(sink: &MemorySink, subject: &str) {
        timeout(Duration::from_secs(2), async {
            while sink.count_for(subject) == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("message published within timeout");
    }

    #[tokio::test]
    async fn test_only_subscribed_events_are_published() {
        let fx = fixture();
        let tx = spawn_router(&fx.ctx);

        tx.send(frame("not json")).await.unwrap();
        tx.send(frame(ETH_TRADE)).await.unwrap();
        tx.send(frame(TRADE)).await.unwrap();
        wait_for_subject(&fx.sink, TRADE_SUBJECT).await;
        sleep(Duration::from_millis(20)).await;

        assert_eq!(fx.sink.len(), 1);
        assert_eq!(fx.sink.count_for("trade.okx_spot.spot.ETH-USDT"), 0);
        fx.ctx.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_new_session_resets_books() {
        let mut fx = fixture();
        tokio::spawn(register_book(&fx.ctx).run());
        let tx = spawn_router(&fx.ctx);

        tx.send(WsEvent::Connected {
            connection: Arc::from(CONNECTION),
            session: 3,
        })
        .await
        .unwrap();
        let request = timeout(Duration::from_secs(2), fx.resync_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.reason, ResyncReason::SessionReset);
        fx.ctx.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_full_book_queue_does_not_block_other_events() {
        let fx = fixture();
        // Registered but never run, so its queue of one fills up.
        let _worker = register_book(&fx.ctx);
        let tx = spawn_router(&fx.ctx);

        for _ in 0..3 {
            tx.send(frame(BOOK_UPDATE)).await.unwrap();
        }
        tx.send(frame(TRADE)).await.unwrap();
        wait_for_subject(&fx.sink, TRADE_SUBJECT).await;
        fx.ctx.shutdown.cancel();
    }
}
