//! Main application orchestration.
//!
//! Builds the pipeline from configuration:
//! - One connection manager and router per feed with streamed data types
//! - One book worker per order-book instrument
//! - One poll task per (instrument, polled data type)
//! - The resync dispatcher and the publisher drain loop
//! - The metrics server, when configured

use crate::config::AppConfig;
use crate::context::PipelineContext;
use crate::error::AppResult;
use crate::resync::{ResyncDispatcher, SnapshotTarget};
use crate::router::{FeedRoute, Router};
use crate::server::run_server;
use futures_util::future::join_all;
use prism_book::{BookRegistry, OrderBookEngine};
use prism_bus::{BusSink, JetStreamSink, MemorySink, Publisher};
use prism_core::{DataType, SnapshotSource};
use prism_feed::{adapter_for, Normalizer};
use prism_rest::{PollScheduler, Poller, RestClient, SnapshotClient};
use prism_ws::{ConnectionConfig, ConnectionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application.
pub struct Application {
    config: Arc<AppConfig>,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Cancelling this token stops the application.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until Ctrl-C or shutdown.
    ///
    /// With `dry_run` events are kept in memory instead of going to NATS.
    pub async fn run(self, dry_run: bool) -> AppResult<()> {
        if dry_run {
            info!("Dry run, events are not published to the bus");
            return self.run_with_sink(MemorySink::new()).await;
        }

        let sink = JetStreamSink::connect(&self.config.bus.url).await?;
        sink.ensure_streams(&self.config.bus.streams).await?;
        self.run_with_sink(sink).await
    }

    pub async fn run_with_sink<S: BusSink>(self, sink: S) -> AppResult<()> {
        let pipeline = self.start(sink)?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Ctrl-C received, shutting down");
            }
            _ = self.shutdown.cancelled() => {}
        }

        pipeline.stop().await;
        Ok(())
    }

    /// Spawn every pipeline task.
    pub fn start<S: BusSink>(&self, sink: S) -> AppResult<Pipeline> {
        let config = &self.config;
        let shutdown = &self.shutdown;

        let publisher = Publisher::new(sink, config.bus.publisher.clone(), shutdown);
        let (resync_tx, resync_rx) = mpsc::channel(config.resync.queue_capacity);
        let ctx = PipelineContext {
            config: config.clone(),
            shutdown: shutdown.clone(),
            publisher: publisher.handle(),
            books: BookRegistry::new(),
            resync_tx,
        };
        let mut tasks = vec![tokio::spawn(publisher.run())];

        let rest = Arc::new(RestClient::new(config.rest.clone())?);
        let mut resync = ResyncDispatcher::new(ctx.clone(), resync_rx);
        let scheduler = PollScheduler::new(ctx.publisher.clone(), shutdown);

        for feed in &config.feeds {
            let adapter = adapter_for(feed.exchange, feed.market_type)?;
            let keys = feed.keys();
            let connection_id = feed.connection_id();

            if feed.wants(DataType::Orderbook) {
                for key in &keys {
                    let engine = OrderBookEngine::new(
                        key.clone(),
                        adapter.sequence_rule(),
                        adapter.checksum_rule(),
                        config.book.engine,
                    );
                    let worker = ctx.books.register(
                        engine,
                        ctx.publisher.clone(),
                        ctx.resync_tx.clone(),
                        config.book.clone(),
                        shutdown,
                    );
                    tasks.push(tokio::spawn(worker.run()));
                }
            }

            let streamed = feed.streamed();
            if !streamed.is_empty() {
                let mut ws_config = ConnectionConfig::from(&config.websocket);
                ws_config.connection_id = connection_id.clone();
                ws_config.url = feed.ws_url();
                ws_config.heartbeat = adapter.heartbeat_policy();
                ws_config.subscribe_messages = adapter.subscribe_payload(&feed.symbols, &streamed);

                let (event_tx, event_rx) = mpsc::channel(config.websocket.event_queue_capacity);
                let manager = Arc::new(ConnectionManager::new(ws_config, event_tx, shutdown));

                if feed.wants(DataType::Orderbook) {
                    let target = match adapter.snapshot_source() {
                        SnapshotSource::Rest => SnapshotTarget::Rest(SnapshotClient::new(
                            rest.clone(),
                            adapter.clone(),
                            config.resync.fetch_depth,
                        )),
                        SnapshotSource::Stream => SnapshotTarget::Stream {
                            adapter: adapter.clone(),
                            writer: manager.write_handle(),
                        },
                    };
                    resync.add_target(feed.exchange, feed.market_type, target);
                }

                let route = FeedRoute::new(Normalizer::new(adapter.clone()), keys.clone(), streamed);
                let router = Router::new(ctx.clone(), connection_id.clone(), route, event_rx);
                tasks.push(tokio::spawn(router.run()));

                tasks.push(tokio::spawn(async move {
                    if let Err(e) = manager.run().await {
                        error!(connection = %manager.connection_id(), error = %e, "Connection manager stopped");
                    }
                }));
            }

            let poller = Poller::new(rest.clone(), adapter.clone());
            for data_type in feed.polled() {
                let Some(interval) = config.polling.interval_for(data_type) else {
                    continue;
                };
                for key in &keys {
                    tasks.push(scheduler.spawn(poller.clone(), key.clone(), data_type, interval));
                }
            }

            info!(
                feed = %connection_id,
                symbols = ?feed.symbols,
                data_types = ?feed.data_types,
                "Feed configured"
            );
        }

        tasks.push(tokio::spawn(resync.run()));

        if let Some(addr) = config.telemetry.metrics_addr.clone() {
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = run_server(&addr, token).await {
                    error!(%addr, error = %e, "Metrics server failed");
                }
            }));
        }

        info!(
            feeds = config.feeds.len(),
            books = ctx.books.len(),
            tasks = tasks.len(),
            "Pipeline started"
        );

        Ok(Pipeline {
            ctx,
            tasks,
            grace: config.shutdown_grace(),
        })
    }
}

/// Running pipeline tasks.
pub struct Pipeline {
    ctx: PipelineContext,
    tasks: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl Pipeline {
    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Cancel every task and wait up to the grace period before aborting.
    pub async fn stop(self) {
        let Pipeline {
            ctx, mut tasks, grace,
        } = self;
        ctx.shutdown.cancel();

        let finished = tokio::time::timeout(grace, join_all(tasks.iter_mut())).await;
        match finished {
            Ok(_) => info!("Pipeline stopped"),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "Shutdown grace elapsed, aborting tasks");
                for task in &tasks {
                    task.abort();
                }
            }
        }
    }
}
