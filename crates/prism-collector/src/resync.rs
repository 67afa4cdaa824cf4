//! Snapshot recovery for books that asked for one.
//!
//! REST-snapshot venues get a depth fetch; stream-snapshot venues get the
//! book channel re-subscribed, which makes the venue push a new snapshot.

use crate::context::PipelineContext;
use dashmap::DashSet;
use prism_book::{BookCommand, BookRegistry, ResyncReason, ResyncRequest};
use prism_core::{Exchange, InstrumentKey, MarketType};
use prism_feed::ExchangeAdapter;
use prism_rest::SnapshotClient;
use prism_ws::WsWriteHandle;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How a venue market delivers fresh snapshots.
#[derive(Clone)]
pub enum SnapshotTarget {
    Rest(SnapshotClient),
    Stream {
        adapter: Arc<dyn ExchangeAdapter>,
        writer: WsWriteHandle,
    },
}

pub struct ResyncDispatcher {
    targets: HashMap<(Exchange, MarketType), SnapshotTarget>,
    rx: mpsc::Receiver<ResyncRequest>,
    ctx: PipelineContext,
    in_flight: Arc<DashSet<InstrumentKey>>,
}

impl ResyncDispatcher {
    pub fn new(ctx: PipelineContext, rx: mpsc::Receiver<ResyncRequest>) -> Self {
        Self {
            targets: HashMap::new(),
            rx,
            ctx,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn add_target(&mut self, exchange: Exchange, market_type: MarketType, target: SnapshotTarget) {
        self.targets.insert((exchange, market_type), target);
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => self.dispatch(request),
                    None => break,
                },
            }
        }
        debug!("Resync dispatcher stopped");
    }

    fn dispatch(&self, request: ResyncRequest) {
        let ResyncRequest { key, reason } = request;
        let Some(target) = self.targets.get(&(key.exchange, key.market_type)).cloned() else {
            warn!(book = %key, "No snapshot source for book");
            return;
        };

        // The reconnect already re-subscribed the book channel.
        if reason == ResyncReason::SessionReset && matches!(target, SnapshotTarget::Stream { .. }) {
            debug!(book = %key, "Snapshot follows the new session's subscription");
            return;
        }

        if !self.in_flight.insert(key.clone()) {
            debug!(book = %key, reason = reason.as_str(), "Snapshot already requested");
            return;
        }

        info!(book = %key, reason = reason.as_str(), "Requesting snapshot");
        let books = self.ctx.books.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let command = recover(&target, &key).await;
            in_flight.remove(&key);
            deliver(&books, &key, command).await;
        });
    }
}

async fn recover(target: &SnapshotTarget, key: &InstrumentKey) -> Option<BookCommand> {
    match target {
        SnapshotTarget::Rest(client) => Some(match client.fetch_depth(key).await {
            Ok(snapshot) => BookCommand::Snapshot(snapshot),
            Err(e) => BookCommand::SnapshotFailed {
                error: e.to_string(),
            },
        }),
        SnapshotTarget::Stream { adapter, writer } => {
            for message in adapter.resubscribe_payload(key) {
                if let Err(e) = writer.send_text(message).await {
                    return Some(BookCommand::SnapshotFailed {
                        error: e.to_string(),
                    });
                }
            }
            // The snapshot arrives as a regular frame.
            None
        }
    }
}

async fn deliver(books: &BookRegistry, key: &InstrumentKey, command: Option<BookCommand>) {
    let Some(command) = command else {
        return;
    };
    if let Err(e) = books.send(key, command).await {
        warn!(book = %key, error = %e, "Snapshot result not delivered");
    }
}
