//! Shared handles built once at startup and passed to every task.

use crate::config::AppConfig;
use prism_book::{BookRegistry, ResyncRequest};
use prism_bus::PublisherHandle;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<AppConfig>,
    pub shutdown: CancellationToken,
    pub publisher: PublisherHandle,
    pub books: BookRegistry,
    pub resync_tx: mpsc::Sender<ResyncRequest>,
}
