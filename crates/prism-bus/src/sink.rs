//! Bus transport abstraction.

use crate::error::SinkResult;
use bytes::Bytes;
use std::future::Future;

/// Broker acknowledgement of a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub stream: String,
    pub sequence: u64,
    /// The broker had already stored a message with the same id.
    pub duplicate: bool,
}

/// Destination of published messages.
///
/// `dedup_key` identifies the message for broker-side de-duplication:
/// publishing the same key twice stores it once.
pub trait BusSink: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn publish(
        &self,
        subject: &str,
        dedup_key: &str,
        payload: Bytes,
    ) -> impl Future<Output = SinkResult<Ack>> + Send;
}
