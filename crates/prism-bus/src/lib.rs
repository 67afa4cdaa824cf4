//! Message-bus publishing for prism.
//!
//! - `Publisher`/`PublisherHandle`: Non-blocking submission, drop-oldest
//!   queue, bounded retries
//! - `BusSink`: Transport seam, implemented by `JetStreamSink` and `MemorySink`
//! - `Envelope`: Event plus resolved stream, subject and de-duplication key

pub mod envelope;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod publisher;
pub mod sink;

pub use envelope::Envelope;
pub use error::{BusResult, PublishError, SinkError, SinkResult};
pub use jetstream::{JetStreamSink, StreamSettings};
pub use memory::{MemorySink, StoredMessage};
pub use publisher::{Publisher, PublisherConfig, PublisherHandle};
pub use sink::{Ack, BusSink};
