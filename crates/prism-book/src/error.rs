//! Order-book error types.

use prism_core::InstrumentKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BookError {
    #[error("Event for {got} routed to the {expected} book")]
    WrongInstrument {
        expected: InstrumentKey,
        got: InstrumentKey,
    },

    #[error("Diff sequence range inverted: first={first}, last={last}")]
    InvertedRange { first: u64, last: u64 },

    #[error("Book worker for {0} is gone")]
    WorkerClosed(InstrumentKey),

    #[error("Book queue for {0} is full")]
    QueueFull(InstrumentKey),
}

pub type BookResult<T> = Result<T, BookError>;
