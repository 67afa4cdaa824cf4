//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Instrument error: {0}")]
    Core(#[from] prism_core::CoreError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] prism_ws::WsError),

    #[error("Feed error: {0}")]
    Feed(#[from] prism_feed::FeedError),

    #[error("Poll error: {0}")]
    Poll(#[from] prism_rest::PollError),

    #[error("Bus error: {0}")]
    Bus(#[from] prism_bus::SinkError),

    #[error("Book error: {0}")]
    Book(#[from] prism_book::BookError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] prism_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
