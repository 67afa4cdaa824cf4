//! HTTP GET with retry, shared by the poller and the snapshot client.

use crate::config::RestConfig;
use crate::error::{PollError, PollResult};
use prism_core::{retry_with_backoff, Exchange, RetryError};
use prism_feed::RestRequest;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub struct RestClient {
    client: Client,
    config: RestConfig,
}

impl RestClient {
    pub fn new(config: RestConfig) -> PollResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PollError::Client(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    /// GET `request` against the venue's base URL and parse the body as JSON.
    ///
    /// Retryable failures are retried under the configured policy; the
    /// final error is `RetriesExhausted` carrying the last failure.
    pub async fn get_json(&self, exchange: Exchange, request: &RestRequest) -> PollResult<Value> {
        let url = format!(
            "{}{}",
            self.config.endpoints.base_url(exchange).trim_end_matches('/'),
            request.path
        );

        let result = retry_with_backoff(
            &self.config.retry,
            |attempt| {
                let url = url.as_str();
                async move {
                    debug!(%url, attempt, "REST request");
                    self.get_once(url, &request.query).await
                }
            },
            PollError::is_retryable,
        )
        .await;

        match result {
            Ok(body) => Ok(body),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(%url, attempts, error = %last, "REST request failed, retries exhausted");
                Err(PollError::RetriesExhausted {
                    attempts,
                    last: Box::new(last),
                })
            }
            Err(RetryError::Aborted { error, .. }) => Err(error),
        }
    }

    async fn get_once(&self, url: &str, query: &[(String, String)]) -> PollResult<Value> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PollError::RateLimited);
        }
        if !status.is_success() {
            return Err(PollError::Status {
                status: status.as_u16(),
                body: truncate(&body, 256),
            });
        }
        parse_body(&body)
    }
}

fn transport_error(e: reqwest::Error) -> PollError {
    if e.is_timeout() {
        PollError::Timeout
    } else {
        PollError::Transport(e.to_string())
    }
}

fn parse_body(body: &str) -> PollResult<Value> {
    if body.trim().is_empty() {
        return Err(PollError::ParseFailure("empty body".to_string()));
    }
    serde_json::from_str(body).map_err(|e| PollError::ParseFailure(e.to_string()))
}

fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}
