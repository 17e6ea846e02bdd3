//! Windowed, retrying client for the carbon-intensity history endpoint.

use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::{AttemptFailure, FetchError, TransportError};
use crate::raw::{RawTable, ResponseShape};
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use reqwest::blocking::Client;
use std::time::Duration;

/// Value of the granularity selector sent with every request.
pub const TEMPORAL_GRANULARITY: &str = "hourly";
pub const TOKEN_HEADER: &str = "auth-token";

/// One API call: `zone` over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    pub zone: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WindowRequest {
    pub fn new(zone: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            zone: zone.into(),
            start,
            end,
        }
    }

    /// Query parameters in the order the API documents them.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("zone", self.zone.clone()),
            ("start", iso_utc(self.start)),
            ("end", iso_utc(self.end)),
            ("temporalGranularity", TEMPORAL_GRANULARITY.to_string()),
        ]
    }
}

/// `2023-01-01T00:00:00Z`
pub fn iso_utc(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Status line and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The raw HTTP primitive under the fetcher.
pub trait Transport {
    fn get(&self, request: &WindowRequest) -> Result<TransportResponse, TransportError>;
}

/// Blocking reqwest transport with the static token header.
pub struct HttpTransport {
    client: Client,
    url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(config: &PipelineConfig) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            url: config.api_url.clone(),
            token: config.api_token.clone(),
        })
    }
}

impl Transport for HttpTransport {
    fn get(&self, request: &WindowRequest) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(&self.url)
            .header(TOKEN_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&request.query())
            .send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        Ok(TransportResponse { status, body })
    }
}

/// Issues window requests with exponential backoff and resolves the
/// response shape into a [`RawTable`].
pub struct WindowedFetcher<T: Transport> {
    transport: T,
    retry: RetryPolicy,
}

impl WindowedFetcher<HttpTransport> {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, TransportError> {
        Ok(Self::new(HttpTransport::new(config)?, config.retry))
    }
}

impl<T: Transport> WindowedFetcher<T> {
    pub fn new(transport: T, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Rows for `zone` over `[start, end)`.
    ///
    /// An empty or row-less response yields an empty table. Every failed
    /// attempt (transport error, non-2xx, undecodable body) is retried; the
    /// last failure is returned once attempts run out.
    pub fn fetch(
        &self,
        zone: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RawTable, FetchError> {
        let request = WindowRequest::new(zone, start, end);
        let mut attempt = 0;
        loop {
            match self.attempt(&request) {
                Ok(table) => {
                    debug!(
                        "[{}] {} -> {}: {} rows",
                        zone,
                        iso_utc(start),
                        iso_utc(end),
                        table.len()
                    );
                    return Ok(table);
                }
                Err(failure) if attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "[{}] attempt {}/{} failed ({}), retrying in {:?}",
                        zone,
                        attempt + 1,
                        self.retry.max_attempts,
                        failure,
                        delay
                    );
                    sleep(delay);
                    attempt += 1;
                }
                Err(failure) => {
                    return Err(FetchError {
                        zone: zone.to_string(),
                        start,
                        end,
                        attempts: attempt + 1,
                        source: failure,
                    })
                }
            }
        }
    }

    fn attempt(&self, request: &WindowRequest) -> Result<RawTable, AttemptFailure> {
        let response = self.transport.get(request)?;
        if !response.is_success() {
            return Err(AttemptFailure::Status(response.status));
        }
        if response.body.trim().is_empty() {
            return Ok(RawTable::new());
        }
        let body: serde_json::Value = serde_json::from_str(&response.body)
            .map_err(|e| AttemptFailure::Decode(e.to_string()))?;
        Ok(ResponseShape::classify(body).into_table())
    }
}

fn sleep(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
