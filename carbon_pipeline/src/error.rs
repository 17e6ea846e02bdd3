use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Top-level pipeline error.
///
/// Soft-empty outcomes (a window with no rows, no hourly data to aggregate)
/// are not errors and never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or blank credential, raised before any I/O
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Frame construction, Parquet read/write or conformance failure
    #[error("Storage error: {0}")]
    Storage(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid period {year}-{month:02}")]
    InvalidPeriod { year: i32, month: u32 },

    /// Zone that cannot name a partition directory
    #[error("Invalid zone '{0}'")]
    InvalidZone(String),

    #[error("Partition listing error: {0}")]
    Glob(String),
}

impl From<glob::PatternError> for PipelineError {
    fn from(err: glob::PatternError) -> Self {
        PipelineError::Glob(err.to_string())
    }
}

impl From<glob::GlobError> for PipelineError {
    fn from(err: glob::GlobError) -> Self {
        PipelineError::Glob(err.to_string())
    }
}

/// Raw response could not be mapped onto the canonical schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("No datetime-like column found in API response (columns: {columns:?})")]
    NoDatetimeColumn { columns: Vec<String> },
}

/// Retries for one sub-window were exhausted.
#[derive(Error, Debug)]
#[error("Fetch failed for {zone} [{start}, {end}) after {attempts} attempts: {source}")]
pub struct FetchError {
    pub zone: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attempts: u32,
    #[source]
    pub source: AttemptFailure,
}

/// Why a single request attempt failed. Every variant is retryable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("undecodable response body: {0}")]
    Decode(String),
}

/// Failure below the HTTP status line: nothing usable came back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Short error class name, as printed by the connectivity check.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout => "Timeout",
            TransportError::Connect(_) => "ConnectionError",
            TransportError::Request(_) => "RequestException",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}
