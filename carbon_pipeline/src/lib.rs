pub mod aggregator;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod fetcher;
pub mod frame;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod raw;
pub mod store;

pub use aggregator::{aggregate, aggregate_to};
pub use config::{PipelineConfig, RetryPolicy};
pub use connectivity::zone_quickcheck;
pub use error::{FetchError, PipelineError, Result, SchemaError};
pub use fetcher::{HttpTransport, Transport, TransportResponse, WindowRequest, WindowedFetcher};
pub use models::{CarbonRecord, Granularity, PartitionKey};
pub use normalizer::normalize;
pub use orchestrator::{IngestOutcome, Ingestor};
pub use raw::{RawTable, ResponseShape};
pub use store::{ParquetStore, PartitionStore};
