//! Typed errors for the pipeline crate.

use thiserror::Error;

use silo_model::{Format, RecordKind};
use silo_store::StoreError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The (kind, format) combination has no decoder or serialiser.
    /// Surfaced synchronously at the request boundary as a 400.
    #[error("unsupported format '{format}' for resource '{kind}'")]
    UnsupportedFormat { kind: RecordKind, format: Format },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// An existence probe failed mid-validation; operational, aborts
    /// the job.
    #[error("existence probe failed: {0}")]
    Probe(#[source] anyhow::Error),
}
