//! Streaming ingest/export pipeline.
//!
//! Imports decode a local file lazily, validate records in fixed-size
//! batches, persist accepted rows through the store and report progress
//! to the job registry. Exports pull a store cursor and serialise
//! row-by-row, either into a chunked response stream or into a file
//! under the export directory.

pub mod cancel;
mod decode;
pub mod error;
pub mod export;
pub mod import;

pub use cancel::CancelToken;
pub use error::PipelineError;
pub use export::{export_supported, run_export, stream_export, ExportStream, ExportSummary};
pub use import::{import_supported, run_import, ImportSummary, BATCH_SIZE};
