//! In-process job directory and idempotency ledger.
//!
//! Neither structure is persisted: jobs in flight at shutdown are lost
//! by design. Both are pruned on a schedule by the server's sweeper.

pub mod error_log;
pub mod idempotency;
pub mod job;
pub mod registry;

pub use error_log::BoundedErrorLog;
pub use idempotency::IdempotencyLedger;
pub use job::{ExportJob, ImportJob, JobStatus};
pub use registry::{JobRegistry, RegistryStats, StatusCounts};
