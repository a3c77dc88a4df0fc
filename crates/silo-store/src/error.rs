//! Typed errors for the store adapter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The backing store refused or lost the operation; used by the
    /// in-memory store's fault injection and for pool-level failures.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
