//! Store adapter: a narrow capability boundary over the relational
//! database. Exposes existence probes, filtered cursor reads, filtered
//! counts and batched upserts keyed by natural key.

pub mod cursor;
pub mod error;
pub mod filter;
pub mod mem;
pub mod store;

pub use cursor::RecordCursor;
pub use error::StoreError;
pub use mem::MemStore;
pub use store::{PgStore, Store};
