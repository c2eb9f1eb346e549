//! SQLite storage layer.
//!
//! Job store backed by SQLite with WAL mode and split read/write connection
//! pools.

pub mod job_store;
pub mod pool;
