//! Job store trait definition.
//!
//! Defines the persistence interface for finished job versions. The
//! infrastructure layer (jobweave-infra) implements it in memory and on
//! SQLite. The engine uses exactly two operations: write a completed
//! document, and fetch one document back by filter when a reference cannot
//! be served from the in-run output cache.

use jobweave_types::document::{DocumentFilter, JobDocument};
use jobweave_types::error::RepositoryError;

/// Storage for completed job documents.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait JobStore: Send + Sync {
    /// Persist a completed job version.
    ///
    /// Fails with `RepositoryError::Conflict` when `(uuid, index)` is already
    /// stored.
    fn put(
        &self,
        doc: &JobDocument,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Return one document matching `filter`.
    ///
    /// When several versions match, the one with the highest index wins.
    fn get_one(
        &self,
        filter: &DocumentFilter,
    ) -> impl std::future::Future<Output = Result<Option<JobDocument>, RepositoryError>> + Send;

    /// Every document matching `filter`, ordered by completion time.
    fn query(
        &self,
        filter: &DocumentFilter,
    ) -> impl std::future::Future<Output = Result<Vec<JobDocument>, RepositoryError>> + Send;

    /// Number of stored documents.
    fn count(&self) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
