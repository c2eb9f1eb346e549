//! In-memory job store.
//!
//! Documents live in a `DashMap` keyed by `(uuid, index)`, so the store can be
//! shared by reference across tasks. Useful for tests and one-off local runs
//! where persistence beyond the process is not needed.

use dashmap::DashMap;

use jobweave_core::store::JobStore;
use jobweave_types::document::{DocumentFilter, JobDocument};
use jobweave_types::error::RepositoryError;
use jobweave_types::job::JobKey;

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    docs: DashMap<JobKey, JobDocument>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn matching(&self, filter: &DocumentFilter) -> Vec<JobDocument> {
        // Exact key lookups skip the scan.
        if let (Some(uuid), Some(index)) = (filter.uuid, filter.index) {
            return self
                .docs
                .get(&JobKey::new(uuid, index))
                .map(|doc| doc.value().clone())
                .filter(|doc| filter.matches(doc))
                .into_iter()
                .collect();
        }
        self.docs
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl JobStore for MemoryJobStore {
    async fn put(&self, doc: &JobDocument) -> Result<(), RepositoryError> {
        use dashmap::mapref::entry::Entry;

        match self.docs.entry(doc.key()) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "job {} already stored",
                doc.key()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(doc.clone());
                Ok(())
            }
        }
    }

    async fn get_one(&self, filter: &DocumentFilter) -> Result<Option<JobDocument>, RepositoryError> {
        Ok(self
            .matching(filter)
            .into_iter()
            .max_by_key(|doc| (doc.index, doc.completed_at)))
    }

    async fn query(&self, filter: &DocumentFilter) -> Result<Vec<JobDocument>, RepositoryError> {
        let mut docs = self.matching(filter);
        docs.sort_by_key(|doc| (doc.completed_at, doc.index));
        Ok(docs)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.docs.len() as u64)
    }
}
