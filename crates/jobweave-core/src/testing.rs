//! Test doubles shared by the crate's unit tests.

use std::collections::BTreeMap;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use jobweave_types::document::{DocumentFilter, JobDocument};
use jobweave_types::error::RepositoryError;
use jobweave_types::job::JobKey;

use crate::store::JobStore;

/// Minimal store keyed by `JobKey`.
#[derive(Default)]
pub struct MapStore {
    pub docs: DashMap<JobKey, JobDocument>,
}

impl MapStore {
    pub fn with(self, uuid: Uuid, index: u32, output: Value) -> Self {
        self.docs.insert(
            JobKey::new(uuid, index),
            JobDocument {
                uuid,
                index,
                name: "stored".to_string(),
                output,
                completed_at: Utc::now(),
                stored_data: None,
                metadata: BTreeMap::new(),
            },
        );
        self
    }
}

impl JobStore for MapStore {
    async fn put(&self, doc: &JobDocument) -> Result<(), RepositoryError> {
        if self.docs.contains_key(&doc.key()) {
            return Err(RepositoryError::Conflict(format!("job {} already stored", doc.key())));
        }
        self.docs.insert(doc.key(), doc.clone());
        Ok(())
    }

    async fn get_one(&self, filter: &DocumentFilter) -> Result<Option<JobDocument>, RepositoryError> {
        Ok(self
            .docs
            .iter()
            .filter(|e| filter.matches(e.value()))
            .max_by_key(|e| e.key().index)
            .map(|e| e.value().clone()))
    }

    async fn query(&self, filter: &DocumentFilter) -> Result<Vec<JobDocument>, RepositoryError> {
        let mut docs: Vec<JobDocument> = self
            .docs
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        docs.sort_by_key(|d| d.completed_at);
        Ok(docs)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.docs.len() as u64)
    }
}
