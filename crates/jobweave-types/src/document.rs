//! Persisted job documents and the equality filter used to query them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::job::JobKey;

/// The record written to the job store once a job version finishes.
///
/// `output` is the JSON encoding of the job's `Input` output, so references
/// to jobs that were still pending at completion time survive persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDocument {
    pub uuid: Uuid,
    pub index: u32,
    pub name: String,
    pub output: Value,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_data: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl JobDocument {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.uuid, self.index)
    }
}

/// Equality filter over job documents.
///
/// Every populated field must match. `fields` compares arbitrary top-level
/// document fields (e.g. `output`, `name`) against their JSON encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter matching exactly one job version.
    pub fn for_key(key: JobKey) -> Self {
        Self::new().uuid(key.uuid).index(key.index)
    }

    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Whether `doc` satisfies every condition of this filter.
    pub fn matches(&self, doc: &JobDocument) -> bool {
        if self.uuid.is_some_and(|u| u != doc.uuid) {
            return false;
        }
        if self.index.is_some_and(|i| i != doc.index) {
            return false;
        }
        if self.fields.is_empty() {
            return true;
        }
        let Ok(encoded) = serde_json::to_value(doc) else {
            return false;
        };
        self.fields
            .iter()
            .all(|(name, expected)| encoded.get(name) == Some(expected))
    }
}
