//! The result of a run: every recorded response, by uuid and index.

use std::collections::{BTreeMap, HashMap};
use std::ops::Index;

use uuid::Uuid;

use jobweave_types::job::JobKey;
use jobweave_types::response::Response;

/// Responses keyed by job uuid, then by index.
///
/// Also remembers the order in which job versions completed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Responses {
    by_uuid: HashMap<Uuid, BTreeMap<u32, Response>>,
    completed: Vec<JobKey>,
}

impl Responses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: JobKey, response: Response) {
        self.by_uuid
            .entry(key.uuid)
            .or_default()
            .insert(key.index, response);
        self.completed.push(key);
    }

    pub fn get(&self, uuid: Uuid, index: u32) -> Option<&Response> {
        self.by_uuid.get(&uuid)?.get(&index)
    }

    /// Response of the highest recorded index of `uuid`.
    pub fn latest(&self, uuid: Uuid) -> Option<&Response> {
        self.by_uuid.get(&uuid)?.values().next_back()
    }

    /// Every recorded version of `uuid`.
    pub fn versions(&self, uuid: Uuid) -> Option<&BTreeMap<u32, Response>> {
        self.by_uuid.get(&uuid)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.by_uuid.contains_key(&uuid)
    }

    /// Number of distinct job uuids with at least one response.
    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }

    /// Job versions in the order they completed.
    pub fn completion_order(&self) -> &[JobKey] {
        &self.completed
    }

    pub fn uuids(&self) -> impl Iterator<Item = &Uuid> {
        self.by_uuid.keys()
    }
}

impl Index<Uuid> for Responses {
    type Output = BTreeMap<u32, Response>;

    /// Panics if `uuid` has no response.
    fn index(&self, uuid: Uuid) -> &Self::Output {
        &self.by_uuid[&uuid]
    }
}
