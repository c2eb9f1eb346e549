//! Output cache and reference resolution.
//!
//! Finished outputs are kept in an in-run cache keyed by uuid and index. A
//! reference is resolved against the cache first and falls back to the job
//! store, which is how references to jobs outside the submitted flow work.
//!
//! Outputs are cached in their JSON encoding, so an output may itself contain
//! references (a job returning a reference to a job it added). Those are
//! resolved recursively before the reference's attribute path is applied.

use std::collections::{BTreeMap, HashMap};

use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use jobweave_types::document::DocumentFilter;
use jobweave_types::error::RepositoryError;
use jobweave_types::input::Input;
use jobweave_types::job::JobKey;
use jobweave_types::reference::OutputReference;

use crate::store::JobStore;

/// Maximum depth of references found inside referenced outputs.
pub const MAX_RESOLVE_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no output stored for {0}")]
    Missing(OutputReference),

    #[error("output of {0} has no such attribute")]
    MissingAttribute(OutputReference),

    #[error("references nested deeper than {MAX_RESOLVE_DEPTH} levels at {0}")]
    TooDeep(OutputReference),

    #[error("store error: {0}")]
    Store(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Output cache
// ---------------------------------------------------------------------------

/// Encoded outputs of completed job versions.
#[derive(Debug, Clone, Default)]
pub struct OutputCache {
    outputs: HashMap<Uuid, BTreeMap<u32, Value>>,
}

impl OutputCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: JobKey, output: Value) {
        self.outputs
            .entry(key.uuid)
            .or_default()
            .insert(key.index, output);
    }

    /// Output of `uuid` at `index`, or at its highest index when `None`.
    pub fn get(&self, uuid: Uuid, index: Option<u32>) -> Option<&Value> {
        let versions = self.outputs.get(&uuid)?;
        match index {
            Some(index) => versions.get(&index),
            None => versions.values().next_back(),
        }
    }

    pub fn len(&self) -> usize {
        self.outputs.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves references through an [`OutputCache`] backed by a [`JobStore`].
pub struct ReferenceResolver<'a, S: JobStore> {
    cache: &'a mut OutputCache,
    store: &'a S,
}

impl<'a, S: JobStore> ReferenceResolver<'a, S> {
    pub fn new(cache: &'a mut OutputCache, store: &'a S) -> Self {
        Self { cache, store }
    }

    /// Replace every reference in `input` by the referenced value.
    pub async fn resolve(&mut self, input: &Input) -> Result<Value, ResolveError> {
        self.resolve_at_depth(input, 0).await
    }

    async fn resolve_at_depth(&mut self, input: &Input, depth: usize) -> Result<Value, ResolveError> {
        if input.is_literal() {
            return Ok(input.to_json());
        }
        let mut values: Vec<(OutputReference, Value)> = Vec::new();
        for reference in input.references() {
            if values.iter().any(|(r, _)| r == reference) {
                continue;
            }
            let value = self.resolve_reference(reference, depth).await?;
            values.push((reference.clone(), value));
        }
        input.substitute(&mut |reference| {
            values
                .iter()
                .find(|(r, _)| r == reference)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| ResolveError::Missing(reference.clone()))
        })
    }

    /// Resolve a single reference, including references nested in its target.
    pub fn resolve_reference<'r>(
        &'r mut self,
        reference: &'r OutputReference,
        depth: usize,
    ) -> BoxFuture<'r, Result<Value, ResolveError>>
    where
        'a: 'r,
    {
        Box::pin(async move {
            if depth >= MAX_RESOLVE_DEPTH {
                return Err(ResolveError::TooDeep(reference.clone()));
            }
            let encoded = self.fetch(reference).await?;
            let output = Input::from_json(encoded);
            let output = if output.is_literal() {
                output.to_json()
            } else {
                self.resolve_at_depth(&output, depth + 1).await?
            };
            reference
                .select(&output)
                .cloned()
                .ok_or_else(|| ResolveError::MissingAttribute(reference.clone()))
        })
    }

    async fn fetch(&mut self, reference: &OutputReference) -> Result<Value, ResolveError> {
        if let Some(value) = self.cache.get(reference.uuid, reference.index) {
            return Ok(value.clone());
        }
        let mut filter = DocumentFilter::new().uuid(reference.uuid);
        if let Some(index) = reference.index {
            filter = filter.index(index);
        }
        let doc = self
            .store
            .get_one(&filter)
            .await?
            .ok_or_else(|| ResolveError::Missing(reference.clone()))?;
        tracing::debug!(reference = %reference, index = doc.index, "output loaded from store");
        self.cache.insert(doc.key(), doc.output.clone());
        Ok(doc.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MapStore;
    use serde_json::json;

    #[test]
    fn test_cache_latest_and_pinned() {
        let uuid = Uuid::now_v7();
        let mut cache = OutputCache::new();
        cache.insert(JobKey::new(uuid, 1), json!("v1"));
        cache.insert(JobKey::new(uuid, 2), json!("v2"));

        assert_eq!(cache.get(uuid, None), Some(&json!("v2")));
        assert_eq!(cache.get(uuid, Some(1)), Some(&json!("v1")));
        assert_eq!(cache.get(uuid, Some(3)), None);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_from_cache_with_path() {
        let uuid = Uuid::now_v7();
        let mut cache = OutputCache::new();
        cache.insert(JobKey::new(uuid, 1), json!({"energy": [1.5, 2.5]}));
        let store = MapStore::default();

        let input = Input::from(OutputReference::new(uuid).attr("energy").item(1));
        let value = ReferenceResolver::new(&mut cache, &store)
            .resolve(&input)
            .await
            .unwrap();
        assert_eq!(value, json!(2.5));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_store_and_caches() {
        let uuid = Uuid::now_v7();
        let store = MapStore::default()
            .with(uuid, 1, json!("old"))
            .with(uuid, 2, json!("new"));
        let mut cache = OutputCache::new();

        let input = Input::List(vec![
            Input::from(OutputReference::new(uuid)),
            Input::from(OutputReference::new(uuid).at_index(1)),
        ]);
        let value = ReferenceResolver::new(&mut cache, &store)
            .resolve(&input)
            .await
            .unwrap();
        assert_eq!(value, json!(["new", "old"]));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_nested_reference_in_output() {
        let inner = Uuid::now_v7();
        let outer = Uuid::now_v7();
        let mut cache = OutputCache::new();
        cache.insert(JobKey::new(inner, 1), json!({"value": "11_end"}));
        cache.insert(
            JobKey::new(outer, 1),
            Input::from(OutputReference::new(inner)).to_json(),
        );
        let store = MapStore::default();

        let input = Input::from(OutputReference::new(outer).attr("value"));
        let value = ReferenceResolver::new(&mut cache, &store)
            .resolve(&input)
            .await
            .unwrap();
        assert_eq!(value, json!("11_end"));
    }

    #[tokio::test]
    async fn test_missing_output_and_attribute() {
        let uuid = Uuid::now_v7();
        let mut cache = OutputCache::new();
        cache.insert(JobKey::new(uuid, 1), json!({"a": 1}));
        let store = MapStore::default();
        let mut resolver = ReferenceResolver::new(&mut cache, &store);

        let err = resolver
            .resolve(&Input::from(OutputReference::new(Uuid::now_v7())))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Missing(_)));

        let err = resolver
            .resolve(&Input::from(OutputReference::new(uuid).attr("b")))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingAttribute(_)));
    }

    #[tokio::test]
    async fn test_self_referencing_output_is_bounded() {
        let uuid = Uuid::now_v7();
        let mut cache = OutputCache::new();
        cache.insert(
            JobKey::new(uuid, 1),
            Input::from(OutputReference::new(uuid)).to_json(),
        );
        let store = MapStore::default();

        let err = ReferenceResolver::new(&mut cache, &store)
            .resolve(&Input::from(OutputReference::new(uuid)))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::TooDeep(_)));
    }
}
