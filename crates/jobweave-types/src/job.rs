//! Jobs: the single schedulable unit of work.
//!
//! A job names a registered function, carries its arguments (which may embed
//! references to other jobs' outputs), and is identified by a stable uuid plus
//! an index that increments each time the job is replaced.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::input::Input;
use crate::reference::OutputReference;

/// First index assigned to every job.
pub const INITIAL_INDEX: u32 = 1;

fn default_index() -> u32 {
    INITIAL_INDEX
}

/// Compound `(uuid, index)` key: the only globally unique handle on a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub uuid: Uuid,
    pub index: u32,
}

impl JobKey {
    pub fn new(uuid: Uuid, index: u32) -> Self {
        Self { uuid, index }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uuid, self.index)
    }
}

/// A unit of work bound to a registered function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identity, shared by every version of this job.
    #[serde(default = "Uuid::now_v7")]
    pub uuid: Uuid,
    /// Version of this identity. Starts at 1, bumped on replace.
    #[serde(default = "default_index")]
    pub index: u32,
    /// Human-readable name. Defaults to the function name.
    pub name: String,
    /// Name under which the callable is registered.
    pub function: String,
    /// Positional arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Input>,
    /// Keyword arguments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kwargs: BTreeMap<String, Input>,
    /// Free-form metadata, persisted with the job's output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Job {
    /// Create a job calling `function` with the given positional arguments.
    pub fn new<I, A>(function: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Input>,
    {
        let function = function.into();
        Self {
            uuid: Uuid::now_v7(),
            index: INITIAL_INDEX,
            name: function.clone(),
            function,
            args: args.into_iter().map(Into::into).collect(),
            kwargs: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Set the human-readable name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a keyword argument.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Input>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The `(uuid, index)` key of this job version.
    pub fn key(&self) -> JobKey {
        JobKey::new(self.uuid, self.index)
    }

    /// A reference to this job's latest output.
    pub fn output(&self) -> OutputReference {
        OutputReference::new(self.uuid)
    }

    /// Every reference held in the job's arguments.
    pub fn references(&self) -> Vec<&OutputReference> {
        self.args
            .iter()
            .chain(self.kwargs.values())
            .flat_map(Input::references)
            .collect()
    }

    /// Visit every reference in the job's arguments mutably.
    pub fn for_each_reference_mut(&mut self, f: &mut impl FnMut(&mut OutputReference)) {
        for arg in self.args.iter_mut().chain(self.kwargs.values_mut()) {
            arg.for_each_reference_mut(f);
        }
    }

    /// Point latest-version references at `from` to `to` instead.
    ///
    /// References pinned to an explicit index keep their target.
    pub fn retarget_references(&mut self, from: Uuid, to: Uuid) {
        self.for_each_reference_mut(&mut |r| {
            if r.uuid == from && r.index.is_none() {
                r.uuid = to;
            }
        });
    }
}
