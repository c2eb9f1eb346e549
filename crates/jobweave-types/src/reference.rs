//! Output references: pointers to a (possibly not yet computed) job output.
//!
//! A reference names its target by uuid, optionally pins a specific index
//! (version), and optionally narrows the output with an attribute path. A
//! reference with no index always means "the latest index available when the
//! reference is resolved".

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One step of an attribute path into a job output.
///
/// Serialized untagged: a string selects an object key, an integer selects an
/// array element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, ".{key}"),
            PathSegment::Index(idx) => write!(f, "[{idx}]"),
        }
    }
}

/// Pointer to the output of another job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputReference {
    /// Identity of the job whose output is referenced.
    pub uuid: Uuid,
    /// Explicit version to resolve. `None` resolves the latest version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Attribute path into the output. Empty selects the whole output.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<PathSegment>,
}

impl OutputReference {
    /// Reference the whole, latest output of `uuid`.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            index: None,
            attributes: Vec::new(),
        }
    }

    /// Pin this reference to a specific index.
    pub fn at_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Extend the attribute path with an object key.
    pub fn attr(mut self, key: impl Into<String>) -> Self {
        self.attributes.push(PathSegment::Key(key.into()));
        self
    }

    /// Extend the attribute path with an array position.
    pub fn item(mut self, idx: usize) -> Self {
        self.attributes.push(PathSegment::Index(idx));
        self
    }

    /// Apply the attribute path to a resolved output.
    ///
    /// Returns `None` when a segment does not exist in `output`.
    pub fn select<'a>(&self, output: &'a Value) -> Option<&'a Value> {
        self.attributes
            .iter()
            .try_fold(output, |current, segment| match segment {
                PathSegment::Key(key) => current.get(key.as_str()),
                PathSegment::Index(idx) => current.get(*idx),
            })
    }

    /// Render the attribute path, e.g. `.results[0].energy`.
    pub fn path_string(&self) -> String {
        self.attributes.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for OutputReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "OutputReference({}:{}", self.uuid, index)?,
            None => write!(f, "OutputReference({}", self.uuid)?,
        }
        write!(f, "{})", self.path_string())
    }
}
