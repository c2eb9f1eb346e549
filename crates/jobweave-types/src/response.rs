//! Job responses: the output of a job plus any graph-mutation directives.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flow::Flow;
use crate::input::Input;

/// What a job function returns.
///
/// Besides the output, a response may ask the engine to graft new work onto
/// the remaining graph:
/// - `replace` -- a flow that takes over this job's identity (index + 1).
/// - `detour` -- a flow every later job of the enclosing flow must wait for.
/// - `addition` -- a flow that runs after this job without affecting others.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The job output. May contain references to newly created jobs.
    #[serde(default)]
    pub output: Input,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addition: Option<Flow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detour: Option<Flow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<Flow>,
    /// Persisted alongside the output, never used for dependency resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_data: Option<Value>,
    /// Skip every job that depends on this job's output.
    #[serde(default)]
    pub stop_children: bool,
    /// Stop the whole run once this job has been recorded.
    #[serde(default)]
    pub stop_flow: bool,
}

impl Response {
    /// A response carrying only an output.
    pub fn new(output: impl Into<Input>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn with_addition(mut self, addition: impl Into<Flow>) -> Self {
        self.addition = Some(addition.into());
        self
    }

    pub fn with_detour(mut self, detour: impl Into<Flow>) -> Self {
        self.detour = Some(detour.into());
        self
    }

    pub fn with_replace(mut self, replace: impl Into<Flow>) -> Self {
        self.replace = Some(replace.into());
        self
    }

    pub fn with_stored_data(mut self, stored_data: Value) -> Self {
        self.stored_data = Some(stored_data);
        self
    }

    pub fn stopping_children(mut self) -> Self {
        self.stop_children = true;
        self
    }

    pub fn stopping_flow(mut self) -> Self {
        self.stop_flow = true;
        self
    }

    /// True when the response asks for any change to the graph.
    pub fn has_directives(&self) -> bool {
        self.replace.is_some() || self.detour.is_some() || self.addition.is_some()
    }
}

impl From<Value> for Response {
    fn from(value: Value) -> Self {
        Response::new(value)
    }
}
