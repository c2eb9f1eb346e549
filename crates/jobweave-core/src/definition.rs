//! Flow definitions: parsing, validation, and file loading.
//!
//! Converts between YAML/JSON documents and [`Flow`], and checks a parsed
//! flow against a [`FunctionRegistry`] before it is handed to the scheduler.
//! References between jobs are written as `{"@reference": {"uuid": ...}}`
//! objects, so jobs that are referenced must carry an explicit uuid.

use std::path::Path;

use thiserror::Error;

use jobweave_types::flow::Flow;

use crate::function::FunctionRegistry;
use crate::graph::{GraphError, build_graph};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The flow does not form a valid graph.
    #[error("invalid flow: {0}")]
    Graph(#[from] GraphError),

    /// A job names a function that is not registered.
    #[error("job '{job}' calls unregistered function '{function}'")]
    UnknownFunction { job: String, function: String },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a `Flow`.
pub fn flow_from_yaml(yaml: &str) -> Result<Flow, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

/// Serialize a `Flow` to a YAML string.
pub fn flow_to_yaml(flow: &Flow) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(flow).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

pub fn flow_from_json(json: &str) -> Result<Flow, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

pub fn flow_to_json(flow: &Flow) -> Result<String, DefinitionError> {
    serde_json::to_string_pretty(flow).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

/// Load a flow from disk. `.json` files are read as JSON, anything else as YAML.
pub async fn load_flow_file(path: &Path) -> Result<Flow, DefinitionError> {
    let content = tokio::fs::read_to_string(path).await?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        flow_from_json(&content)
    } else {
        flow_from_yaml(&content)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check that `flow` builds into a graph and only calls registered functions.
pub fn validate_flow(
    flow: &Flow,
    registry: &FunctionRegistry,
    allow_external_references: bool,
) -> Result<(), DefinitionError> {
    for job in flow.jobs() {
        if !registry.contains(&job.function) {
            return Err(DefinitionError::UnknownFunction {
                job: job.name.clone(),
                function: job.function.clone(),
            });
        }
    }
    build_graph(flow, allow_external_references)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobweave_types::flow::FlowMember;
    use jobweave_types::input::Input;
    use jobweave_types::job::Job;
    use jobweave_types::response::Response;

    const CONNECTED_YAML: &str = r#"
name: connected
members:
  - kind: job
    uuid: 0190c3a2-5b1e-7d4c-8a3b-1f2e3d4c5b6a
    name: first
    function: append_end
    args: ["12345"]
  - kind: job
    name: second
    function: append_end
    args:
      - "@reference":
          uuid: 0190c3a2-5b1e-7d4c-8a3b-1f2e3d4c5b6a
"#;

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("append_end", |_, args| {
            Ok(Response::new(format!("{}_end", args.str_arg(0)?)))
        });
        registry
    }

    #[test]
    fn test_parse_yaml_with_reference() {
        let flow = flow_from_yaml(CONNECTED_YAML).unwrap();
        assert_eq!(flow.name, "connected");
        let jobs = flow.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].index, 1);
        let refs = jobs[1].references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uuid, jobs[0].uuid);
        validate_flow(&flow, &registry(), false).unwrap();
    }

    #[test]
    fn test_yaml_round_trip_preserves_nesting() {
        let a = Job::new("append_end", ["a"]);
        let b = Job::new("append_end", [Input::from(a.output())]);
        let flow = Flow::new([FlowMember::from(Flow::new([a]).named("inner")), FlowMember::from(b)])
            .named("outer");

        let yaml = flow_to_yaml(&flow).unwrap();
        assert_eq!(flow_from_yaml(&yaml).unwrap(), flow);

        let json = flow_to_json(&flow).unwrap();
        assert_eq!(flow_from_json(&json).unwrap(), flow);
    }

    #[test]
    fn test_invalid_yaml() {
        let err = flow_from_yaml("members: [").unwrap_err();
        assert!(matches!(err, DefinitionError::ParseError(_)));
    }

    #[test]
    fn test_unknown_function_rejected() {
        let flow = Flow::from(Job::new("nope", ["x"]));
        let err = validate_flow(&flow, &registry(), false).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownFunction { ref function, .. } if function == "nope"));
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let yaml = r#"
members:
  - kind: job
    name: lonely
    function: append_end
    args:
      - "@reference":
          uuid: 0190c3a2-5b1e-7d4c-8a3b-000000000000
"#;
        let flow = flow_from_yaml(yaml).unwrap();
        let err = validate_flow(&flow, &registry(), false).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::Graph(GraphError::UnresolvableReference { .. })
        ));
        validate_flow(&flow, &registry(), true).unwrap();
    }

    #[tokio::test]
    async fn test_load_flow_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("flow.yaml");
        tokio::fs::write(&yaml_path, CONNECTED_YAML).await.unwrap();
        let flow = load_flow_file(&yaml_path).await.unwrap();
        assert_eq!(flow.jobs().len(), 2);

        let json_path = dir.path().join("flow.json");
        tokio::fs::write(&json_path, flow_to_json(&flow).unwrap())
            .await
            .unwrap();
        assert_eq!(load_flow_file(&json_path).await.unwrap(), flow);

        let missing = load_flow_file(&dir.path().join("missing.yaml")).await;
        assert!(matches!(missing, Err(DefinitionError::IoError(_))));
    }
}
