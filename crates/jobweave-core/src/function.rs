//! Job callables and the registry that names them.
//!
//! A [`Job`](jobweave_types::job::Job) refers to its callable by name; the
//! scheduler looks the name up in a [`FunctionRegistry`] at execution time.
//! Callables receive fully resolved arguments (every reference replaced by
//! the referenced value) and return a [`Response`].
//!
//! Follows the blanket-impl pattern used for dynamic dispatch:
//! 1. [`JobFunction`] is the ergonomic trait with a native async fn
//! 2. [`JobFunctionDyn`] is object-safe with boxed futures, blanket-implemented
//! 3. [`BoxJobFunction`] wraps `Box<dyn JobFunctionDyn>` and delegates

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use anyhow::{Context, anyhow};
use serde_json::Value;

use jobweave_types::job::JobKey;
use jobweave_types::response::Response;

/// Registry name of the built-in job that echoes its single argument.
///
/// Used to materialise a replacement flow's declared output as a job.
pub const PASSTHROUGH_FUNCTION: &str = "jobweave.passthrough";

// ---------------------------------------------------------------------------
// Invocation context and arguments
// ---------------------------------------------------------------------------

/// What a callable knows about the job it is running for.
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub key: JobKey,
    pub name: String,
    /// Working directory created for this job, if folders are enabled.
    pub workdir: Option<PathBuf>,
}

/// Resolved arguments handed to a callable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl JobArgs {
    pub fn new(args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Positional argument `idx`.
    pub fn arg(&self, idx: usize) -> anyhow::Result<&Value> {
        self.args
            .get(idx)
            .ok_or_else(|| anyhow!("missing positional argument {idx}"))
    }

    pub fn str_arg(&self, idx: usize) -> anyhow::Result<&str> {
        self.arg(idx)?
            .as_str()
            .with_context(|| format!("positional argument {idx} is not a string"))
    }

    pub fn i64_arg(&self, idx: usize) -> anyhow::Result<i64> {
        self.arg(idx)?
            .as_i64()
            .with_context(|| format!("positional argument {idx} is not an integer"))
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

// ---------------------------------------------------------------------------
// Callable traits
// ---------------------------------------------------------------------------

/// A callable bound to jobs by registry name.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
/// Failures are reported as `anyhow::Error` and surface as a job execution
/// error that aborts the run.
pub trait JobFunction: Send + Sync {
    fn call(
        &self,
        ctx: &JobContext,
        args: JobArgs,
    ) -> impl Future<Output = anyhow::Result<Response>> + Send;
}

/// Object-safe version of [`JobFunction`] with boxed futures.
pub trait JobFunctionDyn: Send + Sync {
    fn call_boxed<'a>(
        &'a self,
        ctx: &'a JobContext,
        args: JobArgs,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Response>> + Send + 'a>>;
}

impl<T: JobFunction> JobFunctionDyn for T {
    fn call_boxed<'a>(
        &'a self,
        ctx: &'a JobContext,
        args: JobArgs,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Response>> + Send + 'a>> {
        Box::pin(self.call(ctx, args))
    }
}

/// Type-erased job callable.
pub struct BoxJobFunction {
    inner: Box<dyn JobFunctionDyn>,
}

impl BoxJobFunction {
    pub fn new<F: JobFunction + 'static>(function: F) -> Self {
        Self {
            inner: Box::new(function),
        }
    }

    pub async fn call(&self, ctx: &JobContext, args: JobArgs) -> anyhow::Result<Response> {
        self.inner.call_boxed(ctx, args).await
    }
}

impl std::fmt::Debug for BoxJobFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxJobFunction")
    }
}

/// Adapter turning a synchronous closure into a [`JobFunction`].
pub struct FnJob<F>(pub F);

impl<F> JobFunction for FnJob<F>
where
    F: Fn(&JobContext, JobArgs) -> anyhow::Result<Response> + Send + Sync,
{
    async fn call(&self, ctx: &JobContext, args: JobArgs) -> anyhow::Result<Response> {
        (self.0)(ctx, args)
    }
}

/// Returns its first positional argument as the output.
struct Passthrough;

impl JobFunction for Passthrough {
    async fn call(&self, _ctx: &JobContext, args: JobArgs) -> anyhow::Result<Response> {
        Ok(Response::new(args.args.into_iter().next().unwrap_or(Value::Null)))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name -> callable lookup used by the scheduler.
///
/// Always contains [`PASSTHROUGH_FUNCTION`].
#[derive(Debug)]
pub struct FunctionRegistry {
    functions: HashMap<String, BoxJobFunction>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut functions = HashMap::new();
        functions.insert(
            PASSTHROUGH_FUNCTION.to_string(),
            BoxJobFunction::new(Passthrough),
        );
        Self { functions }
    }

    /// Register `function` under `name`, replacing any previous entry.
    pub fn register<F: JobFunction + 'static>(&mut self, name: impl Into<String>, function: F) {
        self.functions
            .insert(name.into(), BoxJobFunction::new(function));
    }

    /// Register a synchronous closure under `name`.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&JobContext, JobArgs) -> anyhow::Result<Response> + Send + Sync + 'static,
    {
        self.register(name, FnJob(function));
    }

    pub fn get(&self, name: &str) -> Option<&BoxJobFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobweave_types::input::Input;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> JobContext {
        JobContext {
            key: JobKey::new(Uuid::now_v7(), 1),
            name: "test".to_string(),
            workdir: None,
        }
    }

    struct Doubler;

    impl JobFunction for Doubler {
        async fn call(&self, _ctx: &JobContext, args: JobArgs) -> anyhow::Result<Response> {
            Ok(Response::new(args.i64_arg(0)? * 2))
        }
    }

    #[tokio::test]
    async fn test_registry_dispatches_async_function() {
        let mut registry = FunctionRegistry::new();
        registry.register("double", Doubler);

        let function = registry.get("double").unwrap();
        let response = function
            .call(&ctx(), JobArgs::new(vec![json!(21)], BTreeMap::new()))
            .await
            .unwrap();
        assert_eq!(response.output, Input::Value(json!(42)));
    }

    #[tokio::test]
    async fn test_register_fn_closure() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("append_end", |_, args| {
            Ok(Response::new(format!("{}_end", args.str_arg(0)?)))
        });

        let response = registry
            .get("append_end")
            .unwrap()
            .call(&ctx(), JobArgs::new(vec![json!("12345")], BTreeMap::new()))
            .await
            .unwrap();
        assert_eq!(response.output, Input::from("12345_end"));
    }

    #[tokio::test]
    async fn test_passthrough_is_builtin() {
        let registry = FunctionRegistry::default();
        assert!(registry.contains(PASSTHROUGH_FUNCTION));
        let response = registry
            .get(PASSTHROUGH_FUNCTION)
            .unwrap()
            .call(&ctx(), JobArgs::new(vec![json!({"a": 1})], BTreeMap::new()))
            .await
            .unwrap();
        assert_eq!(response.output, Input::Value(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_argument_errors_are_reported() {
        let args = JobArgs::new(vec![json!(5)], BTreeMap::new());
        assert!(args.str_arg(0).is_err());
        assert!(args.arg(3).is_err());
        assert_eq!(args.i64_arg(0).unwrap(), 5);
        assert!(args.kwarg("missing").is_none());
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = FunctionRegistry::new();
        registry.register_fn("b", |_, _| Ok(Response::default()));
        registry.register_fn("a", |_, _| Ok(Response::default()));
        assert_eq!(registry.names(), vec!["a", "b", PASSTHROUGH_FUNCTION]);
    }
}
