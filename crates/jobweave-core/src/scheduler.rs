//! The run loop: pick a ready job, execute it, apply its response, repeat.
//!
//! Jobs run one at a time on the caller's task. Graph mutation happens
//! between jobs, so the graph needs no locking. Each iteration picks the ready
//! job with the smallest discovery number, which makes runs deterministic for
//! deterministic callables.
//!
//! # Job execution
//!
//! 1. Resolve references in args and kwargs (cache first, then the store).
//! 2. Create a working directory if folders are enabled.
//! 3. Invoke the registered callable.
//! 4. Persist a `JobDocument` and record the response.
//! 5. Mark the job completed.
//! 6. Apply directives: replace -> detour -> addition, then output references.
//! 7. Apply `stop_children` / `stop_flow`.
//!
//! Any error aborts the run. Documents already persisted stay persisted and
//! the partial responses travel back in [`RunFailure`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use jobweave_types::config::RunConfig;
use jobweave_types::document::JobDocument;
use jobweave_types::error::RepositoryError;
use jobweave_types::flow::Flow;
use jobweave_types::job::{Job, JobKey};
use jobweave_types::response::Response;

use crate::function::{FunctionRegistry, JobArgs, JobContext};
use crate::graph::{ExecutionGraph, GraphError, build_graph};
use crate::resolve::{OutputCache, ReferenceResolver, ResolveError};
use crate::responses::Responses;
use crate::store::JobStore;
use crate::workdir::{LocalWorkdirProvider, WorkdirProvider};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal conditions that abort a run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("could not resolve inputs of job {job}: {source}")]
    UnresolvedReference {
        job: JobKey,
        #[source]
        source: ResolveError,
    },

    #[error("deadlock: {} jobs pending but none is ready", .pending.len())]
    Deadlock { pending: Vec<JobKey> },

    #[error("job '{name}' ({job}) failed: {source}")]
    JobExecution {
        job: JobKey,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("job {job} calls unregistered function '{function}'")]
    UnknownFunction { job: JobKey, function: String },

    #[error("store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("could not create working directory for job {job}: {source}")]
    Workdir {
        job: JobKey,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    fn unresolved(job: JobKey, source: ResolveError) -> Self {
        match source {
            ResolveError::Store(err) => ExecutionError::Store(err),
            source => ExecutionError::UnresolvedReference { job, source },
        }
    }
}

/// A failed run: the error plus every response recorded before it.
#[derive(Debug, Error)]
#[error("run aborted: {error}")]
pub struct RunFailure {
    #[source]
    pub error: ExecutionError,
    pub responses: Responses,
}

impl From<GraphError> for RunFailure {
    fn from(err: GraphError) -> Self {
        Self {
            error: ExecutionError::Graph(err),
            responses: Responses::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Runs one flow to completion against a store and a function registry.
pub struct Scheduler<'a, S: JobStore, W: WorkdirProvider = LocalWorkdirProvider> {
    graph: ExecutionGraph,
    store: &'a S,
    registry: &'a FunctionRegistry,
    workdirs: W,
    config: RunConfig,
    cache: OutputCache,
    responses: Responses,
    last_completed_at: Option<DateTime<Utc>>,
}

impl<'a, S: JobStore> Scheduler<'a, S> {
    /// Build the execution graph for `flow`.
    ///
    /// Fails before any job runs if the flow is cyclic, has duplicate jobs, or
    /// references jobs outside itself (unless external references are allowed).
    pub fn new(
        flow: impl Into<Flow>,
        store: &'a S,
        registry: &'a FunctionRegistry,
        config: RunConfig,
    ) -> Result<Self, GraphError> {
        let flow = flow.into();
        let graph = build_graph(&flow, config.allow_external_references)?;
        tracing::debug!(
            flow = flow.name.as_str(),
            jobs = graph.len(),
            edges = graph.edges().len(),
            "execution graph built"
        );
        Ok(Self {
            graph,
            store,
            registry,
            workdirs: LocalWorkdirProvider,
            config,
            cache: OutputCache::new(),
            responses: Responses::new(),
            last_completed_at: None,
        })
    }
}

impl<'a, S: JobStore, W: WorkdirProvider> Scheduler<'a, S, W> {
    /// Use `workdirs` to create per-job directories.
    pub fn with_workdir_provider<V: WorkdirProvider>(self, workdirs: V) -> Scheduler<'a, S, V> {
        Scheduler {
            graph: self.graph,
            store: self.store,
            registry: self.registry,
            workdirs,
            config: self.config,
            cache: self.cache,
            responses: self.responses,
            last_completed_at: self.last_completed_at,
        }
    }

    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    /// Execute jobs until the graph is exhausted.
    pub async fn run(mut self) -> Result<Responses, RunFailure> {
        if self.config.log {
            tracing::info!(jobs = self.graph.len(), "Started executing jobs locally");
        }

        match self.run_loop().await {
            Ok(()) => {
                if self.config.log {
                    tracing::info!(
                        completed = self.responses.completion_order().len(),
                        "Finished executing jobs locally"
                    );
                }
                Ok(self.responses)
            }
            Err(error) => {
                tracing::error!(
                    error = %error,
                    completed = self.responses.completion_order().len(),
                    "run aborted"
                );
                Err(RunFailure {
                    error,
                    responses: self.responses,
                })
            }
        }
    }

    async fn run_loop(&mut self) -> Result<(), ExecutionError> {
        while let Some(key) = self.graph.next_ready() {
            if self.execute(key).await? {
                let remaining = self.graph.pending();
                tracing::info!(
                    uuid = %key.uuid,
                    index = key.index,
                    remaining = remaining.len(),
                    "flow stopped by job"
                );
                return Ok(());
            }
        }

        let pending = self.graph.pending();
        if !pending.is_empty() {
            return Err(ExecutionError::Deadlock { pending });
        }
        Ok(())
    }

    /// Run one job. Returns true when the job asked to stop the flow.
    async fn execute(&mut self, key: JobKey) -> Result<bool, ExecutionError> {
        let job = self
            .graph
            .job(key)
            .cloned()
            .ok_or(GraphError::UnknownJob(key))?;
        if self.config.log {
            tracing::info!(
                uuid = %key.uuid,
                index = key.index,
                "Starting job - {} ({})",
                job.name,
                key.uuid
            );
        }

        let args = self.resolve_args(&job).await?;

        let registry = self.registry;
        let function = registry
            .get(&job.function)
            .ok_or_else(|| ExecutionError::UnknownFunction {
                job: key,
                function: job.function.clone(),
            })?;

        let workdir = if self.config.create_folders {
            let dir = self
                .workdirs
                .create(&self.config.root_dir, key)
                .await
                .map_err(|source| ExecutionError::Workdir { job: key, source })?;
            tracing::debug!(uuid = %key.uuid, dir = %dir.display(), "working directory created");
            Some(dir)
        } else {
            None
        };

        let ctx = JobContext {
            key,
            name: job.name.clone(),
            workdir,
        };
        let response = function
            .call(&ctx, args)
            .await
            .map_err(|source| ExecutionError::JobExecution {
                job: key,
                name: job.name.clone(),
                source,
            })?;

        let doc = JobDocument {
            uuid: key.uuid,
            index: key.index,
            name: job.name.clone(),
            output: response.output.to_json(),
            completed_at: self.completion_time(),
            stored_data: response.stored_data.clone(),
            metadata: job.metadata.clone(),
        };
        self.store.put(&doc).await?;
        self.cache.insert(key, doc.output);
        self.responses.insert(key, response.clone());
        self.graph.mark_completed(key)?;

        let anchor = self.apply_directives(key, &response)?;

        if response.stop_children {
            let skipped = self.graph.skip_data_dependents(anchor)?;
            tracing::debug!(
                uuid = %key.uuid,
                skipped = skipped.len(),
                "children stopped"
            );
        }

        if self.config.log {
            tracing::info!(
                uuid = %key.uuid,
                index = key.index,
                "Finished job - {} ({})",
                job.name,
                key.uuid
            );
        }
        Ok(response.stop_flow)
    }

    async fn resolve_args(&mut self, job: &Job) -> Result<JobArgs, ExecutionError> {
        let key = job.key();
        let mut resolver = ReferenceResolver::new(&mut self.cache, self.store);

        let mut args = Vec::with_capacity(job.args.len());
        for arg in &job.args {
            let value = resolver
                .resolve(arg)
                .await
                .map_err(|e| ExecutionError::unresolved(key, e))?;
            args.push(value);
        }

        let mut kwargs = BTreeMap::new();
        for (name, input) in &job.kwargs {
            let value = resolver
                .resolve(input)
                .await
                .map_err(|e| ExecutionError::unresolved(key, e))?;
            kwargs.insert(name.clone(), value);
        }

        Ok(JobArgs::new(args, kwargs))
    }

    /// Apply replace, detour and addition, in that order.
    ///
    /// Returns the node that now stands for `key` in the graph: the
    /// replacement terminal if a replacement happened, else `key` itself.
    fn apply_directives(&mut self, key: JobKey, response: &Response) -> Result<JobKey, ExecutionError> {
        let allow_external = self.config.allow_external_references;
        let mut anchor = key;

        if let Some(replace) = &response.replace {
            if let Some(terminal) = self.graph.replace(key, replace, allow_external)? {
                tracing::debug!(
                    uuid = %key.uuid,
                    index = key.index,
                    terminal = %terminal,
                    jobs = replace.jobs().len(),
                    "job replaced"
                );
                anchor = terminal;
            }
        }

        if let Some(detour) = &response.detour {
            let delayed = self.graph.detour(key, anchor, detour, allow_external)?;
            tracing::debug!(
                uuid = %key.uuid,
                jobs = detour.jobs().len(),
                delayed = delayed.len(),
                "detour inserted"
            );
        }

        if let Some(addition) = &response.addition {
            self.graph.addition(key, addition, allow_external)?;
            tracing::debug!(uuid = %key.uuid, jobs = addition.jobs().len(), "addition inserted");
        }

        if anchor == key {
            self.graph.await_output_references(key, &response.output)?;
        }

        Ok(anchor)
    }

    /// Wall-clock completion time, strictly increasing within the run.
    fn completion_time(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_completed_at {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_completed_at = Some(now);
        now
    }
}
