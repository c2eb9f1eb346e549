//! Local execution entry point.
//!
//! `run_locally` builds the execution graph for a flow (or a single job) and
//! runs it to completion on the current task, persisting every job version to
//! the given store.

use jobweave_core::function::FunctionRegistry;
use jobweave_core::responses::Responses;
use jobweave_core::scheduler::{RunFailure, Scheduler};
use jobweave_core::store::JobStore;
use jobweave_types::config::RunConfig;
use jobweave_types::flow::Flow;

/// Run `flow` locally and return every recorded response.
///
/// Graph construction errors (cycles, duplicate jobs, dangling references)
/// fail before any job runs and carry an empty response map.
pub async fn run_locally<S: JobStore>(
    flow: impl Into<Flow>,
    store: &S,
    registry: &FunctionRegistry,
    config: RunConfig,
) -> Result<Responses, RunFailure> {
    let scheduler = Scheduler::new(flow, store, registry, config)?;
    scheduler.run().await
}
