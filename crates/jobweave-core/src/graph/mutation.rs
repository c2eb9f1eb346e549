//! Response directives applied to a live graph.
//!
//! Each operation grafts a flattened subgraph onto the graph and rewires
//! edges around it. All of them leave the graph acyclic or fail with
//! [`GraphError::Cyclic`].

use std::collections::HashSet;

use petgraph::stable_graph::NodeIndex;
use uuid::Uuid;

use jobweave_types::flow::Flow;
use jobweave_types::input::Input;
use jobweave_types::job::{Job, JobKey};
use jobweave_types::reference::OutputReference;

use super::{EdgeKind, ExecutionGraph, GraphError, NodeState, flatten};
use crate::function::PASSTHROUGH_FUNCTION;

impl ExecutionGraph {
    /// Splice `replacement` in place of the completed job `current`.
    ///
    /// The replacement's first root job takes over `current`'s uuid with
    /// `index + 1`. Latest-version references to `current` inside the
    /// replacement are pinned to `current`'s index, so they keep meaning the
    /// output being replaced. If the replacement declares an output, a
    /// passthrough job producing it becomes the terminal; otherwise the last
    /// job that finishes the replacement is. Every outgoing edge of `current`
    /// moves to the terminal (other finishing jobs get order edges to the same
    /// dependents), and latest-version references held by those dependents
    /// are pointed at the terminal.
    ///
    /// Returns the terminal key, or `None` for an empty replacement.
    pub fn replace(
        &mut self,
        current: JobKey,
        replacement: &Flow,
        allow_external: bool,
    ) -> Result<Option<JobKey>, GraphError> {
        let current_idx = self.index_of(current)?;
        let mut flow = replacement.clone();
        flow.for_each_job_mut(&mut |job| {
            job.for_each_reference_mut(&mut |r| pin_reference(r, current));
        });
        if let Some(output) = flow.output.as_mut() {
            output.for_each_reference_mut(&mut |r| pin_reference(r, current));
        }

        let Some(root) = first_root(&flow) else {
            return Ok(None);
        };
        let successor = JobKey::new(current.uuid, current.index + 1);

        flow.for_each_job_mut(&mut |job| {
            if job.key() == root {
                job.uuid = successor.uuid;
                job.index = successor.index;
            }
            job.for_each_reference_mut(&mut |r| rename_reference(r, root, successor));
        });
        if let Some(output) = flow.output.as_mut() {
            output.for_each_reference_mut(&mut |r| rename_reference(r, root, successor));
        }
        if let Some(output) = flow.output.clone() {
            let name = format!("{} output", flow.name);
            flow.add(Job::new(PASSTHROUGH_FUNCTION, [output]).named(name));
        }

        let added = self.insert(flatten(&flow), allow_external)?;
        let sinks = self.sinks(&added);
        let Some((&terminal_idx, others)) = sinks.split_last() else {
            return Ok(None);
        };
        let terminal = self.graph[terminal_idx].job.key();

        let excluded: HashSet<NodeIndex> = added.iter().copied().collect();
        let dependents = self.move_outgoing_edges(current_idx, terminal_idx, &excluded);
        for &sink in others {
            for &dependent in &dependents {
                self.add_edge_idx(sink, dependent, EdgeKind::Order);
            }
        }
        if terminal.uuid != current.uuid {
            for idx in dependents {
                if self.graph[idx].state == NodeState::Pending {
                    self.graph[idx]
                        .job
                        .retarget_references(current.uuid, terminal.uuid);
                }
            }
        }

        self.ensure_acyclic()?;
        Ok(Some(terminal))
    }

    /// Insert `detour` between `current` and the jobs declared after it.
    ///
    /// Every detour entry waits on `current`; every order successor of
    /// `anchor` (the job itself, or its replacement terminal) waits on every
    /// detour exit. Returns the jobs that now wait on the detour.
    pub fn detour(
        &mut self,
        current: JobKey,
        anchor: JobKey,
        detour: &Flow,
        allow_external: bool,
    ) -> Result<Vec<JobKey>, GraphError> {
        let flat = flatten(detour);
        if flat.is_empty() {
            return Ok(Vec::new());
        }
        let later: Vec<JobKey> = self
            .successors(anchor, EdgeKind::Order)
            .into_iter()
            .filter(|key| self.state(*key) == Some(NodeState::Pending))
            .collect();
        let current_idx = self.index_of(current)?;
        let later_idx = self.indices_of(&later)?;

        let added = self.insert(flat, allow_external)?;
        for entry in self.sources(&added) {
            self.add_edge_idx(current_idx, entry, EdgeKind::Order);
        }
        for exit in self.sinks(&added) {
            for &idx in &later_idx {
                self.add_edge_idx(exit, idx, EdgeKind::Order);
            }
        }

        self.ensure_acyclic()?;
        Ok(later)
    }

    /// Run `addition` after `current` without delaying any existing job.
    pub fn addition(
        &mut self,
        current: JobKey,
        addition: &Flow,
        allow_external: bool,
    ) -> Result<(), GraphError> {
        let flat = flatten(addition);
        if flat.is_empty() {
            return Ok(());
        }
        let current_idx = self.index_of(current)?;
        let added = self.insert(flat, allow_external)?;
        for entry in self.sources(&added) {
            self.add_edge_idx(current_idx, entry, EdgeKind::Order);
        }
        self.ensure_acyclic()
    }

    /// Make `current`'s data dependents wait for jobs its output refers to.
    ///
    /// A job may return references to jobs that have not run yet (typically
    /// ones it just added). Whoever consumes the output must then wait for
    /// those too. References to unknown or finished jobs need no edge.
    pub fn await_output_references(
        &mut self,
        current: JobKey,
        output: &Input,
    ) -> Result<(), GraphError> {
        let dependents: Vec<NodeIndex> = {
            let current_idx = self.index_of(current)?;
            self.outgoing(current_idx, EdgeKind::Data)
                .into_iter()
                .filter(|idx| self.graph[*idx].state == NodeState::Pending)
                .collect()
        };
        if dependents.is_empty() {
            return Ok(());
        }

        let mut sources: Vec<NodeIndex> = Vec::new();
        for reference in output.references() {
            if reference.uuid == current.uuid {
                continue;
            }
            if let Some(source) = self.lookup(reference) {
                if self.graph[source].state == NodeState::Pending && !sources.contains(&source) {
                    sources.push(source);
                }
            }
        }
        for source in sources {
            for &dependent in &dependents {
                self.add_edge_idx(source, dependent, EdgeKind::Data);
            }
        }
        self.ensure_acyclic()
    }
}

/// The first job (depth-first) whose references all point outside `flow`.
fn first_root(flow: &Flow) -> Option<JobKey> {
    let jobs = flow.jobs();
    let internal: HashSet<Uuid> = jobs.iter().map(|j| j.uuid).collect();
    jobs.iter()
        .find(|j| j.references().iter().all(|r| !internal.contains(&r.uuid)))
        .or(jobs.first())
        .map(|j| j.key())
}

/// Pin a latest-version reference to `current` at its present index.
fn pin_reference(reference: &mut OutputReference, current: JobKey) {
    if reference.uuid == current.uuid && reference.index.is_none() {
        reference.index = Some(current.index);
    }
}

fn rename_reference(reference: &mut OutputReference, from: JobKey, to: JobKey) {
    if reference.uuid != from.uuid {
        return;
    }
    reference.uuid = to.uuid;
    if reference.index == Some(from.index) {
        reference.index = Some(to.index);
    }
}
