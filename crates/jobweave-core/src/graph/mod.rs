//! The mutable execution graph.
//!
//! Nodes are job versions keyed by `(uuid, index)`; edges point from a
//! dependency to its dependent and come in two kinds:
//!
//! - [`EdgeKind::Data`] -- the dependent's arguments reference the source's
//!   output. The dependent cannot run without it.
//! - [`EdgeKind::Order`] -- the dependent was declared later in a flow. It
//!   only waits for the source to be finished, successfully or not.
//!
//! The graph is a `petgraph` `StableDiGraph` so node indices stay valid while
//! response directives (replace, detour, addition) graft new subgraphs and
//! move edges around during a run. Every mutation is followed by a cycle
//! check.

mod builder;
mod mutation;

pub use builder::{FlatFlow, MemberChain, build_graph, flatten};

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use thiserror::Error;
use uuid::Uuid;

use jobweave_types::job::{Job, JobKey};
use jobweave_types::reference::OutputReference;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building or mutating the execution graph.
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("cyclic graph: {0}")]
    Cyclic(String),

    #[error("job {job} references {reference}, which is not part of the graph")]
    UnresolvableReference {
        job: JobKey,
        reference: OutputReference,
    },

    #[error("job {0} appears more than once")]
    DuplicateJob(JobKey),

    #[error("unknown job {0}")]
    UnknownJob(JobKey),
}

// ---------------------------------------------------------------------------
// Nodes and edges
// ---------------------------------------------------------------------------

/// Kind of dependency carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Data,
    Order,
}

/// Lifecycle of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Completed,
    /// Will never run: a data dependency asked to stop its children.
    Skipped,
}

/// A job version plus its scheduling bookkeeping.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub job: Job,
    /// Discovery order, used as the deterministic tie-breaker.
    pub seq: u64,
    pub state: NodeState,
}

enum Readiness {
    Ready,
    Blocked,
    Skip,
}

// ---------------------------------------------------------------------------
// ExecutionGraph
// ---------------------------------------------------------------------------

/// Jobs and their dependencies for one run.
#[derive(Debug, Default)]
pub struct ExecutionGraph {
    graph: StableDiGraph<GraphNode, EdgeKind>,
    by_key: HashMap<JobKey, NodeIndex>,
    /// Highest-index node per uuid.
    latest: HashMap<Uuid, NodeIndex>,
    next_seq: u64,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, key: JobKey) -> bool {
        self.by_key.contains_key(&key)
    }

    pub fn job(&self, key: JobKey) -> Option<&Job> {
        self.by_key.get(&key).map(|idx| &self.graph[*idx].job)
    }

    pub fn state(&self, key: JobKey) -> Option<NodeState> {
        self.by_key.get(&key).map(|idx| self.graph[*idx].state)
    }

    /// Key of the highest-index node for `uuid`.
    pub fn latest(&self, uuid: Uuid) -> Option<JobKey> {
        self.latest.get(&uuid).map(|idx| self.graph[*idx].job.key())
    }

    /// All node keys in discovery order.
    pub fn keys(&self) -> Vec<JobKey> {
        let mut nodes: Vec<&GraphNode> = self.nodes().collect();
        nodes.sort_by_key(|n| n.seq);
        nodes.into_iter().map(|n| n.job.key()).collect()
    }

    /// All edges as `(source, target, kind)`, sorted for stable comparison.
    pub fn edges(&self) -> Vec<(JobKey, JobKey, EdgeKind)> {
        let mut edges: Vec<(u64, u64, JobKey, JobKey, EdgeKind)> = self
            .graph
            .edge_references()
            .map(|e| {
                let source = &self.graph[e.source()];
                let target = &self.graph[e.target()];
                (source.seq, target.seq, source.job.key(), target.job.key(), *e.weight())
            })
            .collect();
        edges.sort_by_key(|(s, t, _, _, kind)| (*s, *t, *kind == EdgeKind::Order));
        edges.into_iter().map(|(_, _, s, t, k)| (s, t, k)).collect()
    }

    pub fn has_edge(&self, from: JobKey, to: JobKey, kind: EdgeKind) -> bool {
        match (self.by_key.get(&from), self.by_key.get(&to)) {
            (Some(a), Some(b)) => self.has_edge_idx(*a, *b, kind),
            _ => false,
        }
    }

    /// Keys of nodes that are neither completed nor skipped, in discovery order.
    pub fn pending(&self) -> Vec<JobKey> {
        let mut nodes: Vec<&GraphNode> = self
            .nodes()
            .filter(|n| n.state == NodeState::Pending)
            .collect();
        nodes.sort_by_key(|n| n.seq);
        nodes.into_iter().map(|n| n.job.key()).collect()
    }

    /// Targets of `key`'s outgoing edges of `kind`, in discovery order.
    pub fn successors(&self, key: JobKey, kind: EdgeKind) -> Vec<JobKey> {
        let Some(idx) = self.by_key.get(&key) else {
            return Vec::new();
        };
        let mut targets: Vec<&GraphNode> = self
            .outgoing(*idx, kind)
            .into_iter()
            .map(|t| &self.graph[t])
            .collect();
        targets.sort_by_key(|n| n.seq);
        targets.into_iter().map(|n| n.job.key()).collect()
    }

    // -- scheduling ---------------------------------------------------------

    /// The ready job with the smallest discovery number.
    ///
    /// A job is ready once every data dependency has completed and every
    /// order dependency has completed or been skipped. Pending jobs whose data
    /// dependency was skipped are marked skipped here.
    pub fn next_ready(&mut self) -> Option<JobKey> {
        loop {
            let pending: Vec<NodeIndex> = self
                .graph
                .node_indices()
                .filter(|idx| self.graph[*idx].state == NodeState::Pending)
                .collect();

            let mut skipped_any = false;
            let mut best: Option<NodeIndex> = None;
            for idx in pending {
                match self.readiness(idx) {
                    Readiness::Skip => {
                        self.graph[idx].state = NodeState::Skipped;
                        skipped_any = true;
                    }
                    Readiness::Ready => {
                        if best.is_none_or(|b| self.graph[idx].seq < self.graph[b].seq) {
                            best = Some(idx);
                        }
                    }
                    Readiness::Blocked => {}
                }
            }

            // A skip may unblock order dependents, so rescan.
            if !skipped_any {
                return best.map(|idx| self.graph[idx].job.key());
            }
        }
    }

    fn readiness(&self, idx: NodeIndex) -> Readiness {
        let mut blocked = false;
        for edge in self.graph.edges_directed(idx, Direction::Incoming) {
            match (*edge.weight(), self.graph[edge.source()].state) {
                (_, NodeState::Completed) => {}
                (EdgeKind::Order, NodeState::Skipped) => {}
                (EdgeKind::Data, NodeState::Skipped) => return Readiness::Skip,
                (_, NodeState::Pending) => blocked = true,
            }
        }
        if blocked {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    pub fn mark_completed(&mut self, key: JobKey) -> Result<(), GraphError> {
        let idx = self.index_of(key)?;
        self.graph[idx].state = NodeState::Completed;
        Ok(())
    }

    /// Skip every pending job reachable from `key` through data edges.
    ///
    /// Returns the keys that were newly skipped, in discovery order.
    pub fn skip_data_dependents(&mut self, key: JobKey) -> Result<Vec<JobKey>, GraphError> {
        let start = self.index_of(key)?;
        let mut queue: VecDeque<NodeIndex> = self.outgoing(start, EdgeKind::Data).into();
        let mut skipped = Vec::new();
        while let Some(idx) = queue.pop_front() {
            if self.graph[idx].state != NodeState::Pending {
                continue;
            }
            self.graph[idx].state = NodeState::Skipped;
            skipped.push(idx);
            queue.extend(self.outgoing(idx, EdgeKind::Data));
        }
        skipped.sort_by_key(|idx| self.graph[*idx].seq);
        Ok(skipped
            .into_iter()
            .map(|idx| self.graph[idx].job.key())
            .collect())
    }

    // -- construction -------------------------------------------------------

    /// Add a flattened subgraph.
    ///
    /// New jobs get the next discovery numbers in flattening order. Data edges
    /// come from each job's references: a reference with an index targets that
    /// exact version when present, otherwise the latest version of its uuid.
    /// Member chains are applied afterwards, innermost first: every sink of the
    /// previous member gets an order edge to every source of the next, except
    /// where one would close a cycle against the data edges. Returns the
    /// indices of the new nodes in discovery order.
    pub(crate) fn insert(
        &mut self,
        flat: FlatFlow,
        allow_external: bool,
    ) -> Result<Vec<NodeIndex>, GraphError> {
        let mut added = Vec::with_capacity(flat.jobs.len());
        for job in flat.jobs {
            let key = job.key();
            if self.by_key.contains_key(&key) {
                return Err(GraphError::DuplicateJob(key));
            }
            let idx = self.graph.add_node(GraphNode {
                job,
                seq: self.next_seq,
                state: NodeState::Pending,
            });
            self.next_seq += 1;
            self.by_key.insert(key, idx);
            let newer = self
                .latest
                .get(&key.uuid)
                .is_none_or(|cur| self.graph[*cur].job.index <= key.index);
            if newer {
                self.latest.insert(key.uuid, idx);
            }
            added.push(idx);
        }

        for &idx in &added {
            let job = &self.graph[idx].job;
            let key = job.key();
            let mut sources = Vec::new();
            for reference in job.references() {
                match self.lookup(reference) {
                    Some(source) => sources.push(source),
                    None if allow_external => {}
                    None => {
                        return Err(GraphError::UnresolvableReference {
                            job: key,
                            reference: reference.clone(),
                        });
                    }
                }
            }
            for source in sources {
                self.add_edge_idx(source, idx, EdgeKind::Data);
            }
        }
        self.ensure_acyclic()?;

        for (previous, next) in flat.chains {
            let previous = self.indices_of(&previous)?;
            let next = self.indices_of(&next)?;
            for a in self.sinks(&previous) {
                for b in self.sources(&next) {
                    if has_path_connecting(&self.graph, b, a, None) {
                        tracing::debug!(
                            from = %self.graph[a].job.key(),
                            to = %self.graph[b].job.key(),
                            "order edge dropped, data dependency runs the other way"
                        );
                        continue;
                    }
                    self.add_edge_idx(a, b, EdgeKind::Order);
                }
            }
        }

        Ok(added)
    }

    /// Nodes of `set` with no outgoing edge to another node of `set`.
    ///
    /// These are the jobs that finish a subgraph. Keeps the order of `set`.
    pub(crate) fn sinks(&self, set: &[NodeIndex]) -> Vec<NodeIndex> {
        let members: HashSet<NodeIndex> = set.iter().copied().collect();
        set.iter()
            .copied()
            .filter(|idx| {
                !self
                    .graph
                    .neighbors_directed(*idx, Direction::Outgoing)
                    .any(|t| t != *idx && members.contains(&t))
            })
            .collect()
    }

    /// Nodes of `set` with no incoming edge from another node of `set`.
    pub(crate) fn sources(&self, set: &[NodeIndex]) -> Vec<NodeIndex> {
        let members: HashSet<NodeIndex> = set.iter().copied().collect();
        set.iter()
            .copied()
            .filter(|idx| {
                !self
                    .graph
                    .neighbors_directed(*idx, Direction::Incoming)
                    .any(|s| s != *idx && members.contains(&s))
            })
            .collect()
    }

    /// Add an edge between existing jobs. Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: JobKey, to: JobKey, kind: EdgeKind) -> Result<(), GraphError> {
        let (a, b) = (self.index_of(from)?, self.index_of(to)?);
        self.add_edge_idx(a, b, kind);
        Ok(())
    }

    /// Fail with [`GraphError::Cyclic`] if the graph has a cycle.
    pub fn ensure_acyclic(&self) -> Result<(), GraphError> {
        toposort(&self.graph, None).map(|_| ()).map_err(|cycle| {
            let node = &self.graph[cycle.node_id()];
            GraphError::Cyclic(format!(
                "cycle detected involving job '{}' ({})",
                node.job.name,
                node.job.key()
            ))
        })
    }

    // -- internals ----------------------------------------------------------

    fn nodes(&self) -> impl Iterator<Item = &GraphNode> + '_ {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    fn index_of(&self, key: JobKey) -> Result<NodeIndex, GraphError> {
        self.by_key
            .get(&key)
            .copied()
            .ok_or(GraphError::UnknownJob(key))
    }

    fn indices_of(&self, keys: &[JobKey]) -> Result<Vec<NodeIndex>, GraphError> {
        keys.iter().map(|key| self.index_of(*key)).collect()
    }

    fn lookup(&self, reference: &OutputReference) -> Option<NodeIndex> {
        reference
            .index
            .and_then(|index| self.by_key.get(&JobKey::new(reference.uuid, index)))
            .or_else(|| self.latest.get(&reference.uuid))
            .copied()
    }

    fn has_edge_idx(&self, from: NodeIndex, to: NodeIndex, kind: EdgeKind) -> bool {
        self.graph
            .edges_connecting(from, to)
            .any(|e| *e.weight() == kind)
    }

    fn add_edge_idx(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind) {
        if !self.has_edge_idx(from, to, kind) {
            self.graph.add_edge(from, to, kind);
        }
    }

    fn outgoing(&self, idx: NodeIndex, kind: EdgeKind) -> Vec<NodeIndex> {
        let mut targets: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| *e.weight() == kind)
            .map(|e| e.target())
            .collect();
        targets.dedup();
        targets
    }

    /// Move every outgoing edge of `from` to start at `to` instead, skipping
    /// targets in `exclude`. Returns the affected targets.
    fn move_outgoing_edges(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        exclude: &HashSet<NodeIndex>,
    ) -> Vec<NodeIndex> {
        let edges: Vec<_> = self
            .graph
            .edges_directed(from, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), *e.weight()))
            .collect();
        let mut moved = Vec::new();
        for (id, target, kind) in edges {
            if exclude.contains(&target) {
                continue;
            }
            self.graph.remove_edge(id);
            self.add_edge_idx(to, target, kind);
            if !moved.contains(&target) {
                moved.push(target);
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobweave_types::flow::Flow;

    fn append(arg: impl Into<jobweave_types::input::Input>) -> Job {
        Job::new("append_end", [arg])
    }

    #[test]
    fn test_next_ready_follows_discovery_order() {
        let a = append("a");
        let b = append("b");
        let (ka, kb) = (a.key(), b.key());
        let mut graph = build_graph(&Flow::new([a, b]), false).unwrap();

        assert_eq!(graph.next_ready(), Some(ka));
        graph.mark_completed(ka).unwrap();
        assert_eq!(graph.next_ready(), Some(kb));
        graph.mark_completed(kb).unwrap();
        assert_eq!(graph.next_ready(), None);
        assert!(graph.pending().is_empty());
    }

    #[test]
    fn test_data_dependency_blocks_until_completed() {
        let a = append("a");
        let b = append(a.output());
        let (ka, kb) = (a.key(), b.key());
        // Declared out of order: b first, a second.
        let mut graph = build_graph(&Flow::new([b, a]), false).unwrap();

        assert_eq!(graph.next_ready(), Some(ka));
        graph.mark_completed(ka).unwrap();
        assert_eq!(graph.next_ready(), Some(kb));
    }

    #[test]
    fn test_skip_data_dependents_is_transitive_and_spares_order_dependents() {
        let a = append("a");
        let b = append(a.output());
        let c = append(b.output());
        let d = append("d");
        let (ka, kb, kc, kd) = (a.key(), b.key(), c.key(), d.key());
        let mut graph = build_graph(&Flow::new([a, b, c, d]), false).unwrap();

        graph.mark_completed(ka).unwrap();
        assert_eq!(graph.skip_data_dependents(ka).unwrap(), vec![kb, kc]);
        assert_eq!(graph.state(kb), Some(NodeState::Skipped));
        assert_eq!(graph.state(kc), Some(NodeState::Skipped));

        // d only has an order edge from c, so it still runs.
        assert_eq!(graph.next_ready(), Some(kd));
    }

    #[test]
    fn test_next_ready_lazily_skips_data_dependents_of_skipped_jobs() {
        let a = append("a");
        let b = append("b");
        let c = append(b.output());
        let (ka, kb, kc) = (a.key(), b.key(), c.key());
        let mut graph = build_graph(&Flow::new([a, b]), false).unwrap();
        graph
            .insert(flatten(&Flow::new([c])), false)
            .unwrap();

        graph.mark_completed(ka).unwrap();
        graph.graph[graph.by_key[&kb]].state = NodeState::Skipped;
        assert_eq!(graph.next_ready(), None);
        assert_eq!(graph.state(kc), Some(NodeState::Skipped));
    }

    #[test]
    fn test_unknown_job_errors() {
        let mut graph = ExecutionGraph::new();
        let key = JobKey::new(Uuid::now_v7(), 1);
        assert_eq!(graph.mark_completed(key), Err(GraphError::UnknownJob(key)));
        assert!(graph.successors(key, EdgeKind::Data).is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_graph_error_display() {
        let key = JobKey::new(Uuid::nil(), 1);
        assert_eq!(
            GraphError::DuplicateJob(key).to_string(),
            format!("job {key} appears more than once")
        );
        assert_eq!(
            GraphError::Cyclic("x".to_string()).to_string(),
            "cyclic graph: x"
        );
    }
}
