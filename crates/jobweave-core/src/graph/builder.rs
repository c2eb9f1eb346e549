//! Flattening flows into jobs plus member chains.
//!
//! Consecutive members of a flow are chained: every exit job of member `i`
//! must finish before any entry job of member `i + 1` starts. Entry and exit
//! jobs depend on the data edges inside a member (a member declared as
//! `[b(a), a]` enters at `a` and exits at `b`), so flattening only records
//! which jobs belong to each side of a chain. The graph resolves them to
//! order edges once its data edges exist.

use jobweave_types::flow::{Flow, FlowMember};
use jobweave_types::job::{Job, JobKey};

use super::{ExecutionGraph, GraphError};

/// Jobs of two consecutive flow members, `(previous, next)`.
pub type MemberChain = (Vec<JobKey>, Vec<JobKey>);

/// A flow reduced to its jobs and member chains.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatFlow {
    /// Jobs in depth-first declaration order.
    pub jobs: Vec<Job>,
    /// Chains between consecutive members, innermost flows first.
    pub chains: Vec<MemberChain>,
}

impl FlatFlow {
    pub fn keys(&self) -> Vec<JobKey> {
        self.jobs.iter().map(Job::key).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Flatten `flow` into jobs and member chains.
pub fn flatten(flow: &Flow) -> FlatFlow {
    let mut flat = FlatFlow::default();
    flatten_into(flow, &mut flat);
    flat
}

fn flatten_into(flow: &Flow, flat: &mut FlatFlow) {
    let mut previous: Option<Vec<JobKey>> = None;
    for member in &flow.members {
        let start = flat.jobs.len();
        match member {
            FlowMember::Job(job) => flat.jobs.push(job.clone()),
            FlowMember::Flow(inner) => flatten_into(inner, flat),
        }
        // Empty nested flows contribute nothing and don't break the chain.
        if flat.jobs.len() == start {
            continue;
        }
        let keys: Vec<JobKey> = flat.jobs[start..].iter().map(Job::key).collect();
        if let Some(prev) = previous.take() {
            flat.chains.push((prev, keys.clone()));
        }
        previous = Some(keys);
    }
}

/// Build the execution graph for a submitted flow.
///
/// Fails when the same job appears twice, when a reference points at a job
/// outside the flow (unless `allow_external` is set), or when the data edges
/// form a cycle.
pub fn build_graph(flow: &Flow, allow_external: bool) -> Result<ExecutionGraph, GraphError> {
    let mut graph = ExecutionGraph::new();
    graph.insert(flatten(flow), allow_external)?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeKind;
    use jobweave_types::reference::OutputReference;
    use uuid::Uuid;

    fn append(arg: impl Into<jobweave_types::input::Input>) -> Job {
        Job::new("append_end", [arg])
    }

    #[test]
    fn test_single_job() {
        let job = append("12345");
        let key = job.key();
        let graph = build_graph(&Flow::from(job), false).unwrap();
        assert_eq!(graph.keys(), vec![key]);
        assert!(graph.edges().is_empty());
    }

    #[test]
    fn test_connected_flow_has_data_and_order_edges() {
        let job1 = append("12345");
        let job2 = append(job1.output());
        let (k1, k2) = (job1.key(), job2.key());

        let graph = build_graph(&Flow::new([job1, job2]), false).unwrap();
        assert_eq!(
            graph.edges(),
            vec![(k1, k2, EdgeKind::Data), (k1, k2, EdgeKind::Order)]
        );
    }

    #[test]
    fn test_nested_flow_chains_exit_to_entry() {
        let j1 = append("12345");
        let j2 = append(j1.output());
        let j3 = append("12345");
        let j4 = append(j3.output());
        let keys = [j1.key(), j2.key(), j3.key(), j4.key()];

        let flow = Flow::new([Flow::new([j1, j2]), Flow::new([j3, j4])]);
        let flat = flatten(&flow);
        assert_eq!(flat.keys(), keys.to_vec());
        assert_eq!(
            flat.chains,
            vec![
                (vec![keys[0]], vec![keys[1]]),
                (vec![keys[2]], vec![keys[3]]),
                (vec![keys[0], keys[1]], vec![keys[2], keys[3]]),
            ]
        );

        let graph = build_graph(&flow, false).unwrap();
        assert_eq!(graph.keys(), keys.to_vec());
        assert!(graph.has_edge(keys[1], keys[2], EdgeKind::Order));
        assert!(!graph.has_edge(keys[1], keys[2], EdgeKind::Data));
        // Only the exit of the first member feeds the second member.
        assert!(!graph.has_edge(keys[0], keys[2], EdgeKind::Order));
    }

    #[test]
    fn test_empty_members_are_skipped() {
        let a = append("a");
        let b = append("b");
        let (ka, kb) = (a.key(), b.key());
        let flow = Flow::new([
            FlowMember::from(a),
            FlowMember::from(Flow::new(Vec::<Job>::new())),
            FlowMember::from(b),
        ]);
        assert_eq!(flatten(&flow).chains, vec![(vec![ka], vec![kb])]);
    }

    #[test]
    fn test_member_exit_follows_data_edges() {
        // The nested member is declared [b(a), a]: it enters at a, exits at b.
        let x = append("x");
        let a = append("a");
        let b = append(a.output());
        let c = append("c");
        let (kx, ka, kb, kc) = (x.key(), a.key(), b.key(), c.key());
        let flow = Flow::new([
            FlowMember::from(x),
            FlowMember::from(Flow::new([b, a])),
            FlowMember::from(c),
        ]);

        let graph = build_graph(&flow, false).unwrap();
        assert!(graph.has_edge(kx, ka, EdgeKind::Order));
        assert!(!graph.has_edge(kx, kb, EdgeKind::Order));
        assert!(graph.has_edge(kb, kc, EdgeKind::Order));
        assert!(!graph.has_edge(ka, kc, EdgeKind::Order));
        assert!(!graph.has_edge(kb, ka, EdgeKind::Order));
    }

    #[test]
    fn test_order_edge_against_data_edge_is_dropped() {
        let a = append("a");
        let b = append(a.output());
        let (ka, kb) = (a.key(), b.key());
        let graph = build_graph(&Flow::new([b, a]), false).unwrap();
        assert_eq!(graph.edges(), vec![(ka, kb, EdgeKind::Data)]);
    }

    #[test]
    fn test_reference_cycle_is_rejected() {
        let mut a = append("a");
        let b = append(a.output());
        a.args = vec![b.output().into()];

        let err = build_graph(&Flow::new([a, b]), false).unwrap_err();
        assert!(matches!(err, GraphError::Cyclic(_)));
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let mut a = append("a");
        a.args = vec![a.output().into()];
        let err = build_graph(&Flow::from(a), false).unwrap_err();
        assert!(matches!(err, GraphError::Cyclic(_)));
    }

    #[test]
    fn test_external_reference() {
        let outside = OutputReference::new(Uuid::now_v7());
        let job = append(outside.clone());
        let key = job.key();
        let flow = Flow::from(job);

        let err = build_graph(&flow, false).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnresolvableReference {
                job: key,
                reference: outside
            }
        );
        assert!(build_graph(&flow, true).is_ok());
    }

    #[test]
    fn test_duplicate_job_rejected() {
        let job = append("a");
        let key = job.key();
        let err = build_graph(&Flow::new([job.clone(), job]), false).unwrap_err();
        assert_eq!(err, GraphError::DuplicateJob(key));
    }
}
