//! Flows: ordered, nestable containers of jobs.
//!
//! A flow's members run in their declared order unless data dependencies say
//! otherwise. Flows nest arbitrarily and may declare an output expression so a
//! flow can stand in for a job as a dependency source.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::input::Input;
use crate::job::Job;

/// Default name for flows built without one.
pub const DEFAULT_FLOW_NAME: &str = "Flow";

fn default_flow_name() -> String {
    DEFAULT_FLOW_NAME.to_string()
}

/// A member of a flow: a leaf job or a nested flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowMember {
    Job(Job),
    Flow(Flow),
}

impl From<Job> for FlowMember {
    fn from(job: Job) -> Self {
        FlowMember::Job(job)
    }
}

impl From<Flow> for FlowMember {
    fn from(flow: Flow) -> Self {
        FlowMember::Flow(flow)
    }
}

/// An ordered collection of jobs and nested flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default = "Uuid::now_v7")]
    pub uuid: Uuid,
    #[serde(default = "default_flow_name")]
    pub name: String,
    #[serde(default)]
    pub members: Vec<FlowMember>,
    /// Output expression, usually references into the members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Input>,
}

impl Flow {
    /// Create a flow from its members in execution order.
    pub fn new<I, M>(members: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<FlowMember>,
    {
        Self {
            uuid: Uuid::now_v7(),
            name: default_flow_name(),
            members: members.into_iter().map(Into::into).collect(),
            output: None,
        }
    }

    /// Set the flow name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Declare the flow's output expression.
    pub fn with_output(mut self, output: impl Into<Input>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Append a member at the end of the flow.
    pub fn add(&mut self, member: impl Into<FlowMember>) {
        self.members.push(member.into());
    }

    /// The declared output expression, if any.
    pub fn output(&self) -> Option<&Input> {
        self.output.as_ref()
    }

    /// True when the flow contains no jobs at any depth.
    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// All jobs at any depth, depth-first in declared order.
    pub fn jobs(&self) -> Vec<&Job> {
        let mut jobs = Vec::new();
        self.collect_jobs(&mut jobs);
        jobs
    }

    fn collect_jobs<'a>(&'a self, jobs: &mut Vec<&'a Job>) {
        for member in &self.members {
            match member {
                FlowMember::Job(job) => jobs.push(job),
                FlowMember::Flow(flow) => flow.collect_jobs(jobs),
            }
        }
    }

    /// Visit every job at any depth mutably.
    pub fn for_each_job_mut(&mut self, f: &mut impl FnMut(&mut Job)) {
        for member in &mut self.members {
            match member {
                FlowMember::Job(job) => f(job),
                FlowMember::Flow(flow) => flow.for_each_job_mut(f),
            }
        }
    }

    /// Uuids of all jobs at any depth.
    pub fn job_uuids(&self) -> Vec<Uuid> {
        self.jobs().iter().map(|j| j.uuid).collect()
    }
}

impl From<Job> for Flow {
    fn from(job: Job) -> Self {
        Flow::new([job])
    }
}
