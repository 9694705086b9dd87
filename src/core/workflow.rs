//! Workflow graphs: member jobs connected by typed edges.
//!
//! Unlike a DAG, a workflow graph may contain cycles and convergent paths.
//! The run engine walks it once per run, visiting each member at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use super::types::JobId;

/// Errors that can occur when editing or validating a workflow graph.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// An edge or operation referenced a job outside the workflow.
    #[error("job '{job}' is not a member of workflow '{workflow}'")]
    NotAMember { workflow: JobId, job: JobId },

    /// An edge with the same derived name already exists.
    #[error("duplicate edge: {0}")]
    DuplicateEdge(String),

    /// No edge with that name exists.
    #[error("edge not found: {0}")]
    EdgeNotFound(String),

    /// An edge name does not match its endpoints.
    #[error("edge '{found}' should be named '{expected}'")]
    MisnamedEdge { found: String, expected: String },

    /// The walk has nowhere to begin.
    #[error("workflow '{0}' has no start point")]
    NoStartPoint(JobId),
}

/// Branch condition carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeSubtype {
    /// Followed when the source succeeded.
    Success,
    /// Followed when the source failed.
    Failure,
    /// Followed regardless of outcome.
    Always,
}

impl EdgeSubtype {
    /// Whether an edge of this subtype is followed for the given outcome.
    pub fn matches(self, success: bool) -> bool {
        match self {
            Self::Success => success,
            Self::Failure => !success,
            Self::Always => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Always => "always",
        }
    }
}

impl fmt::Display for EdgeSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, typed edge between two members of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub name: String,
    pub subtype: EdgeSubtype,
    pub source: JobId,
    pub destination: JobId,
}

impl WorkflowEdge {
    /// Derive the unique name of an edge.
    pub fn derive_name(
        workflow: &JobId,
        subtype: EdgeSubtype,
        source: &JobId,
        destination: &JobId,
    ) -> String {
        format!("{}-{}:{}->{}", workflow, subtype, source, destination)
    }

    pub fn new(
        workflow: &JobId,
        subtype: EdgeSubtype,
        source: JobId,
        destination: JobId,
    ) -> Self {
        Self {
            name: Self::derive_name(workflow, subtype, &source, &destination),
            subtype,
            source,
            destination,
        }
    }

    fn touches(&self, job: &JobId) -> bool {
        &self.source == job || &self.destination == job
    }
}

fn default_true() -> bool {
    true
}

/// The graph owned by a workflow job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Identity of the owning job; part of every edge name.
    pub id: JobId,
    /// Member jobs, in insertion order.
    #[serde(default)]
    jobs: Vec<JobId>,
    #[serde(default)]
    edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    /// Children run against the workflow's targets instead of their own.
    #[serde(default = "default_true")]
    pub use_workflow_targets: bool,
}

impl Workflow {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            jobs: Vec::new(),
            edges: Vec::new(),
            last_modified: None,
            use_workflow_targets: true,
        }
    }

    pub fn jobs(&self) -> &[JobId] {
        &self.jobs
    }

    pub fn edges(&self) -> &[WorkflowEdge] {
        &self.edges
    }

    pub fn contains(&self, job: &JobId) -> bool {
        self.jobs.contains(job)
    }

    pub fn edge(&self, name: &str) -> Option<&WorkflowEdge> {
        self.edges.iter().find(|edge| edge.name == name)
    }

    fn touch(&mut self) {
        self.last_modified = Some(Utc::now());
    }

    /// Add a member. Returns false if it was already present.
    pub fn add_job(&mut self, job: JobId) -> bool {
        if self.contains(&job) {
            return false;
        }
        self.jobs.push(job);
        self.touch();
        true
    }

    /// Remove a member and every edge where it is source or destination.
    ///
    /// Returns the removed edges.
    pub fn remove_job(&mut self, job: &JobId) -> Result<Vec<WorkflowEdge>, WorkflowError> {
        if !self.contains(job) {
            return Err(self.not_a_member(job));
        }
        self.jobs.retain(|member| member != job);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.edges)
            .into_iter()
            .partition(|edge| edge.touches(job));
        self.edges = kept;
        self.touch();
        Ok(removed)
    }

    /// Add an edge between two members.
    pub fn add_edge(
        &mut self,
        subtype: EdgeSubtype,
        source: JobId,
        destination: JobId,
    ) -> Result<&WorkflowEdge, WorkflowError> {
        for endpoint in [&source, &destination] {
            if !self.contains(endpoint) {
                return Err(self.not_a_member(endpoint));
            }
        }
        let edge = WorkflowEdge::new(&self.id, subtype, source, destination);
        if self.edge(&edge.name).is_some() {
            return Err(WorkflowError::DuplicateEdge(edge.name));
        }
        self.edges.push(edge);
        self.touch();
        let index = self.edges.len() - 1;
        Ok(&self.edges[index])
    }

    /// Remove an edge by name.
    pub fn remove_edge(&mut self, name: &str) -> Result<WorkflowEdge, WorkflowError> {
        let index = self
            .edges
            .iter()
            .position(|edge| edge.name == name)
            .ok_or_else(|| WorkflowError::EdgeNotFound(name.to_string()))?;
        let edge = self.edges.remove(index);
        self.touch();
        Ok(edge)
    }

    /// Record a layout change.
    pub fn reposition(&mut self) {
        self.touch();
    }

    /// Edges leaving `job`, in insertion order.
    pub fn outgoing<'a>(&'a self, job: &'a JobId) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |edge| &edge.source == job)
    }

    /// Members with no incoming edge, in member order.
    pub fn roots(&self) -> Vec<JobId> {
        let targeted: HashSet<&JobId> = self.edges.iter().map(|e| &e.destination).collect();
        self.jobs
            .iter()
            .filter(|job| !targeted.contains(job))
            .cloned()
            .collect()
    }

    /// Jobs a run begins from.
    ///
    /// An empty or absent request falls back to [`Workflow::roots`]. An empty
    /// workflow has nothing to run and yields no start points.
    pub fn start_points(&self, requested: Option<&[JobId]>) -> Result<Vec<JobId>, WorkflowError> {
        if self.jobs.is_empty() {
            return Ok(Vec::new());
        }
        let points = match requested {
            Some(points) if !points.is_empty() => {
                let mut unique = Vec::with_capacity(points.len());
                for point in points {
                    if !self.contains(point) {
                        return Err(self.not_a_member(point));
                    }
                    if !unique.contains(point) {
                        unique.push(point.clone());
                    }
                }
                unique
            }
            _ => self.roots(),
        };
        if points.is_empty() {
            return Err(WorkflowError::NoStartPoint(self.id.clone()));
        }
        Ok(points)
    }

    /// Check that every edge references members and carries its derived name.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.destination] {
                if !self.contains(endpoint) {
                    return Err(self.not_a_member(endpoint));
                }
            }
            let expected =
                WorkflowEdge::derive_name(&self.id, edge.subtype, &edge.source, &edge.destination);
            if edge.name != expected {
                return Err(WorkflowError::MisnamedEdge {
                    found: edge.name.clone(),
                    expected,
                });
            }
        }
        let mut seen = HashSet::new();
        for edge in &self.edges {
            if !seen.insert(&edge.name) {
                return Err(WorkflowError::DuplicateEdge(edge.name.clone()));
            }
        }
        Ok(())
    }

    /// Copy this graph under a new identity, renaming every edge.
    pub fn duplicate(&self, new_id: impl Into<JobId>) -> Self {
        let id = new_id.into();
        let edges = self
            .edges
            .iter()
            .map(|edge| {
                WorkflowEdge::new(
                    &id,
                    edge.subtype,
                    edge.source.clone(),
                    edge.destination.clone(),
                )
            })
            .collect();
        Self {
            id,
            jobs: self.jobs.clone(),
            edges,
            last_modified: Some(Utc::now()),
            use_workflow_targets: self.use_workflow_targets,
        }
    }

    fn not_a_member(&self, job: &JobId) -> WorkflowError {
        WorkflowError::NotAMember {
            workflow: self.id.clone(),
            job: job.clone(),
        }
    }
}
