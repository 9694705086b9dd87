//! In-process catalog of devices, pools and job definitions.
//!
//! The catalog owns the configured inventory and the structure of every
//! workflow. Run state (job status, runs, results) lives in the storage
//! layer instead.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;

use super::device::{Device, Pool, PoolError};
use super::job::Job;
use super::types::{DeviceId, JobId, PoolId};
use super::workflow::{EdgeSubtype, WorkflowEdge, WorkflowError};

/// Errors that can occur when reading or editing the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("pool not found: {0}")]
    PoolNotFound(PoolId),

    #[error("job '{0}' is not a workflow")]
    NotAWorkflow(JobId),

    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("catalog lock poisoned")]
    LockPoisoned,
}

/// Registry of devices, pools and jobs.
#[derive(Default)]
pub struct Catalog {
    devices: RwLock<BTreeMap<DeviceId, Device>>,
    pools: RwLock<BTreeMap<PoolId, Pool>>,
    jobs: RwLock<BTreeMap<JobId, Job>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_device(&self, device: Device) -> Result<(), CatalogError> {
        let mut devices = self.devices.write().map_err(|_| CatalogError::LockPoisoned)?;
        devices.insert(device.id.clone(), device);
        Ok(())
    }

    pub fn device(&self, id: &DeviceId) -> Result<Device, CatalogError> {
        let devices = self.devices.read().map_err(|_| CatalogError::LockPoisoned)?;
        devices
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::DeviceNotFound(id.clone()))
    }

    pub fn devices(&self) -> Result<Vec<Device>, CatalogError> {
        let devices = self.devices.read().map_err(|_| CatalogError::LockPoisoned)?;
        Ok(devices.values().cloned().collect())
    }

    pub fn insert_pool(&self, pool: Pool) -> Result<(), CatalogError> {
        pool.validate()?;
        let mut pools = self.pools.write().map_err(|_| CatalogError::LockPoisoned)?;
        pools.insert(pool.id.clone(), pool);
        Ok(())
    }

    pub fn pool(&self, id: &PoolId) -> Result<Pool, CatalogError> {
        let pools = self.pools.read().map_err(|_| CatalogError::LockPoisoned)?;
        pools
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::PoolNotFound(id.clone()))
    }

    pub fn pools(&self) -> Result<Vec<Pool>, CatalogError> {
        let pools = self.pools.read().map_err(|_| CatalogError::LockPoisoned)?;
        Ok(pools.values().cloned().collect())
    }

    /// Recompute a pool's membership against the current devices.
    ///
    /// The result is also stored as the pool's cached snapshot.
    pub fn compute_pool(&self, id: &PoolId) -> Result<Vec<DeviceId>, CatalogError> {
        let members = {
            let pools = self.pools.read().map_err(|_| CatalogError::LockPoisoned)?;
            let pool = pools
                .get(id)
                .ok_or_else(|| CatalogError::PoolNotFound(id.clone()))?;
            let devices = self.devices.read().map_err(|_| CatalogError::LockPoisoned)?;
            pool.compute_pool(devices.values())?
        };
        let mut pools = self.pools.write().map_err(|_| CatalogError::LockPoisoned)?;
        if let Some(pool) = pools.get_mut(id) {
            pool.cached_members = members.clone();
        }
        Ok(members)
    }

    /// Add a job, rejecting an existing id.
    pub fn add_job(&self, job: Job) -> Result<(), CatalogError> {
        let mut jobs = self.jobs.write().map_err(|_| CatalogError::LockPoisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(CatalogError::DuplicateJob(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Insert or replace a job.
    pub fn upsert_job(&self, job: Job) -> Result<(), CatalogError> {
        let mut jobs = self.jobs.write().map_err(|_| CatalogError::LockPoisoned)?;
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub fn job(&self, id: &JobId) -> Result<Job, CatalogError> {
        let jobs = self.jobs.read().map_err(|_| CatalogError::LockPoisoned)?;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| CatalogError::JobNotFound(id.clone()))
    }

    pub fn job_by_name(&self, name: &str) -> Result<Option<Job>, CatalogError> {
        let jobs = self.jobs.read().map_err(|_| CatalogError::LockPoisoned)?;
        Ok(jobs.values().find(|job| job.name == name).cloned())
    }

    pub fn jobs(&self) -> Result<Vec<Job>, CatalogError> {
        let jobs = self.jobs.read().map_err(|_| CatalogError::LockPoisoned)?;
        Ok(jobs.values().cloned().collect())
    }

    /// Workflows that list `job` as a member.
    pub fn workflows_containing(&self, job: &JobId) -> Result<Vec<JobId>, CatalogError> {
        let jobs = self.jobs.read().map_err(|_| CatalogError::LockPoisoned)?;
        Ok(jobs
            .values()
            .filter(|candidate| {
                candidate
                    .as_workflow()
                    .is_some_and(|workflow| workflow.contains(job))
            })
            .map(|workflow| workflow.id.clone())
            .collect())
    }

    /// Apply `edit` to a workflow under the write lock.
    fn edit_workflow<T>(
        &self,
        workflow_id: &JobId,
        edit: impl FnOnce(&mut Job) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut jobs = self.jobs.write().map_err(|_| CatalogError::LockPoisoned)?;
        let job = jobs
            .get_mut(workflow_id)
            .ok_or_else(|| CatalogError::JobNotFound(workflow_id.clone()))?;
        if job.as_workflow().is_none() {
            return Err(CatalogError::NotAWorkflow(workflow_id.clone()));
        }
        edit(job)
    }

    /// Add existing jobs as members of a workflow.
    ///
    /// Returns the ids actually added (members already present are skipped).
    pub fn add_jobs_to_workflow(
        &self,
        workflow_id: &JobId,
        job_ids: &[JobId],
    ) -> Result<Vec<JobId>, CatalogError> {
        {
            let jobs = self.jobs.read().map_err(|_| CatalogError::LockPoisoned)?;
            if let Some(missing) = job_ids.iter().find(|id| !jobs.contains_key(*id)) {
                return Err(CatalogError::JobNotFound(missing.clone()));
            }
        }
        self.edit_workflow(workflow_id, |job| {
            let workflow = job
                .as_workflow_mut()
                .ok_or_else(|| CatalogError::NotAWorkflow(workflow_id.clone()))?;
            Ok(job_ids
                .iter()
                .filter(|id| workflow.add_job((*id).clone()))
                .cloned()
                .collect())
        })
    }

    pub fn add_edge(
        &self,
        workflow_id: &JobId,
        subtype: EdgeSubtype,
        source: &JobId,
        destination: &JobId,
    ) -> Result<WorkflowEdge, CatalogError> {
        self.edit_workflow(workflow_id, |job| {
            let workflow = job
                .as_workflow_mut()
                .ok_or_else(|| CatalogError::NotAWorkflow(workflow_id.clone()))?;
            Ok(workflow
                .add_edge(subtype, source.clone(), destination.clone())?
                .clone())
        })
    }

    pub fn delete_edge(
        &self,
        workflow_id: &JobId,
        edge_name: &str,
    ) -> Result<WorkflowEdge, CatalogError> {
        self.edit_workflow(workflow_id, |job| {
            let workflow = job
                .as_workflow_mut()
                .ok_or_else(|| CatalogError::NotAWorkflow(workflow_id.clone()))?;
            Ok(workflow.remove_edge(edge_name)?)
        })
    }

    /// Remove a member and all of its edges. Returns the removed edges.
    pub fn delete_node(
        &self,
        workflow_id: &JobId,
        job_id: &JobId,
    ) -> Result<Vec<WorkflowEdge>, CatalogError> {
        let removed = self.edit_workflow(workflow_id, |job| {
            let workflow = job
                .as_workflow_mut()
                .ok_or_else(|| CatalogError::NotAWorkflow(workflow_id.clone()))?;
            Ok(workflow.remove_job(job_id)?)
        })?;
        let workflow_name = self.job(workflow_id)?.name;
        let mut jobs = self.jobs.write().map_err(|_| CatalogError::LockPoisoned)?;
        if let Some(member) = jobs.get_mut(job_id) {
            member.positions.remove(&workflow_name);
        }
        Ok(removed)
    }

    /// Store layout positions of members, keyed by the workflow's name.
    pub fn save_positions(
        &self,
        workflow_id: &JobId,
        positions: &HashMap<JobId, (f64, f64)>,
    ) -> Result<DateTime<Utc>, CatalogError> {
        let mut jobs = self.jobs.write().map_err(|_| CatalogError::LockPoisoned)?;
        let workflow_job = jobs
            .get_mut(workflow_id)
            .ok_or_else(|| CatalogError::JobNotFound(workflow_id.clone()))?;
        let workflow_name = workflow_job.name.clone();
        let workflow = workflow_job
            .as_workflow_mut()
            .ok_or_else(|| CatalogError::NotAWorkflow(workflow_id.clone()))?;
        workflow.reposition();
        let modified = workflow.last_modified.unwrap_or_else(Utc::now);

        for (job_id, position) in positions {
            if let Some(member) = jobs.get_mut(job_id) {
                member.positions.insert(workflow_name.clone(), *position);
            }
        }
        Ok(modified)
    }

    /// Copy a workflow under a new id and name.
    ///
    /// Members are shared with the original; positions are copied under the
    /// new name and every edge is renamed for the new id.
    pub fn duplicate_workflow(
        &self,
        workflow_id: &JobId,
        new_id: impl Into<JobId>,
        new_name: impl Into<String>,
    ) -> Result<Job, CatalogError> {
        let new_id = new_id.into();
        let new_name = new_name.into();
        let mut jobs = self.jobs.write().map_err(|_| CatalogError::LockPoisoned)?;
        if jobs.contains_key(&new_id) {
            return Err(CatalogError::DuplicateJob(new_id));
        }
        let original = jobs
            .get(workflow_id)
            .ok_or_else(|| CatalogError::JobNotFound(workflow_id.clone()))?;
        let workflow = original
            .as_workflow()
            .ok_or_else(|| CatalogError::NotAWorkflow(workflow_id.clone()))?;

        let mut copy = original.clone();
        copy.kind = super::job::JobKind::Workflow(workflow.duplicate(new_id.clone()));
        copy.id = new_id.clone();
        copy.name = new_name.clone();
        copy.positions.clear();
        let old_name = original.name.clone();
        let members = workflow.jobs().to_vec();

        for member in members {
            if let Some(job) = jobs.get_mut(&member) {
                if let Some(position) = job.positions.get(&old_name).copied() {
                    job.positions.insert(new_name.clone(), position);
                }
            }
        }
        jobs.insert(new_id, copy.clone());
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::MatchKind;
    use crate::core::job::Service;

    fn catalog() -> Catalog {
        let catalog = Catalog::new();
        for id in ["a", "b", "c"] {
            catalog
                .add_job(Job::service(id, id.to_uppercase(), Service::new("noop")))
                .unwrap();
        }
        catalog.add_job(Job::workflow("wf", "Workflow")).unwrap();
        catalog
            .add_jobs_to_workflow(&"wf".into(), &["a".into(), "b".into(), "c".into()])
            .unwrap();
        catalog
    }

    #[test]
    fn test_add_jobs_to_workflow_skips_existing() {
        let catalog = catalog();
        let added = catalog
            .add_jobs_to_workflow(&"wf".into(), &["a".into()])
            .unwrap();

        assert!(added.is_empty());
        assert_eq!(
            catalog.workflows_containing(&"a".into()).unwrap(),
            vec![JobId::new("wf")]
        );
    }

    #[test]
    fn test_add_jobs_to_workflow_unknown_job() {
        let catalog = catalog();
        let err = catalog
            .add_jobs_to_workflow(&"wf".into(), &["zz".into()])
            .unwrap_err();
        assert!(matches!(err, CatalogError::JobNotFound(id) if id.as_str() == "zz"));
    }

    #[test]
    fn test_delete_node_leaves_no_orphan_edges() {
        let catalog = catalog();
        let wf = JobId::new("wf");
        catalog
            .add_edge(&wf, EdgeSubtype::Success, &"a".into(), &"b".into())
            .unwrap();
        catalog
            .add_edge(&wf, EdgeSubtype::Failure, &"b".into(), &"c".into())
            .unwrap();

        let removed = catalog.delete_node(&wf, &"b".into()).unwrap();
        assert_eq!(removed.len(), 2);

        let job = catalog.job(&wf).unwrap();
        let workflow = job.as_workflow().unwrap();
        assert!(workflow.edges().is_empty());
        assert!(!workflow.contains(&"b".into()));
        assert!(catalog
            .delete_edge(&wf, "wf-success:a->b")
            .is_err());
    }

    #[test]
    fn test_edit_non_workflow() {
        let catalog = catalog();
        let err = catalog
            .add_edge(&"a".into(), EdgeSubtype::Success, &"b".into(), &"c".into())
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotAWorkflow(_)));
    }

    #[test]
    fn test_save_positions_and_duplicate() {
        let catalog = catalog();
        let wf = JobId::new("wf");
        catalog
            .add_edge(&wf, EdgeSubtype::Success, &"a".into(), &"b".into())
            .unwrap();
        let mut positions = HashMap::new();
        positions.insert(JobId::new("a"), (10.0, 20.0));
        catalog.save_positions(&wf, &positions).unwrap();

        assert_eq!(
            catalog.job(&"a".into()).unwrap().positions["Workflow"],
            (10.0, 20.0)
        );

        let copy = catalog.duplicate_workflow(&wf, "wf2", "Copy").unwrap();
        let workflow = copy.as_workflow().unwrap();
        assert_eq!(workflow.edges()[0].name, "wf2-success:a->b");
        assert_eq!(
            catalog.job(&"a".into()).unwrap().positions["Copy"],
            (10.0, 20.0)
        );
        assert!(matches!(
            catalog.duplicate_workflow(&wf, "wf2", "Again"),
            Err(CatalogError::DuplicateJob(_))
        ));
    }

    #[test]
    fn test_compute_pool_updates_cache() {
        let catalog = Catalog::new();
        catalog
            .insert_device(Device::new("r1", "r1").with_property("vendor", "Cisco"))
            .unwrap();
        catalog
            .insert_device(Device::new("r2", "r2").with_property("vendor", "Arista"))
            .unwrap();
        catalog
            .insert_pool(Pool::new("cisco", "Cisco").with_criterion(
                "vendor",
                "Cisco",
                MatchKind::Equality,
            ))
            .unwrap();

        let members = catalog.compute_pool(&"cisco".into()).unwrap();
        assert_eq!(members, vec![DeviceId::new("r1")]);
        assert_eq!(
            catalog.pool(&"cisco".into()).unwrap().cached_members,
            members
        );
    }
}
