//! Result retrieval and comparison.
//!
//! Results are addressed through a [`ResultSource`]: a run, a device, a
//! workflow or a service, each with a runtime and a selector saying which
//! device (or which child job) is wanted.

pub mod compare;

pub use compare::{diff, render, render_lines, Comparison, Opcode, Tag};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core::types::{DeviceId, JobId, Runtime};
use crate::storage::{DeviceFilter, ResultFilter, Storage, StorageError, StoredResult};

/// Errors raised while looking up results.
#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("no result for {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Which device results to return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelector {
    /// The job-level result.
    Global,
    /// Every per-device result.
    All,
    AllPassed,
    AllFailed,
    Device(DeviceId),
}

impl FromStr for DeviceSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "global" => Self::Global,
            "all" => Self::All,
            "all passed" => Self::AllPassed,
            "all failed" => Self::AllFailed,
            id => Self::Device(DeviceId::new(id)),
        })
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::All => f.write_str("all"),
            Self::AllPassed => f.write_str("all passed"),
            Self::AllFailed => f.write_str("all failed"),
            Self::Device(id) => write!(f, "{}", id),
        }
    }
}

/// Which child jobs of a workflow run to return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobSelector {
    All,
    AllPassed,
    AllFailed,
    Job(JobId),
}

impl FromStr for JobSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "all" => Self::All,
            "all passed" => Self::AllPassed,
            "all failed" => Self::AllFailed,
            id => Self::Job(JobId::new(id)),
        })
    }
}

impl fmt::Display for JobSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::AllPassed => f.write_str("all passed"),
            Self::AllFailed => f.write_str("all failed"),
            Self::Job(id) => write!(f, "{}", id),
        }
    }
}

/// Where a result comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultSource {
    /// Results of the run with this runtime.
    Run {
        runtime: Runtime,
        device: DeviceSelector,
    },
    /// Result of one device at one runtime.
    Device { device: DeviceId, runtime: Runtime },
    /// Results inside a workflow run.
    ///
    /// With [`JobSelector::Job`] the device selector applies to that child
    /// job. Otherwise the child jobs' global results are returned by job name.
    Workflow {
        workflow: JobId,
        runtime: Runtime,
        device: DeviceSelector,
        job: JobSelector,
    },
    /// Results of a service run.
    Service {
        service: JobId,
        runtime: Runtime,
        device: DeviceSelector,
    },
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run { runtime, device } => write!(f, "run {} ({})", runtime, device),
            Self::Device { device, runtime } => write!(f, "device {} at {}", device, runtime),
            Self::Workflow {
                workflow,
                runtime,
                device,
                job,
            } => write!(
                f,
                "workflow {} at {} (job {}, device {})",
                workflow, runtime, job, device
            ),
            Self::Service {
                service,
                runtime,
                device,
            } => write!(f, "service {} at {} ({})", service, runtime, device),
        }
    }
}

/// Fetch the results a source points at.
///
/// Single selectors return the stored payload, or `None` if nothing was
/// stored. Fan-out selectors return an object keyed by device or job name,
/// possibly empty.
pub async fn get_results(
    storage: &dyn Storage,
    source: &ResultSource,
) -> Result<Option<Value>, ResultsError> {
    match source {
        ResultSource::Run { runtime, device } => {
            let run = storage.get_run(runtime).await?;
            let filter = ResultFilter::new().runtime(runtime.clone()).job(run.job_id);
            select_devices(storage, filter, device).await
        }
        ResultSource::Device { device, runtime } => {
            let filter = ResultFilter::new()
                .runtime(runtime.clone())
                .device(DeviceFilter::Device(device.clone()));
            Ok(first_result(storage, &filter).await?)
        }
        ResultSource::Workflow {
            workflow,
            runtime,
            device,
            job,
        } => match job {
            JobSelector::Job(job_id) => {
                let filter = ResultFilter::new()
                    .parent_runtime(runtime.clone())
                    .job(job_id.clone());
                select_devices(storage, filter, device).await
            }
            selector => {
                let passed = match selector {
                    JobSelector::AllPassed => Some(true),
                    JobSelector::AllFailed => Some(false),
                    _ => None,
                };
                let mut jobs = Map::new();
                for child in storage.list_child_runs(runtime).await? {
                    if &child.job_id == workflow {
                        continue;
                    }
                    if passed.is_some_and(|p| child.success != Some(p)) {
                        continue;
                    }
                    let filter = ResultFilter::new()
                        .runtime(child.runtime.clone())
                        .job(child.job_id.clone())
                        .device(DeviceFilter::Global);
                    if let Some(result) = first_result(storage, &filter).await? {
                        jobs.insert(child.job_name, result);
                    }
                }
                Ok(Some(Value::Object(jobs)))
            }
        },
        ResultSource::Service {
            service,
            runtime,
            device,
        } => {
            let filter = ResultFilter::new()
                .runtime(runtime.clone())
                .job(service.clone());
            select_devices(storage, filter, device).await
        }
    }
}

async fn first_result(
    storage: &dyn Storage,
    filter: &ResultFilter,
) -> Result<Option<Value>, StorageError> {
    Ok(storage
        .list_results(filter)
        .await?
        .into_iter()
        .next()
        .map(|r| r.result))
}

async fn select_devices(
    storage: &dyn Storage,
    filter: ResultFilter,
    selector: &DeviceSelector,
) -> Result<Option<Value>, ResultsError> {
    let filter = match selector {
        DeviceSelector::Global => {
            return Ok(first_result(storage, &filter.device(DeviceFilter::Global)).await?)
        }
        DeviceSelector::Device(id) => {
            return Ok(first_result(storage, &filter.device(DeviceFilter::Device(id.clone()))).await?)
        }
        DeviceSelector::All => filter.device(DeviceFilter::AnyDevice),
        DeviceSelector::AllPassed => filter.device(DeviceFilter::AnyDevice).success(true),
        DeviceSelector::AllFailed => filter.device(DeviceFilter::AnyDevice).success(false),
    };
    let devices: Map<String, Value> = storage
        .list_results(&filter)
        .await?
        .into_iter()
        .map(|r| (device_label(&r), r.result))
        .collect();
    Ok(Some(Value::Object(devices)))
}

fn device_label(result: &StoredResult) -> String {
    match (&result.device_name, &result.device_id) {
        (Some(name), _) => name.clone(),
        (None, Some(id)) => id.to_string(),
        (None, None) => "global".to_string(),
    }
}

/// Compare the results behind two sources line by line.
pub async fn compare_results(
    storage: &dyn Storage,
    first: &ResultSource,
    second: &ResultSource,
) -> Result<Comparison, ResultsError> {
    let first_value = get_results(storage, first)
        .await?
        .ok_or_else(|| ResultsError::NotFound(first.to_string()))?;
    let second_value = get_results(storage, second)
        .await?
        .ok_or_else(|| ResultsError::NotFound(second.to_string()))?;
    Ok(diff(&first_value, &second_value))
}

/// What runtimes are listed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeScope {
    Job(JobId),
    Device(DeviceId),
}

/// Runtimes with at least one stored result in scope, oldest first.
pub async fn get_runtimes(
    storage: &dyn Storage,
    scope: &RuntimeScope,
) -> Result<Vec<Runtime>, ResultsError> {
    let filter = match scope {
        RuntimeScope::Job(id) => ResultFilter::new().job(id.clone()),
        RuntimeScope::Device(id) => ResultFilter::new().device(DeviceFilter::Device(id.clone())),
    };
    let runtimes: BTreeSet<Runtime> = storage
        .list_results(&filter)
        .await?
        .into_iter()
        .map(|r| r.runtime)
        .collect();
    Ok(runtimes.into_iter().collect())
}

const DEFAULT_DEVICE_CHOICES: [(&str, &str); 4] = [
    ("global", "Entire job payload"),
    ("all", "All devices"),
    ("all failed", "All devices that failed"),
    ("all passed", "All devices that passed"),
];

const DEFAULT_JOB_CHOICES: [(&str, &str); 3] = [
    ("all", "All jobs"),
    ("all failed", "All jobs that failed"),
    ("all passed", "All jobs that passed"),
];

/// Device choices for a runtime as `(value, label)` pairs.
///
/// The selector keywords come first, then every device with a result at
/// that runtime. With a job, the job's results inside the workflow run with
/// that runtime are considered as well.
pub async fn get_device_list(
    storage: &dyn Storage,
    runtime: &Runtime,
    job: Option<&JobId>,
) -> Result<Vec<(String, String)>, ResultsError> {
    let results = match job {
        Some(job_id) => storage
            .list_results(
                &ResultFilter::new()
                    .job(job_id.clone())
                    .device(DeviceFilter::AnyDevice),
            )
            .await?
            .into_iter()
            .filter(|r| &r.runtime == runtime || r.parent_runtime.as_ref() == Some(runtime))
            .collect(),
        None => {
            storage
                .list_results(
                    &ResultFilter::new()
                        .runtime(runtime.clone())
                        .device(DeviceFilter::AnyDevice),
                )
                .await?
        }
    };

    let mut choices = labelled(&DEFAULT_DEVICE_CHOICES);
    let mut seen = HashSet::new();
    for result in results {
        if let Some(id) = result.device_id.as_ref() {
            if seen.insert(id.clone()) {
                choices.push((id.to_string(), device_label(&result)));
            }
        }
    }
    Ok(choices)
}

/// Job choices for a workflow run as `(value, label)` pairs.
pub async fn get_job_list(
    storage: &dyn Storage,
    runtime: &Runtime,
) -> Result<Vec<(String, String)>, ResultsError> {
    let mut choices = labelled(&DEFAULT_JOB_CHOICES);
    let mut seen = HashSet::new();
    for child in storage.list_child_runs(runtime).await? {
        if seen.insert(child.job_id.clone()) {
            choices.push((child.job_id.to_string(), child.job_name));
        }
    }
    Ok(choices)
}

fn labelled(defaults: &[(&str, &str)]) -> Vec<(String, String)> {
    defaults
        .iter()
        .map(|(value, label)| (value.to_string(), label.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workflow::EdgeSubtype;
    use crate::execution::{RunOutcome, RunRequest};
    use crate::testing::TestHarness;

    async fn run_branching(harness: &TestHarness) -> RunOutcome {
        harness.add_service("a", false);
        harness.add_service("b", false);
        harness.add_service("c", true);
        harness.add_workflow(
            "wf",
            &["a", "b", "c"],
            &[
                (EdgeSubtype::Success, "a", "b"),
                (EdgeSubtype::Failure, "a", "c"),
            ],
        );
        harness.driver().fail_device("r2");
        let outcome = harness
            .run("a", RunRequest::new().with_targets(["r1", "r2"]))
            .await
            .unwrap();
        assert!(!outcome.success);
        outcome
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("global".parse::<DeviceSelector>().unwrap(), DeviceSelector::Global);
        assert_eq!("all failed".parse::<DeviceSelector>().unwrap(), DeviceSelector::AllFailed);
        assert_eq!(
            "r1".parse::<DeviceSelector>().unwrap(),
            DeviceSelector::Device("r1".into())
        );
        assert_eq!("all passed".parse::<JobSelector>().unwrap(), JobSelector::AllPassed);
        assert_eq!("backup".parse::<JobSelector>().unwrap(), JobSelector::Job("backup".into()));
        assert_eq!(DeviceSelector::AllFailed.to_string(), "all failed");
    }

    #[tokio::test]
    async fn test_service_device_selectors() {
        let harness = TestHarness::new().with_devices(["r1", "r2", "r3"]);
        let outcome = run_branching(&harness).await;
        let storage = harness.storage().as_ref();

        let source = |device| ResultSource::Service {
            service: "a".into(),
            runtime: outcome.runtime.clone(),
            device,
        };

        let failed = get_results(storage, &source(DeviceSelector::AllFailed))
            .await
            .unwrap()
            .unwrap();
        let failed = failed.as_object().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed.contains_key("r2"));

        let passed = get_results(storage, &source(DeviceSelector::AllPassed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(passed.as_object().unwrap().len(), 1);

        let global = get_results(storage, &source(DeviceSelector::Global))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(global["success"], false);

        let missing = get_results(storage, &source(DeviceSelector::Device("r3".into())))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_run_and_device_sources() {
        let harness = TestHarness::new().with_devices(["r1", "r2"]);
        let outcome = run_branching(&harness).await;
        let storage = harness.storage().as_ref();

        let all = get_results(
            storage,
            &ResultSource::Run {
                runtime: outcome.runtime.clone(),
                device: DeviceSelector::All,
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(all.as_object().unwrap().len(), 2);

        let r1 = get_results(
            storage,
            &ResultSource::Device {
                device: "r1".into(),
                runtime: outcome.runtime.clone(),
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(r1["device"], "r1");
    }

    #[tokio::test]
    async fn test_workflow_job_selectors() {
        let harness = TestHarness::new().with_devices(["r1", "r2"]);
        harness.add_service("a", false);
        harness.add_service("b", true);
        harness.add_service("c", true);
        harness.add_workflow(
            "wf",
            &["a", "b", "c"],
            &[
                (EdgeSubtype::Success, "a", "b"),
                (EdgeSubtype::Failure, "a", "c"),
            ],
        );
        harness.driver().fail_device("r2");
        let outcome = harness
            .run("wf", RunRequest::new().with_targets(["r1", "r2"]))
            .await
            .unwrap();
        let storage = harness.storage().as_ref();

        let source = |job| ResultSource::Workflow {
            workflow: "wf".into(),
            runtime: outcome.runtime.clone(),
            device: DeviceSelector::Global,
            job,
        };

        let all = get_results(storage, &source(JobSelector::All)).await.unwrap().unwrap();
        let names: Vec<&String> = all.as_object().unwrap().keys().collect();
        assert_eq!(names, vec!["A", "C"]);

        let failed = get_results(storage, &source(JobSelector::AllFailed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.as_object().unwrap().len(), 1);
        assert!(failed.get("A").is_some());

        let a_devices = get_results(
            storage,
            &ResultSource::Workflow {
                workflow: "wf".into(),
                runtime: outcome.runtime.clone(),
                device: DeviceSelector::AllFailed,
                job: JobSelector::Job("a".into()),
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(a_devices.as_object().unwrap().len(), 1);
        assert!(a_devices.get("r2").is_some());

        let jobs = get_job_list(storage, &outcome.runtime).await.unwrap();
        assert_eq!(jobs.len(), DEFAULT_JOB_CHOICES.len() + 2);
        assert_eq!(jobs[3], ("a".to_string(), "A".to_string()));

        let devices = get_device_list(storage, &outcome.runtime, Some(&"a".into()))
            .await
            .unwrap();
        assert_eq!(
            devices[DEFAULT_DEVICE_CHOICES.len()..].to_vec(),
            vec![
                ("r1".to_string(), "r1".to_string()),
                ("r2".to_string(), "r2".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_runtimes_and_comparison() {
        let harness = TestHarness::new().with_devices(["r1"]);
        harness.add_service("show", false);

        let first = harness
            .run("show", RunRequest::new().with_targets(["r1"]))
            .await
            .unwrap();
        let second = harness
            .run("show", RunRequest::new().with_targets(["r1"]))
            .await
            .unwrap();
        let storage = harness.storage().as_ref();

        let runtimes = get_runtimes(storage, &RuntimeScope::Job("show".into()))
            .await
            .unwrap();
        assert_eq!(runtimes, vec![first.runtime.clone(), second.runtime.clone()]);
        let by_device = get_runtimes(storage, &RuntimeScope::Device("r1".into()))
            .await
            .unwrap();
        assert_eq!(by_device, runtimes);

        let source = |runtime: &Runtime| ResultSource::Device {
            device: "r1".into(),
            runtime: runtime.clone(),
        };
        let comparison = compare_results(storage, &source(&first.runtime), &source(&second.runtime))
            .await
            .unwrap();
        assert!(comparison.opcodes.iter().all(|op| op.tag == Tag::Equal));

        let missing = compare_results(
            storage,
            &source(&first.runtime),
            &source(&Runtime::new("1999-01-01 00:00:00.000000")),
        )
        .await;
        assert!(matches!(missing, Err(ResultsError::NotFound(_))));
    }
}
