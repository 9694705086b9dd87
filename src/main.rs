//! netrun - job scheduling and workflow execution for network automation.
//!
//! Usage:
//!   netrun run <inventory-dir>                Run the scheduler
//!   netrun validate <inventory-dir>           Validate the inventory without running
//!   netrun list <inventory-dir>               List devices, pools, jobs and tasks
//!   netrun trigger <inventory-dir> <job-id>   Run one job now and print its result
//!   netrun diff <first> <second>              Compare two result payloads

use clap::{Parser, Subcommand};
use netrun::automation::{to_json, Automation, AutomationError};
use netrun::config::{load_inventory_from_directory, GlobalConfig, Platform, YamlLoader};
use netrun::execution::RunRequest;
use netrun::results::{self, Tag};
use netrun::{Event, EventBus, EventHandler, JobId, JobStatus};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// netrun - job scheduling and workflow execution for network automation
#[derive(Parser)]
#[command(name = "netrun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Global configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler with the inventory from a directory
    Run {
        /// Directory containing inventory YAML files
        #[arg(value_name = "INVENTORY_DIR")]
        inventory_dir: PathBuf,
    },

    /// Validate the inventory without running
    Validate {
        #[arg(value_name = "INVENTORY_DIR")]
        inventory_dir: PathBuf,
    },

    /// List devices, pools, jobs and tasks
    List {
        #[arg(value_name = "INVENTORY_DIR")]
        inventory_dir: PathBuf,
    },

    /// Run a job once and print its result
    Trigger {
        #[arg(value_name = "INVENTORY_DIR")]
        inventory_dir: PathBuf,

        /// Job ID to run
        #[arg(value_name = "JOB_ID")]
        job_id: String,

        /// Run against these devices instead of the job's targets
        #[arg(short, long = "device", value_name = "DEVICE_ID")]
        devices: Vec<String>,
    },

    /// Compare two result payloads (JSON or YAML files)
    Diff {
        first: PathBuf,
        second: PathBuf,
    },
}

/// Logs lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::JobStarted {
                job_id,
                runtime,
                parent_runtime,
                ..
            } => match parent_runtime {
                Some(parent) => info!("  Job '{}' started (run: {}, parent: {})", job_id, runtime, parent),
                None => info!("Job '{}' started (run: {})", job_id, runtime),
            },
            Event::JobCompleted {
                job_id,
                runtime,
                success,
                duration,
                ..
            } => {
                if *success {
                    info!(
                        "Job '{}' completed successfully in {:?} (run: {})",
                        job_id, duration, runtime
                    );
                } else {
                    error!("Job '{}' failed after {:?} (run: {})", job_id, duration, runtime);
                }
            }
            Event::DeviceCompleted {
                job_id,
                device_id,
                success,
                ..
            } => {
                if *success {
                    info!("  '{}' passed on {}", job_id, device_id);
                } else {
                    warn!("  '{}' failed on {}", job_id, device_id);
                }
            }
            Event::TaskFired { task_id, .. } => {
                info!("Task '{}' fired", task_id);
            }
            Event::TaskMisfired {
                task_id, late_by, ..
            } => {
                warn!("Task '{}' missed its fire by {:?}", task_id, late_by);
            }
            Event::TaskSkipped {
                task_id, running, ..
            } => {
                warn!("Task '{}' skipped: {} instance(s) still running", task_id, running);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { inventory_dir } => {
            let global = load_global(cli.config.as_deref())?;
            run_scheduler(&global, inventory_dir).await?;
        }
        Commands::Validate { inventory_dir } => {
            if let Some(path) = cli.config.as_deref() {
                YamlLoader::load_global_config(path)?;
            }
            validate_inventory(inventory_dir)?;
        }
        Commands::List { inventory_dir } => {
            list_inventory(inventory_dir)?;
        }
        Commands::Trigger {
            inventory_dir,
            job_id,
            devices,
        } => {
            let global = load_global(cli.config.as_deref())?;
            trigger_job(&global, inventory_dir, job_id, devices).await?;
        }
        Commands::Diff { first, second } => {
            diff_files(&first, &second)?;
        }
    }

    Ok(())
}

fn load_global(path: Option<&Path>) -> Result<GlobalConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(YamlLoader::load_global_config(path)?)
        }
        None => Ok(GlobalConfig::default()),
    }
}

/// Run the scheduler until Ctrl+C.
async fn run_scheduler(
    global: &GlobalConfig,
    inventory_dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading inventory from: {}", inventory_dir.display());
    let inventory = load_inventory_from_directory(&inventory_dir)?;
    if inventory.is_empty() {
        warn!("No inventory files found in {}", inventory_dir.display());
        return Ok(());
    }

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let platform = Platform::build(global, &inventory, event_bus).await?;
    let active = platform.tasks.iter().filter(|t| t.is_active).count();
    info!(
        "Loaded {} device(s), {} job(s), {} task(s) ({} active)",
        inventory.devices.len(),
        inventory.services.len() + inventory.workflows.len(),
        platform.tasks.len(),
        active
    );

    info!(
        "Starting scheduler (tick interval: {:?})...",
        global.scheduler.tick_interval()
    );
    info!("Press Ctrl+C to stop");

    let (automation, scheduler_task) = Automation::start(platform.scheduler).await?;
    for info in automation.scheduler().list().await? {
        match info.next_run_time {
            Some(next) if !info.paused => info!("  - task '{}' next fires at {}", info.task_id, next),
            _ => info!("  - task '{}' paused", info.task_id),
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            automation.scheduler().shutdown().await?;
        }
        _ = scheduler_task => {
            info!("Scheduler stopped");
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Validate the inventory without running.
fn validate_inventory(inventory_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating inventory in: {}", inventory_dir.display());

    match load_inventory_from_directory(&inventory_dir) {
        Ok(inventory) => {
            info!(
                "Inventory is valid: {} device(s), {} pool(s), {} service(s), {} workflow(s), {} task(s)",
                inventory.devices.len(),
                inventory.pools.len(),
                inventory.services.len(),
                inventory.workflows.len(),
                inventory.tasks.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List the inventory.
fn list_inventory(inventory_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let inventory = load_inventory_from_directory(&inventory_dir)?;

    if inventory.is_empty() {
        println!("No inventory found in {}", inventory_dir.display());
        return Ok(());
    }

    println!("Inventory in {}:", inventory_dir.display());
    println!();

    if !inventory.devices.is_empty() {
        println!("Devices:");
        for device in &inventory.devices {
            println!("  - {} ({})", device.id, device.ip_address);
        }
        println!();
    }

    if !inventory.pools.is_empty() {
        println!("Pools:");
        for pool in &inventory.pools {
            println!("  - {} ({} criteria)", pool.id, pool.criteria.len());
        }
        println!();
    }

    for service in &inventory.services {
        println!("Service: {}", service.id);
        println!("  Name: {}", service.name);
        println!("  Driver: {}", service.driver);
        if service.deviceless {
            println!("  Targets: none (deviceless)");
        } else {
            println!(
                "  Targets: devices [{}], pools [{}]",
                service.devices.join(", "),
                service.pools.join(", ")
            );
        }
        println!();
    }

    for workflow in &inventory.workflows {
        println!("Workflow: {}", workflow.id);
        println!("  Name: {}", workflow.name);
        println!("  Jobs: {}", workflow.jobs.join(", "));
        for edge in &workflow.edges {
            println!(
                "    {} -> {} ({})",
                edge.source,
                edge.destination,
                edge.subtype.as_str()
            );
        }
        println!();
    }

    if !inventory.tasks.is_empty() {
        println!("Tasks:");
        for task in &inventory.tasks {
            let schedule = match &task.trigger.crontab_expression {
                Some(cron) => format!("cron '{}'", cron),
                None if task.trigger.frequency > 0 => format!(
                    "every {} {:?}",
                    task.trigger.frequency, task.trigger.frequency_unit
                ),
                None => "once".to_string(),
            };
            let state = if task.active { "" } else { " (paused)" };
            println!("  - {} runs '{}' {}{}", task.id, task.job, schedule, state);
        }
    }

    Ok(())
}

/// Run one job and print its result.
async fn trigger_job(
    global: &GlobalConfig,
    inventory_dir: PathBuf,
    job_id: String,
    devices: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading inventory from: {}", inventory_dir.display());
    let inventory = load_inventory_from_directory(&inventory_dir)?;

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;
    let platform = Platform::build(global, &inventory, event_bus).await?;

    let job_id = JobId::new(job_id);
    let mut request = RunRequest::new();
    if !devices.is_empty() {
        request = request.with_targets(devices);
    }

    let job = platform.catalog.job(&job_id)?;
    info!("Running {}", job.summary(JobStatus::Idle));
    let result = platform
        .engine
        .execute(&job_id, request)
        .await
        .map_err(AutomationError::from);

    if let Ok(outcome) = &result {
        for line in platform.engine.logs().lines(&outcome.runtime) {
            println!("{}", line);
        }
    }
    let failed = !matches!(&result, Ok(outcome) if outcome.success);
    println!("{}", serde_json::to_string_pretty(&to_json(result))?);

    if failed {
        return Err(format!("job '{}' did not succeed", job_id).into());
    }
    Ok(())
}

/// Print a line diff of two payload files.
fn diff_files(first: &Path, second: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let comparison = results::diff(&read_payload(first)?, &read_payload(second)?);

    println!("--- {}", first.display());
    println!("+++ {}", second.display());
    for opcode in &comparison.opcodes {
        let removed = &comparison.first[opcode.a_start..opcode.a_end];
        let added = &comparison.second[opcode.b_start..opcode.b_end];
        match opcode.tag {
            Tag::Equal => removed.iter().for_each(|line| println!("  {}", line)),
            Tag::Delete => removed.iter().for_each(|line| println!("- {}", line)),
            Tag::Insert => added.iter().for_each(|line| println!("+ {}", line)),
            Tag::Replace => {
                removed.iter().for_each(|line| println!("- {}", line));
                added.iter().for_each(|line| println!("+ {}", line));
            }
        }
    }
    Ok(())
}

/// Payloads are JSON, or YAML when they do not parse as JSON.
fn read_payload(path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(_) => Ok(serde_yaml::from_str(&content)?),
    }
}
