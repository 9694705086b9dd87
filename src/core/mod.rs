//! Core domain types: devices, pools, jobs, workflows, tasks and triggers.

pub mod catalog;
pub mod device;
pub mod job;
pub mod targets;
pub mod task;
pub mod trigger;
pub mod types;
pub mod workflow;
