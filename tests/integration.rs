//! Integration tests for netrun.
//!
//! These tests verify end-to-end scenarios including:
//! - The platform's core guarantees, from trigger spacing to restart reuse
//! - Scheduled tasks firing into the run engine
//! - Recovery from interruptions
//! - YAML inventory to executed workflow
//! - Result queries and comparison
//! - Graceful shutdown behavior

mod common;

mod integration {
    pub mod pipeline;
    pub mod properties;
    pub mod recovery;
    pub mod results;
    pub mod scheduling;
    pub mod shutdown;
}
