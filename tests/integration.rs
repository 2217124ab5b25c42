//! Integration tests for taskgraph.
//!
//! These tests verify end-to-end scenarios including:
//! - Loading a workspace from YAML and running targets
//! - Skipping rules whose inputs are unchanged
//! - Background processes and cancellation

mod common;

mod integration {
    pub mod checksum;
    pub mod shutdown;
    pub mod workflow;
}
