//! Core data types: identifiers, environments, promises and the task graph.

pub mod environment;
pub mod future;
pub mod task_graph;
pub mod types;
