//! Drover Graph
//!
//! Builds the task graph of a workflow run: compiles build, deploy and test
//! definitions into subtasks, hydrates them with run-level values and merges
//! them into ordered stages.
//!
//! This crate contains:
//! - Catalog: the read models task creation depends on
//! - Compiler: build module and test module compilation
//! - Hydration: candidate images, registries and permission checks
//! - Stages: merging and ordering subtasks
//! - Workflow: the `create_workflow_task` entry point

pub mod catalog;
pub mod compiler;
pub mod error;
pub mod hydrate;
pub mod order;
pub mod scheduler;
pub mod stage;
pub mod workflow;

pub use catalog::{Catalog, InMemoryCatalog};
pub use error::{BuildError, Result};
pub use scheduler::SchedulerContext;
pub use workflow::{CreatedTask, GraphBuilder, WorkflowTaskArgs};
