//! Drover Runtime
//!
//! Executes the stages of a task document against a Kubernetes cluster.
//!
//! Architecture:
//! - Plugins: one per subtask kind, driven through `run`, `wait` and `complete`
//! - Jobs: executor Job launch, completion polling and log archiving
//! - Helm: image-path resolution, render sets and chart upgrades
//! - Executor: stage ordering, parallelism and cancellation
//!
//! Cluster, storage, helm and time access all sit behind traits so the
//! lifecycle can be exercised against in-memory fakes.

pub mod clock;
pub mod config;
pub mod docker_host;
pub mod error;
pub mod executor;
pub mod helm;
pub mod job;
pub mod plugin;
pub mod reaper;
pub mod storage;

pub use clock::{Clock, SystemClock};
pub use config::RuntimeConfig;
pub use error::{PluginError, Result};
pub use executor::StageExecutor;
pub use plugin::{PluginContext, PluginRegistry, RunContext, TaskPlugin};
