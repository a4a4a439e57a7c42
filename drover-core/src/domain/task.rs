//! Task documents
//!
//! A task is one run of a workflow: its stages plus the configuration
//! snapshot every subtask executes against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::kind::TaskKind;
use crate::domain::payload::ConfigPayload;
use crate::domain::stage::Stage;
use crate::domain::status::TaskStatus;
use crate::subtask::SubTask;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub pipeline_name: String,
    /// `workflow` for tasks created from a workflow
    #[serde(default)]
    pub pipeline_type: String,
    pub product_name: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(default)]
    pub namespace: String,
    pub task_creator: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub config_payload: ConfigPayload,
    #[serde(default)]
    pub is_restart: bool,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Task {
    pub fn stage(&self, kind: TaskKind) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// All subtasks in stage order
    pub fn sub_tasks(&self) -> impl Iterator<Item = &SubTask> {
        self.stages.iter().flat_map(|s| s.sub_tasks.values())
    }
}

/// Receives run state changes from whatever executes tasks
///
/// Namespace selection counts the runs a tracker still sees as busy, so an
/// executor reports every run it starts and every run it finishes.
pub trait RunTracker: Send + Sync {
    fn run_started(&self, pipeline_name: &str, task_id: i64);

    fn run_finished(&self, pipeline_name: &str, task_id: i64);
}
