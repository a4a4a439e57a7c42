//! Stages
//!
//! A stage groups every subtask of one kind in a task run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::kind::TaskKind;
use crate::domain::status::TaskStatus;
use crate::subtask::SubTask;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Subtasks of the stage may run concurrently
    pub run_parallel: bool,
    /// The stage starts only once every earlier stage is terminal
    #[serde(default)]
    pub after_all: bool,
    /// Subtasks keyed by `module_service`, suffixed on collision
    pub sub_tasks: BTreeMap<String, SubTask>,
    /// Number of subtasks ever added per base key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_counters: BTreeMap<String, usize>,
}

impl Stage {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            run_parallel: true,
            after_all: kind == TaskKind::ResetImage,
            sub_tasks: BTreeMap::new(),
            key_counters: BTreeMap::new(),
        }
    }

    /// Aggregate status: the first failing subtask wins, then running ones
    pub fn status(&self) -> TaskStatus {
        let enabled = self.sub_tasks.values().filter(|s| s.is_enabled());
        let mut status = TaskStatus::Passed;
        for sub in enabled {
            match sub.status() {
                s if s.is_failed() => return s,
                TaskStatus::Running | TaskStatus::Created => status = TaskStatus::Running,
                _ => {}
            }
        }
        status
    }
}
