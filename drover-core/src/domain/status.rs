//! Task execution status

use serde::{Deserialize, Serialize};

/// Status of a subtask or of a whole task run
///
/// Progresses monotonically from `Created` to one of the terminal states.
/// Cancellation may be applied from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Created,
    Running,
    Passed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    /// Whether the status can no longer change
    pub fn is_done(self) -> bool {
        !matches!(self, TaskStatus::Created | TaskStatus::Running)
    }

    /// Whether the status is a terminal, unsuccessful one
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Created => write!(f, "created"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Passed => write!(f, "passed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Timeout => write!(f, "timeout"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
