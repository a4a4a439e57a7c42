//! Least-busy namespace selection
//!
//! A workflow triggered for several environments at once runs in whichever
//! of them has the fewest queued runs of the same product.

use std::collections::HashMap;
use std::sync::Mutex;

use drover_core::domain::task::RunTracker;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// State of a run waiting in, or executing from, the task queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Queued,
    Blocked,
    Running,
    Done,
}

impl QueueState {
    fn is_busy(self) -> bool {
        matches!(self, QueueState::Queued | QueueState::Blocked | QueueState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub pipeline_name: String,
    pub task_id: i64,
    pub product_name: String,
    pub namespace: String,
    pub state: QueueState,
}

/// Queue snapshot shared by concurrent task creation calls
#[derive(Debug, Default)]
pub struct SchedulerContext {
    queue: Mutex<Vec<QueueEntry>>,
}

impl SchedulerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a run in the queue, replacing an earlier entry of the same run
    pub fn enqueue(&self, entry: QueueEntry) {
        let Ok(mut queue) = self.queue.lock() else {
            warn!("Scheduler queue lock poisoned, dropping entry");
            return;
        };
        queue.retain(|e| !(e.pipeline_name == entry.pipeline_name && e.task_id == entry.task_id));
        if entry.state != QueueState::Done {
            queue.push(entry);
        }
    }

    /// Updates the state of a queued run; finished runs leave the queue
    pub fn set_state(&self, pipeline_name: &str, task_id: i64, state: QueueState) {
        let Ok(mut queue) = self.queue.lock() else {
            warn!("Scheduler queue lock poisoned, dropping state of {}#{}", pipeline_name, task_id);
            return;
        };
        let is_run = |e: &QueueEntry| e.pipeline_name == pipeline_name && e.task_id == task_id;
        if state == QueueState::Done {
            queue.retain(|e| !is_run(e));
        } else {
            queue
                .iter_mut()
                .filter(|e| is_run(&**e))
                .for_each(|e| e.state = state);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Picks the namespace with the fewest busy runs of `product`
    ///
    /// The first namespace without any busy run wins outright; otherwise the
    /// first namespace with the smallest count. With an empty queue, or a
    /// queue that cannot be read, the first namespace is returned.
    pub fn pick_least_busy(&self, product: &str, namespaces: &[String]) -> Option<String> {
        let first = namespaces.first()?.clone();
        let Ok(queue) = self.queue.lock() else {
            warn!("Scheduler queue lock poisoned, using {}", first);
            return Some(first);
        };

        let mut busy: HashMap<&str, usize> = HashMap::new();
        for entry in queue.iter() {
            if entry.state.is_busy() && entry.product_name == product {
                *busy.entry(entry.namespace.as_str()).or_default() += 1;
            }
        }

        let picked = namespaces
            .iter()
            .min_by_key(|ns| busy.get(ns.as_str()).copied().unwrap_or(0))
            .cloned()
            .unwrap_or(first);
        debug!("Picked namespace {} for product {}", picked, product);
        Some(picked)
    }
}

impl RunTracker for SchedulerContext {
    fn run_started(&self, pipeline_name: &str, task_id: i64) {
        self.set_state(pipeline_name, task_id, QueueState::Running);
    }

    fn run_finished(&self, pipeline_name: &str, task_id: i64) {
        self.set_state(pipeline_name, task_id, QueueState::Done);
    }
}
