//! Stage executor
//!
//! Drives a task document through its stages. Stages run one after the
//! other; the subtasks of a parallel stage run concurrently, bounded by
//! `max_parallel`. Once a stage fails, later stages are skipped except
//! `after_all` ones, which restore state and run whenever the task was not
//! cancelled. Every subtask is written back into its stage as it finishes.
//! An attached [`RunTracker`] hears when each run starts and finishes.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use drover_core::domain::stage::Stage;
use drover_core::domain::task::{RunTracker, Task};
use drover_core::{SubTask, TaskStatus};

use crate::docker_host::best_docker_host;
use crate::job::job_name;
use crate::plugin::{PluginContext, PluginRegistry, RunContext};

/// Runs the stages of task documents
pub struct StageExecutor {
    ctx: Arc<PluginContext>,
    registry: Arc<PluginRegistry>,
    semaphore: Arc<Semaphore>,
    tracker: Option<Arc<dyn RunTracker>>,
}

impl StageExecutor {
    pub fn new(ctx: Arc<PluginContext>, registry: PluginRegistry) -> Self {
        let semaphore = Arc::new(Semaphore::new(ctx.config.max_parallel.max(1)));
        Self {
            ctx,
            registry: Arc::new(registry),
            semaphore,
            tracker: None,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn RunTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    async fn pick_docker_host(&self) -> String {
        let hosts = &self.ctx.config.docker_hosts;
        if hosts.is_empty() {
            return String::new();
        }
        match best_docker_host(&self.ctx.http, hosts, Some(&self.ctx.config.namespace)).await {
            Ok(host) => {
                info!("Docker host {} selected", host);
                host
            }
            Err(e) => {
                warn!("Failed to select docker host: {}", e);
                String::new()
            }
        }
    }

    /// Executes every stage of `task` and returns its final status
    ///
    /// Subtask outcomes, stage contents and task times are recorded on
    /// `task` itself.
    pub async fn execute(&self, task: &mut Task, cancel: &CancellationToken) -> TaskStatus {
        let docker_host = self.pick_docker_host().await;
        let run = RunContext::from_task(task, docker_host);

        task.status = TaskStatus::Running;
        task.start_time = Some(self.ctx.clock.now());
        task.error.clear();
        info!("Task {}#{} started", task.pipeline_name, task.task_id);
        if let Some(tracker) = &self.tracker {
            tracker.run_started(&task.pipeline_name, task.task_id);
        }

        let mut failed: Option<TaskStatus> = None;
        for stage in &mut task.stages {
            if cancel.is_cancelled() {
                break;
            }
            if failed.is_some() && !stage.after_all {
                debug!("Skipping stage {} after failure", stage.kind);
                continue;
            }

            self.run_stage(stage, &run, cancel).await;

            let status = stage.status();
            info!("Stage {} finished: {}", stage.kind, status);
            if status.is_failed() && failed.is_none() {
                failed = Some(status);
            }
        }

        let status = if cancel.is_cancelled() {
            TaskStatus::Cancelled
        } else {
            failed.unwrap_or(TaskStatus::Passed)
        };
        if status.is_failed() {
            task.error = first_error(task);
        }
        task.status = status;
        task.end_time = Some(self.ctx.clock.now());
        info!("Task {}#{} finished: {}", task.pipeline_name, task.task_id, status);
        if let Some(tracker) = &self.tracker {
            tracker.run_finished(&task.pipeline_name, task.task_id);
        }
        status
    }

    async fn run_stage(&self, stage: &mut Stage, run: &RunContext, cancel: &CancellationToken) {
        let pending: Vec<(String, SubTask)> = stage
            .sub_tasks
            .iter()
            .filter(|(_, sub)| sub.is_enabled())
            .map(|(key, sub)| (key.clone(), sub.clone()))
            .collect();
        if pending.is_empty() {
            return;
        }
        debug!(
            "Running {} subtask(s) of stage {} (parallel: {})",
            pending.len(),
            stage.kind,
            stage.run_parallel
        );

        if !stage.run_parallel {
            for (key, sub) in pending {
                let done = run_sub_task(self.ctx.clone(), &self.registry, run, &key, sub, cancel).await;
                stage.sub_tasks.insert(key, done);
            }
            return;
        }

        let mut fallbacks = Vec::new();
        let mut handles = Vec::new();
        for (key, sub) in pending {
            let ctx = self.ctx.clone();
            let registry = self.registry.clone();
            let semaphore = self.semaphore.clone();
            let run = run.clone();
            let cancel = cancel.clone();
            fallbacks.push((key.clone(), sub.clone()));
            let handle = tokio::spawn(async move {
                // the semaphore is never closed
                let _permit = semaphore.acquire_owned().await.ok();
                run_sub_task(ctx, &registry, &run, &key, sub, &cancel).await
            });
            handles.push(handle);
        }

        let results = join_all(handles).await;
        for ((key, fallback), result) in fallbacks.into_iter().zip(results) {
            let done = match result {
                Ok(done) => done,
                Err(e) => {
                    error!("Subtask {} panicked: {}", key, e);
                    failed_sub_task(fallback, format!("subtask panicked: {}", e))
                }
            };
            stage.sub_tasks.insert(key, done);
        }
    }
}

fn failed_sub_task(mut sub: SubTask, message: String) -> SubTask {
    let common = sub.common_mut();
    common.status = TaskStatus::Failed;
    common.error = message;
    sub
}

/// Runs one subtask through its plugin lifecycle
async fn run_sub_task(
    ctx: Arc<PluginContext>,
    registry: &PluginRegistry,
    run: &RunContext,
    service_name: &str,
    sub: SubTask,
    cancel: &CancellationToken,
) -> SubTask {
    let mut plugin = match registry.create(ctx.clone(), sub.clone()) {
        Ok(plugin) => plugin,
        Err(e) => {
            warn!("Subtask {} cannot run: {}", service_name, e);
            return failed_sub_task(sub, e.to_string());
        }
    };

    let name = job_name(&run.pipeline_name, run.task_id, plugin.kind().as_str(), service_name);
    plugin.init(name.clone(), name);
    plugin.reset_error();
    plugin.set_start_time(ctx.clock.now());

    if cancel.is_cancelled() {
        plugin.set_status(TaskStatus::Cancelled);
    } else {
        plugin.run(run, service_name, cancel).await;
        if !plugin.is_task_done() {
            plugin.wait(run, cancel).await;
        }
        plugin.complete(run, service_name).await;
    }

    plugin.set_end_time(ctx.clock.now());
    debug!("Subtask {} {}: {}", plugin.kind(), service_name, plugin.status());
    plugin.task()
}

fn first_error(task: &Task) -> String {
    task.sub_tasks()
        .filter(|s| s.status().is_failed())
        .map(|s| s.common().error.clone())
        .find(|e| !e.is_empty())
        .unwrap_or_default()
}
