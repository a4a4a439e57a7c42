//! Task plugins
//!
//! Every subtask kind is executed by a plugin following the same lifecycle:
//! `run` starts the work, `wait` blocks until it is terminal, and `complete`
//! archives logs and releases what `run` created. Plugins never return
//! errors from these calls; failures land in the subtask's status and
//! `error` field, and sibling subtasks keep running.
//!
//! Plugins are created from a [`PluginRegistry`] mapping each kind to a
//! constructor.

mod build;
mod delivery;
mod deploy;
mod hooks;
mod job;
mod testing;

pub use build::BuildPlugin;
pub use delivery::{
    ArtifactPlugin, DistributePlugin, DockerBuildPlugin, ReleaseImagePlugin, SecurityPlugin,
};
pub use deploy::DeployPlugin;
pub use hooks::{JiraPlugin, WebhookPlugin};
pub use testing::TestingPlugin;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use drover_core::domain::label::JobLabel;
use drover_core::domain::payload::ConfigPayload;
use drover_core::domain::task::Task;
use drover_core::subtask::TaskCommon;
use drover_core::{SubTask, TaskKind, TaskStatus, TypedSubTask};
use drover_kube::KubeApi;

use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::error::{PluginError, Result};
use crate::helm::{HelmClient, RenderSetStore};
use crate::job::JobManager;
use crate::storage::ObjectStore;

/// Services shared by every plugin of a runtime
pub struct PluginContext {
    pub config: RuntimeConfig,
    pub jobs: JobManager,
    pub store: Arc<dyn ObjectStore>,
    pub helm: Arc<dyn HelmClient>,
    pub render_sets: Arc<dyn RenderSetStore>,
    pub clock: Arc<dyn Clock>,
    pub http: reqwest::Client,
}

impl PluginContext {
    pub fn kube(&self) -> &Arc<dyn KubeApi> {
        self.jobs.kube()
    }
}

/// Read-only facts about the task a subtask belongs to
#[derive(Debug, Clone)]
pub struct RunContext {
    pub pipeline_name: String,
    pub pipeline_type: String,
    pub task_id: i64,
    pub product_name: String,
    pub env_name: String,
    /// Namespace of the environment the task targets
    pub namespace: String,
    pub payload: Arc<ConfigPayload>,
    /// Docker daemon picked for this run, empty when none is configured
    pub docker_host: String,
}

impl RunContext {
    pub fn from_task(task: &Task, docker_host: impl Into<String>) -> Self {
        Self {
            pipeline_name: task.pipeline_name.clone(),
            pipeline_type: task.pipeline_type.clone(),
            task_id: task.task_id,
            product_name: task.product_name.clone(),
            env_name: task.env_name.clone(),
            namespace: task.namespace.clone(),
            payload: Arc::new(task.config_payload.clone()),
            docker_host: docker_host.into(),
        }
    }

    pub fn job_label(&self, kind: TaskKind, service_name: &str) -> JobLabel {
        JobLabel {
            pipeline_name: self.pipeline_name.clone(),
            task_id: self.task_id,
            task_type: kind.as_str().to_string(),
            service_name: service_name.to_string(),
            pipeline_type: self.pipeline_type.clone(),
        }
    }
}

#[async_trait]
pub trait TaskPlugin: Send {
    /// Names the job and the log file of this execution
    fn init(&mut self, job_name: String, file_name: String);

    fn kind(&self) -> TaskKind;

    /// Current state of the subtask document
    fn task(&self) -> SubTask;

    fn set_task(&mut self, task: SubTask) -> Result<()>;

    fn common(&self) -> &TaskCommon;

    fn common_mut(&mut self) -> &mut TaskCommon;

    /// Timeout in seconds when the subtask configures none
    fn default_timeout(&self) -> i64;

    /// Effective timeout of the subtask
    ///
    /// A configured value is in minutes and converted to seconds once;
    /// restarted subtasks already carry seconds.
    fn task_timeout(&mut self) -> Duration;

    async fn run(&mut self, run: &RunContext, service_name: &str, cancel: &CancellationToken);

    async fn wait(&mut self, run: &RunContext, cancel: &CancellationToken);

    async fn complete(&mut self, run: &RunContext, service_name: &str);

    fn status(&self) -> TaskStatus {
        self.common().status
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.common_mut().status = status;
    }

    fn is_task_done(&self) -> bool {
        self.status().is_done()
    }

    fn is_task_failed(&self) -> bool {
        self.status().is_failed()
    }

    fn set_start_time(&mut self, now: DateTime<Utc>) {
        self.common_mut().start_time = now.timestamp();
    }

    fn set_end_time(&mut self, now: DateTime<Utc>) {
        self.common_mut().end_time = now.timestamp();
    }

    fn is_task_enabled(&self) -> bool {
        self.common().enabled
    }

    fn reset_error(&mut self) {
        self.common_mut().error.clear();
    }

    /// Marks the subtask failed with `message`
    fn fail(&mut self, message: String) {
        let common = self.common_mut();
        common.status = TaskStatus::Failed;
        common.error = message;
    }
}

/// The typed subtask a plugin executes
#[derive(Debug, Clone)]
pub struct TaskSlot<T> {
    kind: TaskKind,
    pub task: T,
    timeout_converted: bool,
}

impl<T: TypedSubTask + Clone> TaskSlot<T> {
    pub fn new(sub: SubTask) -> Result<Self> {
        let kind = sub.kind();
        let task = T::into_typed(sub)
            .ok_or_else(|| PluginError::invalid_task(format!("unexpected subtask kind {}", kind)))?;
        Ok(Self {
            kind,
            task,
            timeout_converted: false,
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn replace(&mut self, sub: SubTask) -> Result<()> {
        if sub.kind() != self.kind {
            return Err(PluginError::invalid_task(format!(
                "expected {} subtask, got {}",
                self.kind,
                sub.kind()
            )));
        }
        *self = Self::new(sub)?;
        Ok(())
    }

    pub fn to_sub_task(&self) -> SubTask {
        self.task.clone().wrap(self.kind)
    }

    pub fn timeout(&mut self, default_secs: i64) -> Duration {
        let common = self.task.common_mut();
        if common.timeout == 0 {
            common.timeout = default_secs;
            self.timeout_converted = true;
        } else if !common.is_restart && !self.timeout_converted {
            common.timeout *= 60;
            self.timeout_converted = true;
        }
        Duration::from_secs(common.timeout.max(0) as u64)
    }
}

/// Implements the document accessors of [`TaskPlugin`] over a [`TaskSlot`] field
macro_rules! slot_accessors {
    ($slot:ident) => {
        fn kind(&self) -> drover_core::TaskKind {
            self.$slot.kind()
        }

        fn task(&self) -> drover_core::SubTask {
            self.$slot.to_sub_task()
        }

        fn set_task(&mut self, task: drover_core::SubTask) -> crate::error::Result<()> {
            self.$slot.replace(task)
        }

        fn common(&self) -> &drover_core::subtask::TaskCommon {
            drover_core::TypedSubTask::common(&self.$slot.task)
        }

        fn common_mut(&mut self) -> &mut drover_core::subtask::TaskCommon {
            drover_core::TypedSubTask::common_mut(&mut self.$slot.task)
        }

        fn task_timeout(&mut self) -> std::time::Duration {
            let default = self.default_timeout();
            self.$slot.timeout(default)
        }
    };
}
pub(crate) use slot_accessors;

pub type PluginConstructor = fn(Arc<PluginContext>, SubTask) -> Result<Box<dyn TaskPlugin>>;

/// Kind to plugin constructor table
#[derive(Clone, Default)]
pub struct PluginRegistry {
    constructors: HashMap<TaskKind, PluginConstructor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a plugin for every kind the runtime executes
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for kind in [TaskKind::Build, TaskKind::BuildV3, TaskKind::ArtifactDeploy] {
            registry.register(kind, BuildPlugin::boxed);
        }
        registry.register(TaskKind::Deploy, DeployPlugin::boxed);
        registry.register(TaskKind::ResetImage, DeployPlugin::boxed);
        registry.register(TaskKind::Testing, TestingPlugin::boxed);
        registry.register(TaskKind::DockerBuild, DockerBuildPlugin::boxed);
        registry.register(TaskKind::Artifact, ArtifactPlugin::boxed);
        registry.register(TaskKind::DistributeToS3, DistributePlugin::boxed);
        registry.register(TaskKind::ReleaseImage, ReleaseImagePlugin::boxed);
        registry.register(TaskKind::Security, SecurityPlugin::boxed);
        registry.register(TaskKind::Jira, JiraPlugin::boxed);
        registry.register(TaskKind::Trigger, WebhookPlugin::boxed);
        registry.register(TaskKind::Extension, WebhookPlugin::boxed);
        registry
    }

    pub fn register(&mut self, kind: TaskKind, constructor: PluginConstructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn supports(&self, kind: TaskKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    pub fn create(&self, ctx: Arc<PluginContext>, sub: SubTask) -> Result<Box<dyn TaskPlugin>> {
        let kind = sub.kind();
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or_else(|| PluginError::invalid_task(format!("no plugin registered for {}", kind)))?;
        constructor(ctx, sub)
    }
}
