//! Image and package delivery plugins
//!
//! Image builds, retags and scans run as jobs of the predator plugin image,
//! which reads a YAML action document instead of a reaper context. Packages
//! are copied between object stores by the runtime itself.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use drover_core::domain::payload::{ConfigPayload, RegistryNamespace};
use drover_core::domain::resource::DEFAULT_SPEC;
use drover_core::image::trim_url_scheme;
use drover_core::subtask::{
    ArtifactTask, DistributeToS3Task, DockerBuildTask, ReleaseImageTask, SecurityTask,
};
use drover_core::{SubTask, TaskStatus, TypedSubTask};

use super::job::{JobRequest, RunningJob, predator_image, start_job, storage_subfolder};
use super::{PluginContext, RunContext, TaskPlugin, TaskSlot, slot_accessors};
use crate::error::{PluginError, Result};
use crate::job::log::package_key;
use crate::storage::{HttpObjectStore, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryAuth {
    pub host: String,
    pub user_name: String,
    pub password: String,
}

impl From<&RegistryNamespace> for RegistryAuth {
    fn from(reg: &RegistryNamespace) -> Self {
        Self {
            host: trim_url_scheme(&reg.reg_addr),
            user_name: reg.access_key.clone(),
            password: reg.secret_key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseTarget {
    pub image: String,
    pub registry: Option<RegistryAuth>,
}

/// Action document handed to the predator plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PredatorJob {
    BuildImage {
        work_dir: String,
        docker_file: String,
        build_args: String,
        image: String,
        registry: Option<RegistryAuth>,
    },
    ReleaseImage {
        source: String,
        source_registry: Option<RegistryAuth>,
        targets: Vec<ReleaseTarget>,
    },
    ScanImage {
        image: String,
        image_id: String,
    },
}

/// A subtask carried out by the predator plugin
pub trait PredatorTask: TypedSubTask + Clone + Send + Sync + 'static {
    /// Default timeout in seconds
    const TIMEOUT: i64;

    fn predator_job(&self, payload: &ConfigPayload) -> Result<PredatorJob>;
}

impl PredatorTask for DockerBuildTask {
    const TIMEOUT: i64 = 60 * 60;

    fn predator_job(&self, payload: &ConfigPayload) -> Result<PredatorJob> {
        if self.image.is_empty() {
            return Err(PluginError::invalid_task("docker build image is empty"));
        }
        Ok(PredatorJob::BuildImage {
            work_dir: self.work_dir.clone(),
            docker_file: self.docker_file.clone(),
            build_args: self.build_args.clone(),
            image: self.image.clone(),
            registry: payload.registry_or_default(&self.registry_id).map(RegistryAuth::from),
        })
    }
}

impl PredatorTask for ReleaseImageTask {
    const TIMEOUT: i64 = 10 * 60;

    fn predator_job(&self, payload: &ConfigPayload) -> Result<PredatorJob> {
        if self.releases.is_empty() {
            return Err(PluginError::invalid_task("no release registry"));
        }
        let targets = self
            .releases
            .iter()
            .map(|release| ReleaseTarget {
                image: release.name.clone(),
                registry: payload.registry(&release.repo_id).map(RegistryAuth::from),
            })
            .collect();
        Ok(PredatorJob::ReleaseImage {
            source: self.image_test.clone(),
            source_registry: payload
                .registry_or_default(&payload.registry_id)
                .map(RegistryAuth::from),
            targets,
        })
    }
}

impl PredatorTask for SecurityTask {
    const TIMEOUT: i64 = 10 * 60;

    fn predator_job(&self, _payload: &ConfigPayload) -> Result<PredatorJob> {
        if self.image_name.is_empty() {
            return Err(PluginError::invalid_task("image to scan is empty"));
        }
        Ok(PredatorJob::ScanImage {
            image: self.image_name.clone(),
            image_id: self.image_id.clone(),
        })
    }
}

/// Runs a [`PredatorTask`] as a job
pub struct PredatorPlugin<T> {
    ctx: Arc<PluginContext>,
    slot: TaskSlot<T>,
    job_name: String,
    file_name: String,
    job: Option<RunningJob>,
    _task: PhantomData<fn() -> T>,
}

pub type DockerBuildPlugin = PredatorPlugin<DockerBuildTask>;
pub type ReleaseImagePlugin = PredatorPlugin<ReleaseImageTask>;
pub type SecurityPlugin = PredatorPlugin<SecurityTask>;

impl<T: PredatorTask> PredatorPlugin<T> {
    pub fn new(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Self> {
        Ok(Self {
            ctx,
            slot: TaskSlot::new(sub)?,
            job_name: String::new(),
            file_name: String::new(),
            job: None,
            _task: PhantomData,
        })
    }

    pub fn boxed(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Box<dyn TaskPlugin>> {
        Ok(Box::new(Self::new(ctx, sub)?))
    }

    async fn start(&self, run: &RunContext, service_name: &str) -> Result<RunningJob> {
        let action = self.slot.task.predator_job(&run.payload)?;
        let request = JobRequest {
            job_name: self.job_name.clone(),
            label: Some(run.job_label(self.slot.kind(), service_name)),
            image: predator_image(&self.ctx, run),
            resources: DEFAULT_SPEC,
            registries: run.payload.registries.clone(),
            job_config: serde_yaml::to_string(&action)?,
            ..Default::default()
        };
        start_job(&self.ctx, run, request).await
    }
}

#[async_trait]
impl<T: PredatorTask> TaskPlugin for PredatorPlugin<T> {
    slot_accessors!(slot);

    fn init(&mut self, job_name: String, file_name: String) {
        self.job_name = job_name;
        self.file_name = file_name;
    }

    fn default_timeout(&self) -> i64 {
        T::TIMEOUT
    }

    async fn run(&mut self, run: &RunContext, service_name: &str, cancel: &CancellationToken) {
        let job = match self.start(run, service_name).await {
            Ok(job) => job,
            Err(e) => {
                let message = format!("create {} job error: {}", self.kind(), e);
                error!("{}", message);
                self.fail(message);
                return;
            }
        };
        info!("{} job {} created", self.kind(), job.job_name);

        let status = self
            .ctx
            .jobs
            .wait_ready(&job.namespace, &job.job_name, cancel)
            .await;
        self.job = Some(job);
        self.set_status(status);
    }

    async fn wait(&mut self, _run: &RunContext, cancel: &CancellationToken) {
        let Some(job) = self.job.clone() else {
            return;
        };
        let timeout = self.task_timeout();
        let status = job.wait(&self.ctx, timeout, false, cancel).await;
        self.set_status(status);
    }

    async fn complete(&mut self, run: &RunContext, _service_name: &str) {
        let Some(job) = self.job.take() else {
            return;
        };
        let (_, errors) = job.finish(&self.ctx, run, self.status(), &self.file_name).await;
        if !errors.is_empty() {
            self.common_mut().error = errors.join("; ");
        }
    }
}

/// Records an image that already exists as the output of its target
pub struct ArtifactPlugin {
    slot: TaskSlot<ArtifactTask>,
}

impl ArtifactPlugin {
    pub fn new(sub: SubTask) -> Result<Self> {
        Ok(Self {
            slot: TaskSlot::new(sub)?,
        })
    }

    pub fn boxed(_ctx: Arc<PluginContext>, sub: SubTask) -> Result<Box<dyn TaskPlugin>> {
        Ok(Box::new(Self::new(sub)?))
    }
}

#[async_trait]
impl TaskPlugin for ArtifactPlugin {
    slot_accessors!(slot);

    fn init(&mut self, _job_name: String, _file_name: String) {}

    fn default_timeout(&self) -> i64 {
        10 * 60
    }

    async fn run(&mut self, _run: &RunContext, _service_name: &str, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            self.set_status(TaskStatus::Cancelled);
            return;
        }
        if self.slot.task.image.is_empty() {
            self.fail("artifact image is empty".to_string());
            return;
        }
        self.set_status(TaskStatus::Passed);
    }

    async fn wait(&mut self, _run: &RunContext, _cancel: &CancellationToken) {}

    async fn complete(&mut self, _run: &RunContext, _service_name: &str) {}
}

/// Copies a build package to the destination storage of the subtask
///
/// The package is read from the run's storage, where the build archived it,
/// and written to `{product}/{service}/{file}` under the destination URL.
pub struct DistributePlugin {
    ctx: Arc<PluginContext>,
    slot: TaskSlot<DistributeToS3Task>,
}

impl DistributePlugin {
    pub fn new(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Self> {
        Ok(Self {
            ctx,
            slot: TaskSlot::new(sub)?,
        })
    }

    pub fn boxed(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Box<dyn TaskPlugin>> {
        Ok(Box::new(Self::new(ctx, sub)?))
    }

    async fn distribute(&self, run: &RunContext) -> Result<String> {
        let task = &self.slot.task;
        if task.package_file.is_empty() || task.dest_storage_url.is_empty() {
            return Err(PluginError::invalid_task(
                "package file and destination are required",
            ));
        }

        let source = package_key(
            &storage_subfolder(&self.ctx, run),
            &run.pipeline_name,
            run.task_id,
            &task.package_file,
        );
        let body = self
            .ctx
            .store
            .get(&source)
            .await
            .map_err(PluginError::Storage)?
            .ok_or_else(|| PluginError::invalid_task(format!("package {} not found", source)))?;

        let dest = format!("{}/{}/{}", task.product_name, task.service_name, task.package_file);
        HttpObjectStore::from_url(&task.dest_storage_url)
            .put(&dest, body)
            .await
            .map_err(PluginError::Storage)?;
        Ok(dest)
    }
}

#[async_trait]
impl TaskPlugin for DistributePlugin {
    slot_accessors!(slot);

    fn init(&mut self, _job_name: String, _file_name: String) {}

    fn default_timeout(&self) -> i64 {
        10 * 60
    }

    async fn run(&mut self, run: &RunContext, _service_name: &str, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            self.set_status(TaskStatus::Cancelled);
            return;
        }
        self.set_status(TaskStatus::Running);
        let timeout = self.task_timeout();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(timeout, self.distribute(run)) => Some(res),
        };
        match outcome {
            None => self.set_status(TaskStatus::Cancelled),
            Some(Err(_)) => self.set_status(TaskStatus::Timeout),
            Some(Ok(Ok(dest))) => {
                info!("Package distributed to {}", dest);
                self.set_status(TaskStatus::Passed);
            }
            Some(Ok(Err(e))) => self.fail(format!("distribute package error: {}", e)),
        }
    }

    async fn wait(&mut self, _run: &RunContext, _cancel: &CancellationToken) {}

    async fn complete(&mut self, _run: &RunContext, _service_name: &str) {}
}
