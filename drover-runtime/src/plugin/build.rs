//! Build plugin: compiles a service inside an executor job
//!
//! Serves the `buildv2`, `buildv3` and `artifact_deploy` kinds, which only
//! differ in their default timeout.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::{Captures, Regex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use drover_core::domain::cache::CacheDirType;
use drover_core::subtask::{
    BuildTask, CacheSettings, DockerBuildStatus, JobCtx, KeyVal, upsert_env,
};
use drover_core::{SubTask, TaskKind, TaskStatus};

use super::job::{JobRequest, RunningJob, reaper_image, start_job};
use super::{PluginContext, RunContext, TaskPlugin, TaskSlot, slot_accessors};
use crate::error::Result;
use crate::job::spec::{CacheMount, job_image};
use crate::reaper::ReaperContextBuilder;

const BUILD_TIMEOUT: i64 = 60 * 60 * 3;
const BUILD_V3_TIMEOUT: i64 = 60 * 60;
const ARTIFACT_DEPLOY_TIMEOUT: i64 = 60 * 60;

pub(crate) const WORKSPACE: &str = "/workspace";

static ENV_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(?:\{(\w+)\}|(\w+))").expect("valid regex"));

/// Expands `$KEY` and `${KEY}` with the values of `envs`; unknown keys expand to nothing
pub fn render_env(text: &str, envs: &[KeyVal]) -> String {
    ENV_REFERENCE
        .replace_all(text, |caps: &Captures| {
            let key = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
            envs.iter()
                .find(|e| Some(e.key.as_str()) == key)
                .map(|e| e.value.clone())
                .unwrap_or_default()
        })
        .into_owned()
}

/// Variables every executor job sees besides the user-defined ones
pub(crate) fn job_envs(job_ctx: &JobCtx, run: &RunContext) -> Vec<KeyVal> {
    let mut envs = vec![
        KeyVal::new("ENV_NAME", &run.env_name),
        KeyVal::new("TASK_ID", run.task_id.to_string()),
    ];

    let agents: BTreeSet<&str> = run
        .payload
        .private_keys
        .iter()
        .map(|k| k.name.as_str())
        .collect();
    envs.push(KeyVal::new(
        "AGENTS",
        agents.into_iter().collect::<Vec<_>>().join(","),
    ));

    if let Some(archive) = &job_ctx.file_archive_ctx {
        envs.push(KeyVal::new(
            "ARTIFACT",
            format!("{}/{}/{}", WORKSPACE, archive.file_location, archive.file_name),
        ));
    }

    for repo in &job_ctx.builds {
        let prefix = repo.env_prefix();
        if !repo.branch.is_empty() {
            envs.push(KeyVal::new(format!("{}_BRANCH", prefix), &repo.branch));
        }
        if !repo.tag.is_empty() {
            envs.push(KeyVal::new(format!("{}_TAG", prefix), &repo.tag));
        }
        if repo.pr > 0 {
            envs.push(KeyVal::new(format!("{}_PR", prefix), repo.pr.to_string()));
        }
        if !repo.commit_id.is_empty() {
            envs.push(KeyVal::new(format!("{}_COMMIT_ID", prefix), &repo.commit_id));
        }
    }
    envs
}

pub(crate) fn build_envs(task: &BuildTask, run: &RunContext) -> Vec<KeyVal> {
    let mut envs = job_envs(&task.job_ctx, run);
    for (env_name, hosts) in &task.env_host_names {
        envs.push(KeyVal::new(format!("{}_HOST_IPs", env_name), hosts.join(",")));
    }
    envs
}

/// Cache settings in effect for a job, with the NFS volume to mount
///
/// A reset request disables the cache for this run. User-defined NFS
/// directories may reference job variables.
pub(crate) fn effective_cache(
    settings: &CacheSettings,
    reset_cache: bool,
    envs: &[KeyVal],
) -> (CacheSettings, Option<CacheMount>) {
    let mut cache = settings.clone();
    if !cache.cache_enable || reset_cache || !cache.cache.is_nfs() {
        return (cache, None);
    }
    if cache.cache_dir_type == CacheDirType::UserDefined {
        cache.cache_user_dir = render_env(&cache.cache_user_dir, envs);
    }
    let mount = CacheMount::new(
        &cache.cache.nfs_properties.pvc,
        cache.cache_dir_type,
        &cache.cache_user_dir,
    );
    (cache, Some(mount))
}

pub struct BuildPlugin {
    ctx: Arc<PluginContext>,
    slot: TaskSlot<BuildTask>,
    job_name: String,
    file_name: String,
    job: Option<RunningJob>,
}

impl BuildPlugin {
    pub fn new(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Self> {
        Ok(Self {
            ctx,
            slot: TaskSlot::new(sub)?,
            job_name: String::new(),
            file_name: String::new(),
            job: None,
        })
    }

    pub fn boxed(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Box<dyn TaskPlugin>> {
        Ok(Box::new(Self::new(ctx, sub)?))
    }

    fn set_build_failed(&mut self, message: String) {
        error!("{}", message);
        if let Some(status) = self.slot.task.docker_build_status.as_mut() {
            status.status = TaskStatus::Failed;
        }
        self.fail(message);
    }

    async fn start(&mut self, run: &RunContext, service_name: &str) -> Result<RunningJob> {
        let payload = run.payload.clone();
        let kind = self.slot.kind();
        let image_base = reaper_image(&self.ctx, run);
        let task = &mut self.slot.task;

        for env in build_envs(task, run) {
            upsert_env(&mut task.job_ctx.env_vars, env);
        }

        let (cache, cache_mount) =
            effective_cache(&task.cache, payload.reset_cache, &task.job_ctx.env_vars);

        let registry = payload.registry_or_default(&payload.registry_id);
        let job_config = ReaperContextBuilder {
            payload: &payload,
            pipeline_name: &run.pipeline_name,
            task_id: run.task_id,
            service_name,
            workspace: WORKSPACE,
            job_ctx: &task.job_ctx,
            installs: &task.install_ctx,
            cache: &cache,
            archive_file: &task.job_ctx.package_file,
            test_report_file: "",
            registry,
        }
        .to_yaml()?;

        let status = task.docker_build_status.get_or_insert_with(DockerBuildStatus::default);
        status.status = TaskStatus::Running;

        let request = JobRequest {
            job_name: self.job_name.clone(),
            label: Some(run.job_label(kind, service_name)),
            cluster_id: task.runtime.cluster_id.clone(),
            image: job_image(&image_base, &task.runtime),
            boot_reaper: true,
            resources: task.runtime.res_req.resolve(&task.runtime.res_req_spec),
            cache: cache_mount,
            registries: payload.registries.clone(),
            job_config,
        };
        start_job(&self.ctx, run, request).await
    }
}

#[async_trait]
impl TaskPlugin for BuildPlugin {
    slot_accessors!(slot);

    fn init(&mut self, job_name: String, file_name: String) {
        self.job_name = job_name;
        self.file_name = file_name;
    }

    fn default_timeout(&self) -> i64 {
        match self.slot.kind() {
            TaskKind::BuildV3 => BUILD_V3_TIMEOUT,
            TaskKind::ArtifactDeploy => ARTIFACT_DEPLOY_TIMEOUT,
            _ => BUILD_TIMEOUT,
        }
    }

    async fn run(&mut self, run: &RunContext, service_name: &str, cancel: &CancellationToken) {
        let job = match self.start(run, service_name).await {
            Ok(job) => job,
            Err(e) => {
                self.set_build_failed(format!("create build job error: {}", e));
                return;
            }
        };
        info!("Build job {} created", job.job_name);

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
        let mut status = job.wait(&self.ctx, timeout, true, cancel).await;

        if let Some(build_status) = self.slot.task.docker_build_status.as_mut() {
            build_status.status = match status {
                TaskStatus::Passed if cancel.is_cancelled() => {
                    status = TaskStatus::Cancelled;
                    TaskStatus::Cancelled
                }
                other => other,
            };
        }
        self.set_status(status);
    }

    async fn complete(&mut self, run: &RunContext, _service_name: &str) {
        let Some(job) = self.job.take() else {
            return;
        };
        let (log_file, errors) = job.finish(&self.ctx, run, self.status(), &self.file_name).await;
        if let Some(log_file) = log_file {
            self.slot.task.log_file = log_file;
        }
        if !errors.is_empty() {
            self.common_mut().error = errors.join("; ");
        }
    }
}
