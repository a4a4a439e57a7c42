//! Shared plumbing of plugins that run their work as a Kubernetes job

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use drover_core::TaskStatus;
use drover_core::consts::{ATTACHED_CLUSTER_NAMESPACE, LOCAL_CLUSTER_ID};
use drover_core::domain::payload::RegistryNamespace;
use drover_core::domain::resource::ResourceSpec;
use drover_core::domain::label::JobLabel;

use super::{PluginContext, RunContext};
use crate::error::Result;
use crate::job::log::log_key;
use crate::job::secret::registry_secrets;
use crate::job::spec::{
    CacheMount, dns_config, namespaced_docker_host, node_affinity, qualify_resource_server,
    reaper_boot_script,
};
use crate::job::JobTemplate;

/// Namespace jobs of `cluster_id` run in
pub fn job_namespace(ctx: &PluginContext, cluster_id: &str) -> String {
    if cluster_id.is_empty() || cluster_id == LOCAL_CLUSTER_ID {
        ctx.config.namespace.clone()
    } else {
        ATTACHED_CLUSTER_NAMESPACE.to_string()
    }
}

/// Storage prefix of the run: the task's storage subfolder, else the runtime's
pub fn storage_subfolder(ctx: &PluginContext, run: &RunContext) -> String {
    run.payload
        .s3
        .as_ref()
        .map(|s3| s3.subfolder.clone())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ctx.config.storage_subfolder.clone())
}

/// What a plugin needs to start its job
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub job_name: String,
    pub label: Option<JobLabel>,
    pub cluster_id: String,
    pub image: String,
    /// Start the reaper inside the image instead of its own entrypoint
    pub boot_reaper: bool,
    pub resources: ResourceSpec,
    pub cache: Option<CacheMount>,
    pub registries: Vec<RegistryNamespace>,
    /// Configuration document mounted into the job
    pub job_config: String,
}

/// A started job
#[derive(Debug, Clone, Default)]
pub struct RunningJob {
    pub namespace: String,
    pub job_name: String,
    pub selector: String,
}

impl RunningJob {
    /// Waits for the job to finish
    ///
    /// With `check_dog_food` the running pods are probed for the marker file;
    /// otherwise only the job's succeeded count decides.
    pub async fn wait(
        &self,
        ctx: &PluginContext,
        timeout: std::time::Duration,
        check_dog_food: bool,
        cancel: &CancellationToken,
    ) -> TaskStatus {
        ctx.jobs
            .wait_done(&self.namespace, &self.job_name, timeout, check_dog_food, cancel)
            .await
    }

    /// Archives the job log and, for aborted runs, deletes the job
    ///
    /// Returns the log file name on successful upload. Errors are returned
    /// as messages for the subtask's `error` field.
    pub async fn finish(
        &self,
        ctx: &PluginContext,
        run: &RunContext,
        status: TaskStatus,
        file_name: &str,
    ) -> (Option<String>, Vec<String>) {
        let mut errors = Vec::new();
        let mut log_file = None;

        let key = log_key(&storage_subfolder(ctx, run), &run.pipeline_name, run.task_id, file_name);
        match ctx
            .jobs
            .archive_log(ctx.store.as_ref(), &self.namespace, &self.job_name, &key)
            .await
        {
            Ok(()) => log_file = Some(file_name.to_string()),
            Err(e) => {
                warn!("Failed to archive log of {}: {}", self.job_name, e);
                errors.push(e.to_string());
            }
        }

        if matches!(status, TaskStatus::Cancelled | TaskStatus::Timeout) {
            if let Err(e) = ctx.jobs.cleanup(&self.namespace, &self.selector).await {
                warn!("Failed to clean up {}: {}", self.job_name, e);
                errors.push(e.to_string());
            }
        }

        (log_file, errors)
    }
}

/// Creates the job described by `request`, replacing earlier attempts
///
/// Returns once the job object exists; the caller waits for it to start.
pub async fn start_job(
    ctx: &PluginContext,
    run: &RunContext,
    request: JobRequest,
) -> Result<RunningJob> {
    let namespace = job_namespace(ctx, &request.cluster_id);
    let payload = &run.payload;

    let mut labels = request
        .label
        .as_ref()
        .map(|l| l.labels())
        .unwrap_or_default();
    for (k, v) in &ctx.config.labels {
        labels.entry(k.clone()).or_insert_with(|| v.clone());
    }
    let selector = request
        .label
        .as_ref()
        .map(|l| l.selector())
        .unwrap_or_else(|| format!("job-name={}", request.job_name));

    let docker_host = namespaced_docker_host(&run.docker_host, &ctx.config.namespace, &namespace);

    let boot_script = request.boot_reaper.then(|| {
        let binary = if payload.release.reaper_binary_file.is_empty() {
            ctx.config.reaper_binary_file.as_str()
        } else {
            payload.release.reaper_binary_file.as_str()
        };
        let proxy = payload
            .proxy
            .applies_to_jobs()
            .then(|| payload.proxy.proxy_url());
        reaper_boot_script(&qualify_resource_server(binary, &namespace), proxy.as_deref())
    });

    let affinity = payload
        .cluster(&request.cluster_id)
        .and_then(|c| node_affinity(c.advanced_config.as_ref()));
    let dns = (payload.custom_dns_supported || ctx.config.custom_dns).then(|| {
        dns_config(&namespace, std::slice::from_ref(&run.namespace), &ctx.config.nameservers)
    });

    let container_name = request
        .label
        .as_ref()
        .map(|l| l.task_type.replace('_', "-"))
        .unwrap_or_else(|| "job".to_string());

    let template = JobTemplate {
        name: request.job_name.clone(),
        labels,
        container_name,
        image: request.image,
        docker_host,
        registries: request.registries.clone(),
        resources: request.resources,
        cache: request.cache,
        affinity,
        dns_config: dns,
        boot_script,
    };

    let secrets = registry_secrets(&request.registries);
    ctx.jobs
        .launch(&namespace, &selector, &template, request.job_config, &secrets)
        .await?;
    info!("Started job {} in {}", request.job_name, namespace);

    Ok(RunningJob {
        namespace,
        job_name: request.job_name,
        selector,
    })
}

/// Reaper image configured for the run, falling back to the runtime's
pub fn reaper_image(ctx: &PluginContext, run: &RunContext) -> String {
    if run.payload.release.reaper_image.is_empty() {
        ctx.config.reaper_image.clone()
    } else {
        run.payload.release.reaper_image.clone()
    }
}

/// Image of the plugin that builds, retags and scans images
pub fn predator_image(ctx: &PluginContext, run: &RunContext) -> String {
    if run.payload.release.predator_image.is_empty() {
        ctx.config.predator_image.clone()
    } else {
        run.payload.release.predator_image.clone()
    }
}
