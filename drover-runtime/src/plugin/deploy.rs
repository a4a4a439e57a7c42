//! Deploy plugin: points live workloads at a new image
//!
//! Plain Kubernetes services get their container image patched in place.
//! Helm services are upgraded through their chart, with the new image
//! written into the values at the paths the service declares. Either way
//! the replaced containers are recorded in `replace_resources`, which the
//! wait phase polls for readiness.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drover_core::consts::{HELM_RELEASE_ANNOTATION, PRODUCT_LABEL, SERVICE_LABEL};
use drover_core::domain::resource::{Resource, WorkloadKind};
use drover_core::image::image_name;
use drover_core::subtask::DeployTask;
use drover_core::{SubTask, TaskStatus};
use drover_kube::Workload;

use super::{PluginContext, RunContext, TaskPlugin, TaskSlot, slot_accessors};
use crate::clock::elapsed;
use crate::error::{PluginError, Result};
use crate::helm::resolve::{assign_image_data, merge_documents, replace_image};
use crate::helm::{ChartSpec, RenderSet, release_name, service_of_release};

const DEPLOY_TIMEOUT: i64 = 10 * 60;

/// Extra time granted to helm on top of its own `--timeout`
const HELM_GRACE: Duration = Duration::from_secs(30);

const WORKLOAD_KINDS: [WorkloadKind; 2] = [WorkloadKind::Deployment, WorkloadKind::StatefulSet];

/// Object keys a service chart may be stored under, most specific first
pub fn chart_keys(product_name: &str, service_name: &str, revision: i64) -> Vec<String> {
    let mut keys = Vec::with_capacity(2);
    if revision > 0 {
        keys.push(format!("{}/{}-{}.tgz", product_name, service_name, revision));
    }
    keys.push(format!("{}/{}.tgz", product_name, service_name));
    keys
}

fn selector_of(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

pub struct DeployPlugin {
    ctx: Arc<PluginContext>,
    slot: TaskSlot<DeployTask>,
}

impl DeployPlugin {
    pub fn new(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Self> {
        Ok(Self {
            ctx,
            slot: TaskSlot::new(sub)?,
        })
    }

    pub fn boxed(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Box<dyn TaskPlugin>> {
        Ok(Box::new(Self::new(ctx, sub)?))
    }

    fn namespace<'a>(&'a self, run: &'a RunContext) -> &'a str {
        if self.slot.task.namespace.is_empty() {
            &run.namespace
        } else {
            &self.slot.task.namespace
        }
    }

    async fn replace_container(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        workload: &Workload,
        container: &str,
    ) -> Result<Option<Resource>> {
        let Some(current) = workload.containers().iter().find(|c| c.name == container) else {
            return Ok(None);
        };
        self.ctx
            .kube()
            .set_container_image(kind, namespace, &workload.metadata.name, container, &self.slot.task.image)
            .await?;
        info!(
            "Replaced image of {} {}/{} container {}: {} -> {}",
            kind, namespace, workload.metadata.name, container, current.image, self.slot.task.image
        );
        Ok(Some(Resource {
            kind,
            container: container.to_string(),
            origin: current.image.clone(),
            name: workload.metadata.name.clone(),
        }))
    }

    /// Patches the container image on the service's workloads
    async fn update_workloads(&self, namespace: &str) -> Result<Vec<Resource>> {
        let task = &self.slot.task;
        let container = task.bare_container_name();
        let mut replaced = Vec::new();

        let selector = match task.workload_type {
            None => {
                let selector = format!(
                    "{}={},{}={}",
                    PRODUCT_LABEL, task.product_name, SERVICE_LABEL, task.service_name
                );
                for kind in WORKLOAD_KINDS {
                    let workloads = self.ctx.kube().list_workloads(kind, namespace, &selector).await?;
                    for workload in &workloads {
                        if let Some(resource) =
                            self.replace_container(kind, namespace, workload, container).await?
                        {
                            replaced.push(resource);
                        }
                    }
                }
                selector
            }
            Some(kind) => {
                let name = if task.workload_name.is_empty() {
                    &task.service_name
                } else {
                    &task.workload_name
                };
                if let Some(workload) = self.ctx.kube().get_workload(kind, namespace, name).await? {
                    if let Some(resource) =
                        self.replace_container(kind, namespace, &workload, container).await?
                    {
                        replaced.push(resource);
                    }
                }
                format!("name={}", name)
            }
        };

        if replaced.is_empty() {
            return Err(PluginError::ContainerNotFound {
                container: container.to_string(),
                selector,
            });
        }
        Ok(replaced)
    }

    /// Workload containers of the service's release running `image`
    async fn release_resources(&self, namespace: &str, image: &str) -> Result<Vec<Resource>> {
        let task = &self.slot.task;
        let wanted = image_name(image);
        let mut resources = Vec::new();

        for kind in WORKLOAD_KINDS {
            for workload in self.ctx.kube().list_workloads(kind, namespace, "").await? {
                let in_release = workload
                    .metadata
                    .annotations
                    .get(HELM_RELEASE_ANNOTATION)
                    .is_some_and(|r| service_of_release(r, namespace) == task.service_name);
                if !in_release {
                    continue;
                }
                for c in workload.containers() {
                    if image_name(&c.image) == wanted {
                        resources.push(Resource {
                            kind,
                            container: c.name.clone(),
                            origin: c.image.clone(),
                            name: workload.metadata.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(resources)
    }

    async fn download_chart(&self, dir: &std::path::Path) -> Result<std::path::PathBuf> {
        let task = &self.slot.task;
        for key in chart_keys(&task.product_name, &task.service_name, task.service_revision) {
            match self.ctx.store.get(&key).await.map_err(PluginError::Storage)? {
                Some(bytes) => {
                    let path = dir.join(format!("{}.tgz", task.service_name));
                    tokio::fs::write(&path, bytes)
                        .await
                        .map_err(|e| PluginError::Storage(e.into()))?;
                    debug!("Chart {} downloaded to {}", key, path.display());
                    return Ok(path);
                }
                None => debug!("Chart {} not found", key),
            }
        }
        Err(PluginError::invalid_task(format!(
            "chart of service {} not found",
            task.service_name
        )))
    }

    /// Upgrades the service's helm release with the new image
    async fn upgrade_release(&self, namespace: &str, timeout: Duration) -> Result<Vec<Resource>> {
        let task = self.slot.task.clone();
        let container = task.bare_container_name();

        let env = self
            .ctx
            .render_sets
            .environment(&task.product_name, &task.env_name)
            .await
            .map_err(PluginError::Helm)?
            .ok_or_else(|| {
                PluginError::invalid_task(format!(
                    "environment {}/{} not found",
                    task.product_name, task.env_name
                ))
            })?;
        let service_container = env
            .service(&task.service_name)
            .and_then(|s| s.containers.iter().find(|c| c.name == container))
            .ok_or_else(|| PluginError::ContainerNotFound {
                container: container.to_string(),
                selector: format!("release={}", release_name(namespace, &task.service_name)),
            })?;
        let image_path = service_container.image_path.as_ref().ok_or_else(|| {
            PluginError::invalid_task(format!("image path of container {} is not set", container))
        })?;
        let mut render_set: RenderSet = env.render_set.clone();
        let chart = render_set.chart(&task.service_name).cloned().ok_or_else(|| {
            PluginError::invalid_task(format!("chart values of {} not found", task.service_name))
        })?;

        let resources = self.release_resources(namespace, &service_container.image).await?;

        let values = assign_image_data(&task.image, image_path)?;
        let service_values = replace_image(&chart.values_yaml, &values)?;
        let merged = merge_documents(&[
            render_set.default_values.as_str(),
            service_values.as_str(),
            chart.override_yaml.as_str(),
        ])?;
        let merged = replace_image(&merged, &values)?;

        let release = release_name(namespace, &task.service_name);
        let history = self
            .ctx
            .helm
            .release_history(namespace, &release)
            .await
            .map_err(PluginError::Helm)?;
        if let Some(last) = history.last().filter(|r| r.is_pending()) {
            return Err(PluginError::invalid_task(format!(
                "release {} is in {} state, try again later",
                release, last.status
            )));
        }

        let dir = tempfile::tempdir().map_err(|e| PluginError::Helm(e.into()))?;
        let chart_path = self.download_chart(dir.path()).await?;
        let spec = ChartSpec {
            release_name: release.clone(),
            chart_path,
            namespace: namespace.to_string(),
            version: chart.chart_version.clone(),
            values_yaml: merged,
            timeout,
        };
        tokio::time::timeout(timeout + HELM_GRACE, self.ctx.helm.upgrade_install(&spec))
            .await
            .map_err(|_| PluginError::Helm(anyhow::anyhow!("upgrade of {} timed out", release)))?
            .map_err(PluginError::Helm)?;
        info!("Release {} upgraded to {}", release, task.image);

        if let Some(chart) = render_set.chart_mut(&task.service_name) {
            chart.values_yaml = service_values;
        }
        self.ctx
            .render_sets
            .update_render_set(&task.product_name, &task.env_name, &render_set)
            .await
            .map_err(PluginError::Helm)?;

        Ok(resources)
    }

    async fn all_ready(&self, namespace: &str) -> Result<bool> {
        for resource in &self.slot.task.replace_resources {
            let workload = self
                .ctx
                .kube()
                .get_workload(resource.kind, namespace, &resource.name)
                .await?;
            if !workload.is_some_and(|w| w.is_ready()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Container states of the pods behind the replaced workloads
    async fn pod_report(&self, namespace: &str) -> String {
        let mut lines = Vec::new();
        for resource in &self.slot.task.replace_resources {
            let workload = match self
                .ctx
                .kube()
                .get_workload(resource.kind, namespace, &resource.name)
                .await
            {
                Ok(Some(w)) => w,
                _ => continue,
            };
            let selector = selector_of(&workload.spec.template.metadata.labels);
            let pods = match self.ctx.kube().list_pods(namespace, &selector).await {
                Ok(pods) => pods,
                Err(e) => {
                    warn!("Failed to list pods of {}: {}", resource.name, e);
                    continue;
                }
            };
            for pod in &pods {
                for status in &pod.status.container_statuses {
                    let (state, detail) = match (&status.state.waiting, &status.state.terminated) {
                        (Some(d), _) => ("Waiting", d),
                        (_, Some(d)) => ("Terminated", d),
                        _ => continue,
                    };
                    lines.push(format!(
                        "Status: {}, Reason: {}, Message: {}",
                        state, detail.reason, detail.message
                    ));
                }
            }
        }
        lines.join("\n")
    }
}

#[async_trait]
impl TaskPlugin for DeployPlugin {
    slot_accessors!(slot);

    fn init(&mut self, _job_name: String, _file_name: String) {}

    fn default_timeout(&self) -> i64 {
        DEPLOY_TIMEOUT
    }

    async fn run(&mut self, run: &RunContext, _service_name: &str, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            self.set_status(TaskStatus::Cancelled);
            return;
        }
        self.set_status(TaskStatus::Running);
        let namespace = self.namespace(run).to_string();

        let result = if self.slot.task.is_helm() {
            let timeout = self.task_timeout();
            self.upgrade_release(&namespace, timeout).await
        } else {
            self.update_workloads(&namespace).await
        };

        match result {
            Ok(resources) => self.slot.task.replace_resources = resources,
            Err(e) => {
                warn!("Deploy of {} failed: {}", self.slot.task.service_name, e);
                self.fail(e.to_string());
            }
        }
    }

    async fn wait(&mut self, run: &RunContext, cancel: &CancellationToken) {
        if self.status() != TaskStatus::Running {
            return;
        }
        if self.slot.task.skip_waiting {
            self.set_status(TaskStatus::Passed);
            return;
        }

        let namespace = self.namespace(run).to_string();
        let timeout = self.task_timeout();
        let clock = self.ctx.clock.clone();
        let started = clock.now();
        loop {
            if cancel.is_cancelled() {
                self.set_status(TaskStatus::Cancelled);
                return;
            }
            if elapsed(clock.as_ref(), started) >= timeout {
                let report = self.pod_report(&namespace).await;
                let common = self.common_mut();
                common.status = TaskStatus::Timeout;
                common.error = report;
                return;
            }

            match self.all_ready(&namespace).await {
                Ok(true) => {
                    info!("Service {} is ready", self.slot.task.service_name);
                    self.set_status(TaskStatus::Passed);
                    return;
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to check readiness: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = clock.sleep(self.ctx.config.deploy_poll_interval) => {}
            }
        }
    }

    async fn complete(&mut self, _run: &RunContext, _service_name: &str) {}
}
