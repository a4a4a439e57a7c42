//! Kubernetes job lifecycle
//!
//! Launches executor jobs, waits for them to finish, and cleans up after
//! them. Every object of one subtask execution carries the same labels, so
//! stale objects from an earlier attempt are removed by selector before
//! new ones are created.

pub mod log;
pub mod secret;
pub mod spec;
pub mod wait;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drover_core::TaskStatus;
use drover_kube::{ConfigMap, KubeApi, ObjectMeta, Pod, Secret};

use crate::clock::{Clock, elapsed};
use crate::config::RuntimeConfig;
use crate::error::{PluginError, Result};
use crate::storage::ObjectStore;

pub use spec::JobTemplate;
pub use wait::{DogFoodMarker, PodProbe, Tick, WaitPhase};

const MAX_JOB_NAME_LEN: usize = 63;

/// Job name of one subtask execution: `{pipeline}-{task_id}-{type}-{service}`
pub fn job_name(pipeline_name: &str, task_id: i64, task_type: &str, service_name: &str) -> String {
    let mut name = format!("{}-{}-{}-{}", pipeline_name, task_id, task_type, service_name)
        .to_lowercase()
        .replace('_', "-");
    name.truncate(MAX_JOB_NAME_LEN);
    name.trim_end_matches(['-', '.']).to_string()
}

/// Selector matching the pods the Job controller created for `job_name`
fn pod_selector(job_name: &str) -> String {
    format!("job-name={}", job_name)
}

#[derive(Debug, Clone)]
struct WaitSettings {
    poll_interval: Duration,
    start_poll_interval: Duration,
    start_timeout: Duration,
    dog_food_file: String,
    marker: DogFoodMarker,
}

/// Runs executor jobs on a cluster
#[derive(Clone)]
pub struct JobManager {
    kube: Arc<dyn KubeApi>,
    clock: Arc<dyn Clock>,
    settings: WaitSettings,
}

impl JobManager {
    pub fn new(kube: Arc<dyn KubeApi>, clock: Arc<dyn Clock>, config: &RuntimeConfig) -> Self {
        Self {
            kube,
            clock,
            settings: WaitSettings {
                poll_interval: config.poll_interval,
                start_poll_interval: config.start_poll_interval,
                start_timeout: config.start_timeout,
                dog_food_file: config.dog_food_file.clone(),
                marker: DogFoodMarker::new(config.dog_food_fail.clone()),
            },
        }
    }

    pub fn kube(&self) -> &Arc<dyn KubeApi> {
        &self.kube
    }

    /// Replaces any earlier attempt and starts the job
    ///
    /// The executor configuration is stored in a ConfigMap named after the
    /// job, which the job mounts.
    pub async fn launch(
        &self,
        namespace: &str,
        selector: &str,
        template: &JobTemplate,
        job_config: String,
        secrets: &[Secret],
    ) -> Result<()> {
        self.kube.delete_config_maps(namespace, selector).await?;

        let mut metadata = ObjectMeta::named(&template.name);
        metadata.labels = template.labels.clone();
        let config_map = ConfigMap::new(
            metadata,
            BTreeMap::from([(spec::JOB_CONFIG_KEY.to_string(), job_config)]),
        );
        self.kube.create_config_map(namespace, &config_map).await?;
        debug!("ConfigMap {} created", template.name);

        self.kube.delete_jobs(namespace, selector).await?;

        for secret in secrets {
            self.kube.upsert_secret(namespace, secret).await?;
        }

        self.kube.create_job(namespace, &template.build()).await?;
        info!("Job {} created in {}", template.name, namespace);
        Ok(())
    }

    /// Waits until a pod of the job runs
    ///
    /// Returns `Running` once a pod has started, `Timeout` if none did within
    /// the start timeout, and `Cancelled` on cancellation.
    pub async fn wait_ready(
        &self,
        namespace: &str,
        job_name: &str,
        cancel: &CancellationToken,
    ) -> TaskStatus {
        let started = self.clock.now();
        loop {
            if cancel.is_cancelled() {
                return TaskStatus::Cancelled;
            }
            if elapsed(self.clock.as_ref(), started) >= self.settings.start_timeout {
                warn!("Job {} did not start within {:?}", job_name, self.settings.start_timeout);
                return TaskStatus::Timeout;
            }

            match self.kube.list_pods(namespace, &pod_selector(job_name)).await {
                Ok(pods) if pods.iter().any(|p| p.is_running() || p.is_finished()) => {
                    return TaskStatus::Running;
                }
                Ok(_) => debug!("Job {} has no running pod yet", job_name),
                Err(e) => warn!("Failed to list pods of {}: {:#}", job_name, e),
            }

            self.sleep(self.settings.start_poll_interval, cancel).await;
        }
    }

    /// Waits until the job reaches a terminal status
    ///
    /// With `check_dog_food`, running pods are probed for the executor's
    /// marker file and its content decides the outcome.
    pub async fn wait_done(
        &self,
        namespace: &str,
        job_name: &str,
        timeout: Duration,
        check_dog_food: bool,
        cancel: &CancellationToken,
    ) -> TaskStatus {
        let started = self.clock.now();
        let mut phase = WaitPhase::NotStarted;
        loop {
            let tick = if cancel.is_cancelled() {
                Tick {
                    cancelled: true,
                    ..Default::default()
                }
            } else {
                let waited = elapsed(self.clock.as_ref(), started);
                let mut tick = self.observe(namespace, job_name, check_dog_food).await;
                tick.cancelled = cancel.is_cancelled();
                tick.timed_out = waited >= timeout;
                tick.start_expired = waited >= self.settings.start_timeout;
                tick
            };

            phase = phase.next(&tick, &self.settings.marker, check_dog_food);
            if let WaitPhase::Done(status) = phase {
                info!("Job {} finished with status {}", job_name, status);
                return status;
            }

            self.sleep(self.settings.poll_interval, cancel).await;
        }
    }

    async fn observe(&self, namespace: &str, job_name: &str, check_dog_food: bool) -> Tick {
        let job = match self.kube.get_job(namespace, job_name).await {
            Ok(job) => job.map(|j| j.status()),
            Err(e) => {
                warn!("Failed to get job {}: {:#}", job_name, e);
                None
            }
        };

        let mut pods = Vec::new();
        if check_dog_food && job.is_some_and(|j| j.active != 0) {
            match self.kube.list_pods(namespace, &pod_selector(job_name)).await {
                Ok(list) => {
                    for pod in &list {
                        pods.push(self.probe(namespace, pod).await);
                    }
                }
                Err(e) => warn!("Failed to list pods of {}: {:#}", job_name, e),
            }
        }

        Tick {
            job,
            pods,
            ..Default::default()
        }
    }

    async fn probe(&self, namespace: &str, pod: &Pod) -> PodProbe {
        if pod.is_pending() {
            return PodProbe::Pending;
        }
        if pod.is_failed() {
            return PodProbe::Failed;
        }
        if pod.is_finished() {
            return PodProbe::Finished;
        }

        let Some(container) = pod.container_names().first().map(|c| c.to_string()) else {
            return PodProbe::Running { dog_food: None };
        };
        let file = &self.settings.dog_food_file;
        let command = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("test -f {} && cat {}", file, file),
        ];

        let dog_food = match self
            .kube
            .exec(namespace, &pod.metadata.name, &container, &command)
            .await
        {
            Ok(output) if output.success => Some(output.stdout),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to probe pod {}: {:#}", pod.metadata.name, e);
                None
            }
        };
        PodProbe::Running { dog_food }
    }

    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.clock.sleep(duration) => {}
        }
    }

    /// Deletes the job and its ConfigMap
    pub async fn cleanup(&self, namespace: &str, selector: &str) -> Result<()> {
        self.kube.delete_jobs(namespace, selector).await?;
        self.kube.delete_config_maps(namespace, selector).await?;
        info!("Cleaned up job objects matching {}", selector);
        Ok(())
    }

    /// Uploads the log of the job's first pod to `key`
    ///
    /// The oldest pod wins, and only its first container is read.
    pub async fn archive_log(
        &self,
        store: &dyn ObjectStore,
        namespace: &str,
        job_name: &str,
        key: &str,
    ) -> Result<()> {
        let mut pods = self
            .kube
            .list_pods(namespace, &pod_selector(job_name))
            .await?;
        pods.sort_by_key(|p| p.metadata.creation_timestamp);

        let Some(pod) = pods.first() else {
            return Err(PluginError::invalid_task(format!("no pod found for job {}", job_name)));
        };
        let Some(container) = pod.container_names().first().map(|c| c.to_string()) else {
            return Err(PluginError::invalid_task(format!(
                "pod {} has no container",
                pod.metadata.name
            )));
        };

        let text = self
            .kube
            .pod_logs(namespace, &pod.metadata.name, &container)
            .await?;
        store
            .put(key, text.into_bytes())
            .await
            .with_context(|| format!("Failed to upload log of {}", job_name))
            .map_err(PluginError::Storage)?;
        info!("Log of {} uploaded to {}", job_name, key);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::InMemoryObjectStore;
    use fake::FakeKube;
    use drover_kube::JobStatus;

    fn manager(kube: Arc<FakeKube>) -> JobManager {
        JobManager::new(kube, Arc::new(ManualClock::default()), &RuntimeConfig::default())
    }

    #[test]
    fn test_job_name() {
        assert_eq!(job_name("Demo_Flow", 7, "buildv2", "api"), "demo-flow-7-buildv2-api");
        let long = job_name(&"p".repeat(70), 1, "buildv2", "api");
        assert_eq!(long.len(), 63);
    }

    #[tokio::test]
    async fn test_launch_replaces_previous_attempt() {
        let kube = Arc::new(FakeKube::default());
        let jobs = manager(kube.clone());
        let template = JobTemplate {
            name: "demo-1-buildv2-api".to_string(),
            container_name: "buildv2".to_string(),
            ..Default::default()
        };
        let secret = Secret::new(ObjectMeta::named("team-registry-secret"), Secret::DOCKERCFG_TYPE, BTreeMap::new());

        jobs.launch("drover", "s-task=demo-1", &template, "workspace: /workspace".to_string(), &[secret])
            .await
            .unwrap();

        assert_eq!(
            kube.calls(),
            vec![
                "delete_config_maps drover s-task=demo-1",
                "create_config_map drover demo-1-buildv2-api",
                "delete_jobs drover s-task=demo-1",
                "upsert_secret drover team-registry-secret",
                "create_job drover demo-1-buildv2-api",
            ]
        );
        let cm = kube.config_map("demo-1-buildv2-api").unwrap();
        assert_eq!(cm.data["job-config.xml"], "workspace: /workspace");
    }

    #[tokio::test]
    async fn test_wait_ready_sees_running_pod() {
        let kube = Arc::new(FakeKube::default());
        kube.push_pods(vec![]);
        kube.push_pods(vec![FakeKube::pod("p1", "Running")]);
        let status = manager(kube)
            .wait_ready("drover", "job", &CancellationToken::new())
            .await;
        assert_eq!(status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let kube = Arc::new(FakeKube::default());
        let status = manager(kube)
            .wait_ready("drover", "job", &CancellationToken::new())
            .await;
        assert_eq!(status, TaskStatus::Timeout);
    }

    #[tokio::test]
    async fn test_wait_done_reads_fail_marker() {
        let kube = Arc::new(FakeKube::default());
        kube.set_job_status(JobStatus {
            active: 1,
            ..Default::default()
        });
        kube.push_pods(vec![FakeKube::pod("p1", "Running")]);
        kube.push_exec(None);
        kube.push_pods(vec![FakeKube::pod("p1", "Running")]);
        kube.push_exec(Some("fail"));

        let status = manager(kube.clone())
            .wait_done("drover", "job", Duration::from_secs(600), true, &CancellationToken::new())
            .await;
        assert_eq!(status, TaskStatus::Failed);
        assert!(kube.calls().iter().any(|c| c.starts_with("exec drover p1")));
    }

    #[tokio::test]
    async fn test_wait_done_times_out() {
        let kube = Arc::new(FakeKube::default());
        kube.set_job_status(JobStatus {
            active: 1,
            ..Default::default()
        });
        let status = manager(kube)
            .wait_done("drover", "job", Duration::from_secs(30), false, &CancellationToken::new())
            .await;
        assert_eq!(status, TaskStatus::Timeout);
    }

    #[tokio::test]
    async fn test_wait_done_cancelled() {
        let kube = Arc::new(FakeKube::default());
        kube.set_job_status(JobStatus {
            succeeded: 1,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let status = manager(kube)
            .wait_done("drover", "job", Duration::from_secs(30), true, &cancel)
            .await;
        assert_eq!(status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_archive_log_reads_oldest_pod() {
        let kube = Arc::new(FakeKube::default());
        let mut newer = FakeKube::pod("newer", "Succeeded");
        newer.metadata.creation_timestamp = Some(chrono::DateTime::from_timestamp(200, 0).unwrap());
        let mut older = FakeKube::pod("older", "Failed");
        older.metadata.creation_timestamp = Some(chrono::DateTime::from_timestamp(100, 0).unwrap());
        kube.push_pods(vec![newer, older]);

        let store = InMemoryObjectStore::new();
        manager(kube.clone())
            .archive_log(&store, "drover", "job", "demo/1/log/job.log")
            .await
            .unwrap();

        assert_eq!(
            store.get("demo/1/log/job.log").await.unwrap(),
            Some(b"log of older/main".to_vec())
        );
    }
}
