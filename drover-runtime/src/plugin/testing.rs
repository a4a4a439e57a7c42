//! Testing plugin

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use drover_core::subtask::{KeyVal, TestingTask, upsert_env};
use drover_core::{SubTask, TaskStatus};

use super::build::{WORKSPACE, effective_cache, job_envs};
use super::job::{JobRequest, RunningJob, reaper_image, start_job};
use super::{PluginContext, RunContext, TaskPlugin, TaskSlot, slot_accessors};
use crate::error::Result;
use crate::job::spec::job_image;
use crate::reaper::ReaperContextBuilder;

const TESTING_TIMEOUT: i64 = 60 * 60;

/// Runs a test module in an executor job
///
/// When the module declares a result path, the executor uploads the report
/// under the log file name and the subtask is marked `report_ready`.
pub struct TestingPlugin {
    ctx: Arc<PluginContext>,
    slot: TaskSlot<TestingTask>,
    job_name: String,
    file_name: String,
    job: Option<RunningJob>,
}

impl TestingPlugin {
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

    async fn start(&mut self, run: &RunContext, service_name: &str) -> Result<RunningJob> {
        let payload = run.payload.clone();
        let kind = self.slot.kind();
        let image_base = reaper_image(&self.ctx, run);
        let task = &mut self.slot.task;

        let mut envs = job_envs(&task.job_ctx, run);
        if !task.namespace.is_empty() {
            envs.push(KeyVal::new("TEST_NAMESPACE", &task.namespace));
        }
        for env in envs {
            upsert_env(&mut task.job_ctx.env_vars, env);
        }

        let (cache, cache_mount) =
            effective_cache(&task.cache, payload.reset_cache, &task.job_ctx.env_vars);

        let report_file = if task.job_ctx.test_result_path.is_empty() {
            String::new()
        } else {
            self.file_name.clone()
        };
        let job_config = ReaperContextBuilder {
            payload: &payload,
            pipeline_name: &run.pipeline_name,
            task_id: run.task_id,
            service_name,
            workspace: WORKSPACE,
            job_ctx: &task.job_ctx,
            installs: &task.install_ctx,
            cache: &cache,
            archive_file: "",
            test_report_file: &report_file,
            registry: payload.registry_or_default(&payload.registry_id),
        }
        .to_yaml()?;

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
impl TaskPlugin for TestingPlugin {
    slot_accessors!(slot);

    fn init(&mut self, job_name: String, file_name: String) {
        self.job_name = job_name;
        self.file_name = file_name;
    }

    fn default_timeout(&self) -> i64 {
        TESTING_TIMEOUT
    }

    async fn run(&mut self, run: &RunContext, service_name: &str, cancel: &CancellationToken) {
        let job = match self.start(run, service_name).await {
            Ok(job) => job,
            Err(e) => {
                let message = format!("create testing job error: {}", e);
                error!("{}", message);
                self.fail(message);
                return;
            }
        };
        info!("Testing job {} created", job.job_name);

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
        let status = job.wait(&self.ctx, timeout, true, cancel).await;
        self.set_status(status);
    }

    async fn complete(&mut self, run: &RunContext, _service_name: &str) {
        let Some(job) = self.job.take() else {
            return;
        };
        let status = self.status();
        let (log_file, errors) = job.finish(&self.ctx, run, status, &self.file_name).await;

        let task = &mut self.slot.task;
        if let Some(log_file) = log_file {
            task.log_file = log_file;
        }
        // a failing suite still produces a report
        task.report_ready = !task.job_ctx.test_result_path.is_empty()
            && matches!(status, TaskStatus::Passed | TaskStatus::Failed);
        if !errors.is_empty() {
            task.common.error = errors.join("; ");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::fake::FakeKube;
    use crate::plugin::testkit::{Harness, run_context};
    use drover_core::subtask::{JobCtx, JobRuntime, TaskCommon};
    use drover_kube::JobStatus;

    fn testing_task(result_path: &str) -> SubTask {
        SubTask::Testing(TestingTask {
            common: TaskCommon::enabled(),
            test_name: "smoke".to_string(),
            runtime: JobRuntime {
                build_os: "focal".to_string(),
                image_from: "koderover".to_string(),
                ..Default::default()
            },
            job_ctx: JobCtx {
                test_result_path: result_path.to_string(),
                test_type: "function".to_string(),
                ..Default::default()
            },
            namespace: "demo-dev".to_string(),
            ..Default::default()
        })
    }

    fn plugin(harness: &Harness, sub: SubTask) -> TestingPlugin {
        let mut plugin = TestingPlugin::new(harness.context(), sub).unwrap();
        plugin.init(
            "demo-workflow-7-testingv2-smoke".to_string(),
            "demo-workflow-7-testingv2-smoke".to_string(),
        );
        plugin
    }

    #[tokio::test]
    async fn test_failed_suite_keeps_report() {
        let harness = Harness::new();
        harness.kube.push_pods(vec![FakeKube::pod("p1", "Running")]);
        let mut plugin = plugin(&harness, testing_task("/workspace/results"));
        let run = run_context();
        let cancel = CancellationToken::new();

        plugin.run(&run, "smoke", &cancel).await;
        assert_eq!(plugin.status(), TaskStatus::Running);

        let cm = harness.kube.config_map("demo-workflow-7-testingv2-smoke").unwrap();
        let config = &cm.data["job-config.xml"];
        assert!(config.contains("TEST_NAMESPACE=demo-dev"));
        assert!(config.contains("test_report_file: demo-workflow-7-testingv2-smoke"));

        harness.kube.set_job_status(JobStatus {
            failed: 1,
            ..Default::default()
        });
        plugin.wait(&run, &cancel).await;
        assert_eq!(plugin.status(), TaskStatus::Failed);

        plugin.complete(&run, "smoke").await;
        let task = plugin.task();
        let testing = task.as_typed::<TestingTask>().unwrap();
        assert!(testing.report_ready);
        assert_eq!(testing.log_file, "demo-workflow-7-testingv2-smoke");
    }

    #[tokio::test]
    async fn test_no_report_without_result_path() {
        let harness = Harness::new();
        harness.kube.push_pods(vec![FakeKube::pod("p1", "Running")]);
        let mut plugin = plugin(&harness, testing_task(""));
        let run = run_context();
        let cancel = CancellationToken::new();

        plugin.run(&run, "smoke", &cancel).await;
        harness.kube.set_job_status(JobStatus {
            succeeded: 1,
            ..Default::default()
        });
        plugin.wait(&run, &cancel).await;
        plugin.complete(&run, "smoke").await;

        assert_eq!(plugin.status(), TaskStatus::Passed);
        let task = plugin.task();
        assert!(!task.as_typed::<TestingTask>().unwrap().report_ready);
    }

    #[test]
    fn test_default_timeout() {
        let harness = Harness::new();
        let mut plugin = plugin(&harness, testing_task(""));
        assert_eq!(plugin.task_timeout().as_secs(), 3600);
    }
}
