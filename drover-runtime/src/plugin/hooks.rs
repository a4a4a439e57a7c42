//! Plugins calling external systems over HTTP

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drover_core::domain::payload::JiraConfig;
use drover_core::subtask::{JiraIssue, JiraTask, Repository, ServiceInfo, WebhookTask};
use drover_core::{SubTask, TaskStatus};

use super::{PluginContext, RunContext, TaskPlugin, TaskSlot, slot_accessors};
use crate::error::{PluginError, Result};

const HOOK_TIMEOUT: i64 = 10 * 60;

static ISSUE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z][A-Z0-9_]+-\d+").expect("valid regex"));

/// Issue keys mentioned by the refs of `repos`, sorted and deduplicated
pub fn issue_keys(repos: &[Repository]) -> Vec<String> {
    let keys: BTreeSet<String> = repos
        .iter()
        .flat_map(|repo| [repo.branch.as_str(), repo.tag.as_str()])
        .flat_map(|text| ISSUE_KEY.find_iter(text))
        .map(|m| m.as_str().to_string())
        .collect();
    keys.into_iter().collect()
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct IssueDocument {
    id: String,
    key: String,
    fields: IssueFields,
}

/// Runs `call` unless cancelled or timed out first
async fn guarded<F, T>(
    cancel: &CancellationToken,
    timeout: std::time::Duration,
    call: F,
) -> std::result::Result<Result<T>, TaskStatus>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TaskStatus::Cancelled),
        res = tokio::time::timeout(timeout, call) => res.map_err(|_| TaskStatus::Timeout),
    }
}

/// Looks up the Jira issues the run's repositories refer to
pub struct JiraPlugin {
    ctx: Arc<PluginContext>,
    slot: TaskSlot<JiraTask>,
}

impl JiraPlugin {
    pub fn new(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Self> {
        Ok(Self {
            ctx,
            slot: TaskSlot::new(sub)?,
        })
    }

    pub fn boxed(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Box<dyn TaskPlugin>> {
        Ok(Box::new(Self::new(ctx, sub)?))
    }

    async fn fetch_issue(&self, jira: &JiraConfig, key: &str) -> Result<Option<JiraIssue>> {
        let host = jira.host.trim_end_matches('/');
        let response = self
            .ctx
            .http
            .get(format!("{}/rest/api/2/issue/{}", host, key))
            .query(&[("fields", "summary")])
            .basic_auth(&jira.user, Some(&jira.access_token))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("Jira issue {} does not exist", key);
                Ok(None)
            }
            status if status.is_success() => {
                let doc: IssueDocument = response.json().await?;
                Ok(Some(JiraIssue {
                    url: format!("{}/browse/{}", host, doc.key),
                    id: doc.id,
                    key: doc.key,
                    summary: doc.fields.summary,
                }))
            }
            status => Err(PluginError::invalid_task(format!(
                "jira returned {} for {}",
                status, key
            ))),
        }
    }

    async fn fetch_issues(&self, jira: &JiraConfig) -> Result<Vec<JiraIssue>> {
        let mut issues = Vec::new();
        for key in issue_keys(&self.slot.task.builds) {
            if let Some(issue) = self.fetch_issue(jira, &key).await? {
                issues.push(issue);
            }
        }
        Ok(issues)
    }
}

#[async_trait]
impl TaskPlugin for JiraPlugin {
    slot_accessors!(slot);

    fn init(&mut self, _job_name: String, _file_name: String) {}

    fn default_timeout(&self) -> i64 {
        HOOK_TIMEOUT
    }

    async fn run(&mut self, run: &RunContext, _service_name: &str, cancel: &CancellationToken) {
        let Some(jira) = run.payload.jira.clone() else {
            self.fail("jira is not configured".to_string());
            return;
        };
        self.set_status(TaskStatus::Running);
        let timeout = self.task_timeout();

        match guarded(cancel, timeout, self.fetch_issues(&jira)).await {
            Err(status) => self.set_status(status),
            Ok(Ok(issues)) => {
                info!("Linked {} jira issues", issues.len());
                self.slot.task.issues = issues;
                self.set_status(TaskStatus::Passed);
            }
            Ok(Err(e)) => self.fail(format!("fetch jira issues error: {}", e)),
        }
    }

    async fn wait(&mut self, _run: &RunContext, _cancel: &CancellationToken) {}

    async fn complete(&mut self, _run: &RunContext, _service_name: &str) {}
}

/// Body posted by a webhook subtask
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub pipeline_name: &'a str,
    pub task_id: i64,
    pub product_name: &'a str,
    pub env_name: &'a str,
    pub service_infos: &'a [ServiceInfo],
}

/// Posts the run's services to an external URL; any 2xx answer passes
pub struct WebhookPlugin {
    ctx: Arc<PluginContext>,
    slot: TaskSlot<WebhookTask>,
}

impl WebhookPlugin {
    pub fn new(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Self> {
        Ok(Self {
            ctx,
            slot: TaskSlot::new(sub)?,
        })
    }

    pub fn boxed(ctx: Arc<PluginContext>, sub: SubTask) -> Result<Box<dyn TaskPlugin>> {
        Ok(Box::new(Self::new(ctx, sub)?))
    }

    fn target_url(&self) -> String {
        let task = &self.slot.task;
        let path = task.path.trim_start_matches('/');
        if path.is_empty() {
            task.url.clone()
        } else {
            format!("{}/{}", task.url.trim_end_matches('/'), path)
        }
    }

    async fn post(&self, run: &RunContext) -> Result<StatusCode> {
        let task = &self.slot.task;
        let body = WebhookPayload {
            kind: self.slot.kind().as_str(),
            pipeline_name: &run.pipeline_name,
            task_id: run.task_id,
            product_name: &run.product_name,
            env_name: &run.env_name,
            service_infos: &task.service_infos,
        };

        let mut request = self.ctx.http.post(self.target_url()).json(&body);
        for header in &task.headers {
            request = request.header(header.key.as_str(), header.value.as_str());
        }
        Ok(request.send().await?.status())
    }
}

#[async_trait]
impl TaskPlugin for WebhookPlugin {
    slot_accessors!(slot);

    fn init(&mut self, _job_name: String, _file_name: String) {}

    fn default_timeout(&self) -> i64 {
        HOOK_TIMEOUT
    }

    async fn run(&mut self, run: &RunContext, _service_name: &str, cancel: &CancellationToken) {
        if self.slot.task.url.is_empty() {
            self.fail("webhook url is empty".to_string());
            return;
        }
        self.set_status(TaskStatus::Running);
        let timeout = self.task_timeout();

        match guarded(cancel, timeout, self.post(run)).await {
            Err(status) => self.set_status(status),
            Ok(Ok(status)) if status.is_success() => self.set_status(TaskStatus::Passed),
            Ok(Ok(status)) => {
                warn!("Webhook {} answered {}", self.target_url(), status);
                self.fail(format!("webhook returned {}", status));
            }
            Ok(Err(e)) => self.fail(format!("call webhook error: {}", e)),
        }
    }

    async fn wait(&mut self, _run: &RunContext, _cancel: &CancellationToken) {}

    async fn complete(&mut self, _run: &RunContext, _service_name: &str) {}
}
