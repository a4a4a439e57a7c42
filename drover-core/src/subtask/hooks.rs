//! Subtasks that call out to external systems

use serde::{Deserialize, Serialize};

use super::TaskCommon;
use super::build::{KeyVal, Repository};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraIssue {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub summary: String,
}

/// Links the repositories of a run to the Jira issues they mention
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JiraTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    #[serde(default)]
    pub builds: Vec<Repository>,
    #[serde(default)]
    pub issues: Vec<JiraIssue>,
}

/// HTTP call to an external system, used by `trigger` and `extension`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: Vec<KeyVal>,
    /// Services built by the run, sent in the request body
    #[serde(default)]
    pub service_infos: Vec<ServiceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_name: String,
    #[serde(default)]
    pub service_module: String,
    #[serde(default)]
    pub image: String,
}
