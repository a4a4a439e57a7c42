//! Build and testing subtasks
//!
//! Both run as Kubernetes jobs driven by the in-container executor, so they
//! share the job context types defined here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::TaskCommon;
use crate::domain::cache::{Cache, CacheDirType};
use crate::domain::resource::{ResourceSpec, ResourceTier};
use crate::domain::status::TaskStatus;

/// Environment variable handed to a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_credential: bool,
}

impl KeyVal {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_credential: false,
        }
    }
}

/// Inserts or replaces `kv` by key, keeping the first position of the key
pub fn upsert_env(envs: &mut Vec<KeyVal>, kv: KeyVal) {
    match envs.iter_mut().find(|e| e.key == kv.key) {
        Some(existing) => *existing = kv,
        None => envs.push(kv),
    }
}

/// A source repository checked out by a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub repo_owner: String,
    pub repo_name: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub pr: i64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub commit_id: String,
    #[serde(default)]
    pub checkout_path: String,
    #[serde(default)]
    pub remote_name: String,
    #[serde(default)]
    pub submodules: bool,
}

impl Repository {
    /// Name usable as an environment variable prefix
    pub fn env_prefix(&self) -> String {
        self.repo_name.replace('-', "_")
    }

    /// The ref this checkout points at, used in candidate names
    pub fn ref_name(&self) -> String {
        if !self.tag.is_empty() {
            self.tag.clone()
        } else if self.pr > 0 {
            format!("pr-{}", self.pr)
        } else {
            self.branch.clone()
        }
    }
}

/// A toolchain installed into the job container before scripts run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Install {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub scripts: String,
    #[serde(default)]
    pub bin_path: String,
    #[serde(default)]
    pub envs: Vec<String>,
    #[serde(default)]
    pub download: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    #[serde(default)]
    pub build_type: String,
    #[serde(default)]
    pub scripts: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerBuildCtx {
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub docker_file: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub build_args: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArchiveCtx {
    #[serde(default)]
    pub file_location: String,
    #[serde(default)]
    pub file_name: String,
}

/// Everything the in-container executor needs to run a build or test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCtx {
    #[serde(default)]
    pub env_vars: Vec<KeyVal>,
    #[serde(default)]
    pub builds: Vec<Repository>,
    #[serde(default)]
    pub build_steps: Vec<BuildStep>,
    #[serde(default)]
    pub docker_build_ctx: Option<DockerBuildCtx>,
    #[serde(default)]
    pub file_archive_ctx: Option<FileArchiveCtx>,
    #[serde(default)]
    pub post_scripts: String,
    #[serde(default)]
    pub pm_deploy_scripts: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub package_file: String,
    #[serde(default)]
    pub caches: Vec<String>,
    #[serde(default)]
    pub test_type: String,
    #[serde(default)]
    pub test_result_path: String,
    #[serde(default)]
    pub test_report_path: String,
    #[serde(default)]
    pub artifact_path: String,
    #[serde(default)]
    pub upload_pkg: bool,
    #[serde(default)]
    pub clean_workspace: bool,
    #[serde(default)]
    pub enable_proxy: bool,
}

/// Secondary status tracking the image push after a build passes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerBuildStatus {
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub registry_repo: String,
    #[serde(default)]
    pub status: TaskStatus,
}

/// Cache settings copied from the cluster at creation time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub cache_enable: bool,
    #[serde(default)]
    pub cache_dir_type: CacheDirType,
    #[serde(default)]
    pub cache_user_dir: String,
}

/// Container image and resources a job runs with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRuntime {
    #[serde(default)]
    pub build_os: String,
    #[serde(default)]
    pub image_from: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub res_req: ResourceTier,
    #[serde(default)]
    pub res_req_spec: ResourceSpec,
    #[serde(default)]
    pub cluster_id: String,
}

/// Build subtask, shared by `buildv2`, `buildv3` and `artifact_deploy`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    /// Build module name
    pub service_name: String,
    /// Service the module belongs to
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(flatten)]
    pub runtime: JobRuntime,
    #[serde(default)]
    pub install_ctx: Vec<Install>,
    #[serde(default)]
    pub job_ctx: JobCtx,
    #[serde(default)]
    pub docker_build_status: Option<DockerBuildStatus>,
    #[serde(default)]
    pub log_file: String,
    #[serde(flatten)]
    pub cache: CacheSettings,
    /// Host IPs of environment groups, exported as `<ENV>_HOST_IPs`
    #[serde(default)]
    pub env_host_names: BTreeMap<String, Vec<String>>,
}

/// Testing subtask
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestingTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    pub test_name: String,
    #[serde(default)]
    pub test_module_name: String,
    #[serde(flatten)]
    pub runtime: JobRuntime,
    #[serde(default)]
    pub install_ctx: Vec<Install>,
    #[serde(default)]
    pub job_ctx: JobCtx,
    #[serde(default)]
    pub log_file: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub report_ready: bool,
    #[serde(flatten)]
    pub cache: CacheSettings,
}
