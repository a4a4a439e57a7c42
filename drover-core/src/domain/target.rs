//! Build and deploy targets

use serde::{Deserialize, Serialize};

use crate::subtask::{JenkinsBuildArgs, KeyVal, Repository};

/// One buildable and deployable unit of a workflow run
///
/// Identified by (product, service, module).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Build module name
    pub name: String,
    pub service_name: String,
    pub product_name: String,
    /// Service type of the target, `k8s`, `helm` or `pm`
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub build: BuildRef,
    #[serde(default)]
    pub deploy: Vec<DeployEnv>,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub jenkins_build_args: Option<JenkinsBuildArgs>,
    /// Image used when the target delivers an existing artifact
    #[serde(default)]
    pub image: String,
}

impl Target {
    /// Stage key of this target
    pub fn key(&self) -> String {
        format!("{}_{}", self.name, self.service_name)
    }
}

/// Repositories the target's build checks out
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRef {
    #[serde(default)]
    pub repos: Vec<Repository>,
}

/// A container the target's image is deployed to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployEnv {
    /// `service/container`
    pub env: String,
    /// `k8s`, `helm` or `pm`
    #[serde(rename = "type")]
    pub deploy_type: String,
    #[serde(default)]
    pub product_name: String,
}
