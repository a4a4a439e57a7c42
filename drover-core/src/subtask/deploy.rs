//! Deploy and reset-image subtasks

use serde::{Deserialize, Serialize};

use super::TaskCommon;
use crate::consts::HELM_DEPLOY_TYPE;
use crate::domain::resource::{Resource, WorkloadKind};

/// Container image update on a live environment
///
/// Also used for `reset_image`, which restores the image recorded at task
/// creation once the rest of the group has finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    /// `k8s` or `helm`
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub env_name: String,
    #[serde(default)]
    pub namespace: String,
    pub service_name: String,
    /// Chart revision for helm services
    #[serde(default)]
    pub service_revision: i64,
    pub container_name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub skip_waiting: bool,
    #[serde(default)]
    pub cluster_id: String,
    /// Known workload type of the service; label discovery is used when unset
    #[serde(default)]
    pub workload_type: Option<WorkloadKind>,
    #[serde(default)]
    pub workload_name: String,
    #[serde(default)]
    pub replace_resources: Vec<Resource>,
}

impl DeployTask {
    pub fn is_helm(&self) -> bool {
        self.service_type == HELM_DEPLOY_TYPE
    }

    /// Container name without the `_service` suffix added at creation
    pub fn bare_container_name(&self) -> &str {
        let suffix = format!("_{}", self.service_name);
        self.container_name
            .strip_suffix(suffix.as_str())
            .unwrap_or(&self.container_name)
    }
}
