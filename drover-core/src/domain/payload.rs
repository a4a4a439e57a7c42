//! Per-run configuration payload
//!
//! Built once when a task is created and shared read-only by every subtask
//! of that run.

use serde::{Deserialize, Serialize};

use crate::consts::REGISTRY_PROVIDER_AWS;
use crate::domain::cache::Cache;

/// Snapshot of everything a task run needs from the platform configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPayload {
    /// Registries available to the run, including the default one
    #[serde(default)]
    pub registries: Vec<RegistryNamespace>,

    /// Registry images of this run are pushed to
    #[serde(default)]
    pub registry_id: String,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub s3: Option<S3Storage>,

    #[serde(default)]
    pub clusters: Vec<K8sCluster>,

    #[serde(default)]
    pub release: ReleaseConfig,

    #[serde(default)]
    pub private_keys: Vec<PrivateKey>,

    #[serde(default)]
    pub jira: Option<JiraConfig>,

    /// Skip cache mounting for this run
    #[serde(default)]
    pub ignore_cache: bool,

    /// Rebuild the cache from scratch for this run
    #[serde(default)]
    pub reset_cache: bool,

    /// Whether the cluster DNS allows custom pod DNS configuration
    #[serde(default)]
    pub custom_dns_supported: bool,
}

impl ConfigPayload {
    pub fn registry(&self, id: &str) -> Option<&RegistryNamespace> {
        self.registries.iter().find(|r| r.id == id)
    }

    pub fn default_registry(&self) -> Option<&RegistryNamespace> {
        self.registries.iter().find(|r| r.is_default)
    }

    /// Registry for `id`, falling back to the default one when unset
    pub fn registry_or_default(&self, id: &str) -> Option<&RegistryNamespace> {
        if id.is_empty() {
            self.default_registry()
        } else {
            self.registry(id)
        }
    }

    pub fn cluster(&self, id: &str) -> Option<&K8sCluster> {
        self.clusters.iter().find(|c| c.id == id)
    }
}

/// An image registry together with the namespace images are pushed under
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryNamespace {
    pub id: String,
    pub reg_addr: String,
    #[serde(default)]
    pub reg_type: String,
    #[serde(default)]
    pub reg_provider: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
}

impl RegistryNamespace {
    pub fn is_aws(&self) -> bool {
        self.reg_provider == REGISTRY_PROVIDER_AWS
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enable_application_proxy: bool,
    #[serde(default, rename = "type")]
    pub proxy_type: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub need_password: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ProxyConfig {
    /// Proxy URL in `type://[user:pass@]address:port` form
    pub fn proxy_url(&self) -> String {
        if self.need_password {
            format!(
                "{}://{}:{}@{}:{}",
                self.proxy_type, self.username, self.password, self.address, self.port
            )
        } else {
            format!("{}://{}:{}", self.proxy_type, self.address, self.port)
        }
    }

    /// Whether job containers should download through this proxy
    pub fn applies_to_jobs(&self) -> bool {
        self.enable_application_proxy && self.proxy_type == "http"
    }
}

/// Object storage location for logs and artifacts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Storage {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default)]
    pub insecure: bool,
}

/// A cluster jobs can be scheduled on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct K8sCluster {
    pub id: String,
    #[serde(default)]
    pub advanced_config: Option<AdvancedConfig>,
    #[serde(default)]
    pub cache: Cache,
}

/// Node scheduling preferences of a cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// `required` or `preferred`
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub node_labels: Vec<NodeSelectorLabel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSelectorLabel {
    pub key: String,
    pub operator: String,
    #[serde(default)]
    pub value: Vec<String>,
}

/// Images and binaries of the in-container executors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub reaper_image: String,
    #[serde(default)]
    pub reaper_binary_file: String,
    #[serde(default)]
    pub predator_image: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrivateKey {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JiraConfig {
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub access_token: String,
}
