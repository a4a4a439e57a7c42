use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use drover_core::consts::LOCAL_CLUSTER_ID;
use drover_core::domain::payload::{ConfigPayload, JiraConfig, K8sCluster, RegistryNamespace};
use serde::Deserialize;

use super::{BuildModule, Catalog, ProductEnv, Project, TestModule, Workflow};
use crate::error::{BuildError, Result};

/// Grant allowing a user to deploy a product, `*` matching any namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeployGrant {
    pub user: String,
    pub product: String,
    #[serde(default = "any_namespace")]
    pub namespace: String,
}

fn any_namespace() -> String {
    "*".to_string()
}

/// Catalog held in memory, loadable from a JSON document
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InMemoryCatalog {
    pub workflows: Vec<Workflow>,
    pub projects: Vec<Project>,
    pub envs: Vec<ProductEnv>,
    pub build_modules: Vec<BuildModule>,
    pub test_modules: Vec<TestModule>,
    pub registries: Vec<RegistryNamespace>,
    pub clusters: Vec<K8sCluster>,
    pub jira: Option<JiraConfig>,
    pub basic_images: BTreeMap<String, String>,
    pub grants: Vec<DeployGrant>,
    pub config: ConfigPayload,
    #[serde(skip)]
    pub(crate) counters: Mutex<HashMap<String, i64>>,
}

impl InMemoryCatalog {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn workflow(&self, name: &str) -> Result<Workflow> {
        self.workflows
            .iter()
            .find(|w| w.name == name)
            .cloned()
            .ok_or_else(|| BuildError::not_found("workflow", name))
    }

    async fn project(&self, name: &str) -> Result<Project> {
        self.projects
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| BuildError::not_found("project", name))
    }

    async fn product_env(&self, product: &str, env: &str) -> Result<ProductEnv> {
        self.envs
            .iter()
            .find(|e| e.product_name == product && e.env_name == env)
            .cloned()
            .ok_or_else(|| BuildError::not_found("environment", format!("{}/{}", product, env)))
    }

    async fn build_modules(
        &self,
        product: &str,
        service: &str,
        module: &str,
    ) -> Result<Vec<BuildModule>> {
        Ok(self
            .build_modules
            .iter()
            .filter(|b| b.product_name == product && b.builds(product, service, module))
            .cloned()
            .collect())
    }

    async fn test_module(&self, name: &str) -> Result<TestModule> {
        self.test_modules
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| BuildError::not_found("test module", name))
    }

    async fn registries(&self) -> Result<Vec<RegistryNamespace>> {
        Ok(self.registries.clone())
    }

    async fn cluster(&self, id: &str) -> Result<K8sCluster> {
        match self.clusters.iter().find(|c| c.id == id) {
            Some(cluster) => Ok(cluster.clone()),
            None if id == LOCAL_CLUSTER_ID => Ok(K8sCluster {
                id: id.to_string(),
                ..Default::default()
            }),
            None => Err(BuildError::not_found("cluster", id)),
        }
    }

    async fn jira(&self) -> Result<Option<JiraConfig>> {
        Ok(self.jira.clone())
    }

    async fn basic_image(&self, id: &str) -> Result<Option<String>> {
        Ok(self.basic_images.get(id).cloned())
    }

    async fn container_image(
        &self,
        product: &str,
        env: &str,
        service: &str,
        container: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .envs
            .iter()
            .find(|e| e.product_name == product && e.env_name == env)
            .and_then(|e| e.service(service))
            .and_then(|s| s.containers.iter().find(|c| c.name == container))
            .map(|c| c.image.clone()))
    }

    async fn can_deploy(&self, user: &str, product: &str, namespace: &str) -> Result<bool> {
        Ok(self.grants.iter().any(|g| {
            g.user == user && g.product == product && (g.namespace == "*" || g.namespace == namespace)
        }))
    }

    async fn config_payload(&self) -> Result<ConfigPayload> {
        Ok(self.config.clone())
    }

    async fn next_task_id(&self, workflow: &str) -> Result<i64> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| BuildError::Catalog("task counter lock poisoned".to_string()))?;
        let next = counters.entry(workflow.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }
}
