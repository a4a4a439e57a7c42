//! Read models the graph builder consumes
//!
//! Workflows, build and test modules, environments and registries are owned
//! by other services. The builder only reads them through [`Catalog`].

mod memory;

pub use memory::{DeployGrant, InMemoryCatalog};

use async_trait::async_trait;
use drover_core::domain::cache::CacheDirType;
use drover_core::domain::payload::{ConfigPayload, JiraConfig, K8sCluster, RegistryNamespace};
use drover_core::domain::resource::{ResourceSpec, ResourceTier, WorkloadKind};
use drover_core::subtask::{Install, KeyVal, RepoImage, Repository};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// (product, service, module) a build module or distribution applies to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceModuleTarget {
    #[serde(default)]
    pub product_name: String,
    pub service_name: String,
    pub service_module: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub product_name: String,
    /// Restore deployed images once the run is over
    #[serde(default)]
    pub reset_image: bool,
    #[serde(default)]
    pub distribute_stage: Option<DistributeStage>,
    #[serde(default)]
    pub security_stage: Option<ToggleStage>,
    #[serde(default)]
    pub extension_stage: Option<ExtensionStage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleStage {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributeStage {
    #[serde(default)]
    pub enabled: bool,
    /// Registry namespace images are released into
    #[serde(default)]
    pub image_repo: String,
    #[serde(default)]
    pub releases: Vec<RepoImage>,
    /// Object storage packages are distributed to
    #[serde(default)]
    pub dest_storage_url: String,
    #[serde(default)]
    pub distributes: Vec<ProductDistribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDistribute {
    pub target: ServiceModuleTarget,
    #[serde(default)]
    pub image_distribute: bool,
    /// Distribute the build package to object storage
    #[serde(default)]
    pub qstack_distribute: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionStage {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: Vec<KeyVal>,
    #[serde(default)]
    pub timeout: i64,
}

/// Job image and resources shared by build and test definitions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreBuild {
    #[serde(default)]
    pub installs: Vec<Install>,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub build_os: String,
    #[serde(default)]
    pub image_from: String,
    #[serde(default)]
    pub res_req: ResourceTier,
    #[serde(default)]
    pub res_req_spec: ResourceSpec,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub upload_pkg: bool,
    #[serde(default)]
    pub clean_workspace: bool,
    #[serde(default)]
    pub enable_proxy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerBuildDef {
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub docker_file: String,
    #[serde(default)]
    pub build_args: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostBuild {
    #[serde(default)]
    pub docker_build: Option<DockerBuildDef>,
    /// Path of the file archived as the build package
    #[serde(default)]
    pub file_location: Option<String>,
    #[serde(default)]
    pub scripts: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildModule {
    pub name: String,
    pub product_name: String,
    #[serde(default)]
    pub targets: Vec<ServiceModuleTarget>,
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub repos: Vec<Repository>,
    #[serde(default)]
    pub pre_build: PreBuild,
    #[serde(default)]
    pub scripts: String,
    #[serde(default)]
    pub post_build: Option<PostBuild>,
    #[serde(default)]
    pub pm_deploy_scripts: String,
    #[serde(default)]
    pub cache_enable: bool,
    #[serde(default)]
    pub cache_dir_type: CacheDirType,
    #[serde(default)]
    pub cache_user_dir: String,
    #[serde(default)]
    pub caches: Vec<String>,
}

impl BuildModule {
    pub fn builds(&self, product: &str, service: &str, module: &str) -> bool {
        self.targets.iter().any(|t| {
            (t.product_name.is_empty() || t.product_name == product)
                && t.service_name == service
                && t.service_module == module
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestModule {
    pub name: String,
    pub product_name: String,
    #[serde(default)]
    pub test_type: String,
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub repos: Vec<Repository>,
    #[serde(default)]
    pub scripts: String,
    #[serde(default)]
    pub pre_test: Option<PreBuild>,
    #[serde(default)]
    pub artifact_path: String,
    #[serde(default)]
    pub test_result_path: String,
    #[serde(default)]
    pub test_report_path: String,
    #[serde(default)]
    pub caches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContainer {
    pub name: String,
    #[serde(default)]
    pub image: String,
}

/// A service deployed into an environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductService {
    pub service_name: String,
    #[serde(default)]
    pub service_type: String,
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub workload_type: Option<WorkloadKind>,
    #[serde(default)]
    pub containers: Vec<ServiceContainer>,
}

/// An environment of a product
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEnv {
    pub product_name: String,
    pub env_name: String,
    pub namespace: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub registry_id: String,
    /// Services grouped in deployment order
    #[serde(default)]
    pub services: Vec<Vec<ProductService>>,
}

impl ProductEnv {
    pub fn service(&self, name: &str) -> Option<&ProductService> {
        self.services.iter().flatten().find(|s| s.service_name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    /// Deploy timeout in minutes
    #[serde(default)]
    pub timeout: i64,
}

/// Read access to everything task creation depends on
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn workflow(&self, name: &str) -> Result<Workflow>;
    async fn project(&self, name: &str) -> Result<Project>;
    async fn product_env(&self, product: &str, env: &str) -> Result<ProductEnv>;

    /// Build modules of a product matching an optional module name and target
    async fn build_modules(&self, product: &str, service: &str, module: &str)
    -> Result<Vec<BuildModule>>;
    async fn test_module(&self, name: &str) -> Result<TestModule>;

    async fn registries(&self) -> Result<Vec<RegistryNamespace>>;
    async fn cluster(&self, id: &str) -> Result<K8sCluster>;
    async fn jira(&self) -> Result<Option<JiraConfig>>;

    /// Latest image name of a user-maintained base image
    async fn basic_image(&self, id: &str) -> Result<Option<String>>;

    /// Image currently running in a container of a deployed service
    async fn container_image(
        &self,
        product: &str,
        env: &str,
        service: &str,
        container: &str,
    ) -> Result<Option<String>>;

    /// Whether `user` may deploy `product` into `namespace`
    async fn can_deploy(&self, user: &str, product: &str, namespace: &str) -> Result<bool>;

    /// Configuration snapshot shared by every subtask of a run
    async fn config_payload(&self) -> Result<ConfigPayload>;

    async fn next_task_id(&self, workflow: &str) -> Result<i64>;
}
