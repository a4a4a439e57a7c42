//! Runtime configuration
//!
//! Defines all configurable parameters for subtask execution including
//! cluster access, executor images, object storage, and polling intervals.

use std::collections::BTreeMap;
use std::time::Duration;

use drover_core::consts::DOG_FOOD_FILE;

/// Runtime configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (local clusters vs busy shared ones).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Kubernetes API server URL (e.g., "https://10.0.0.1:6443")
    pub kube_url: String,

    /// Bearer token for the API server
    pub kube_token: String,

    /// Namespace jobs run in on the local cluster
    pub namespace: String,

    /// kubectl binary used for exec
    pub kubectl: String,

    /// helm binary used for chart releases
    pub helm: String,

    /// Executor images and binary, used when the task payload leaves them empty
    pub reaper_image: String,
    pub reaper_binary_file: String,
    pub predator_image: String,

    /// Docker daemons build jobs may use
    pub docker_hosts: Vec<String>,

    /// Object storage for logs, packages and charts
    pub storage_endpoint: String,
    pub storage_bucket: String,
    pub storage_subfolder: String,
    pub storage_token: String,

    /// How often a running job is checked for completion
    pub poll_interval: Duration,

    /// How often a new job is checked for a running pod
    pub start_poll_interval: Duration,

    /// How long a job may take to get a running pod
    pub start_timeout: Duration,

    /// How often deployed workloads are checked for readiness
    pub deploy_poll_interval: Duration,

    /// Marker file the executor writes when it is done
    pub dog_food_file: String,

    /// Marker file content meaning the executor failed
    pub dog_food_fail: String,

    /// Whether the cluster DNS accepts custom pod DNS configuration
    pub custom_dns: bool,

    /// Nameservers for custom pod DNS configuration
    pub nameservers: Vec<String>,

    /// Max subtasks of one stage running at the same time
    pub max_parallel: usize,

    /// Extra labels put on every job
    pub labels: BTreeMap<String, String>,
}

impl RuntimeConfig {
    /// Creates a new configuration with defaults
    pub fn new(kube_url: String, namespace: String) -> Self {
        Self {
            kube_url,
            kube_token: String::new(),
            namespace,
            kubectl: "kubectl".to_string(),
            helm: "helm".to_string(),
            reaper_image: "koderover/reaper-plugin:latest".to_string(),
            reaper_binary_file: "http://resource-server/reaper".to_string(),
            predator_image: "koderover/predator-plugin:latest".to_string(),
            docker_hosts: Vec::new(),
            storage_endpoint: String::new(),
            storage_bucket: String::new(),
            storage_subfolder: String::new(),
            storage_token: String::new(),
            poll_interval: Duration::from_secs(1),
            start_poll_interval: Duration::from_secs(2),
            start_timeout: Duration::from_secs(120),
            deploy_poll_interval: Duration::from_secs(2),
            dog_food_file: DOG_FOOD_FILE.to_string(),
            dog_food_fail: "fail".to_string(),
            custom_dns: false,
            nameservers: Vec::new(),
            max_parallel: 4,
            labels: BTreeMap::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DROVER_KUBE_URL (optional, default: in-cluster service address)
    /// - DROVER_KUBE_TOKEN (optional)
    /// - DROVER_NAMESPACE (optional, default: drover)
    /// - DROVER_KUBECTL / DROVER_HELM (optional binaries)
    /// - DROVER_REAPER_IMAGE / DROVER_REAPER_BINARY (optional)
    /// - DROVER_PREDATOR_IMAGE (optional)
    /// - DROVER_DOCKER_HOSTS (optional, comma separated)
    /// - DROVER_STORAGE_ENDPOINT / _BUCKET / _SUBFOLDER / _TOKEN (optional)
    /// - DROVER_POLL_INTERVAL (optional, seconds, default: 1)
    /// - DROVER_START_POLL_INTERVAL (optional, seconds, default: 2)
    /// - DROVER_START_TIMEOUT (optional, seconds, default: 120)
    /// - DROVER_DEPLOY_POLL_INTERVAL (optional, seconds, default: 2)
    /// - DROVER_DOG_FOOD_FILE / DROVER_DOG_FOOD_FAIL (optional)
    /// - DROVER_CUSTOM_DNS (optional, default: false)
    /// - DROVER_NAMESERVERS (optional, comma separated)
    /// - DROVER_MAX_PARALLEL (optional, default: 4)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let poll_interval = std::env::var("DROVER_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let start_poll_interval = std::env::var("DROVER_START_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.start_poll_interval);

        let start_timeout = std::env::var("DROVER_START_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.start_timeout);

        let deploy_poll_interval = std::env::var("DROVER_DEPLOY_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.deploy_poll_interval);

        let custom_dns = std::env::var("DROVER_CUSTOM_DNS")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .unwrap_or(defaults.custom_dns);

        let max_parallel = std::env::var("DROVER_MAX_PARALLEL")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_parallel);

        let config = Self {
            kube_url: env_or("DROVER_KUBE_URL", defaults.kube_url),
            kube_token: env_or("DROVER_KUBE_TOKEN", defaults.kube_token),
            namespace: env_or("DROVER_NAMESPACE", defaults.namespace),
            kubectl: env_or("DROVER_KUBECTL", defaults.kubectl),
            helm: env_or("DROVER_HELM", defaults.helm),
            reaper_image: env_or("DROVER_REAPER_IMAGE", defaults.reaper_image),
            reaper_binary_file: env_or("DROVER_REAPER_BINARY", defaults.reaper_binary_file),
            predator_image: env_or("DROVER_PREDATOR_IMAGE", defaults.predator_image),
            docker_hosts: env_list("DROVER_DOCKER_HOSTS"),
            storage_endpoint: env_or("DROVER_STORAGE_ENDPOINT", defaults.storage_endpoint),
            storage_bucket: env_or("DROVER_STORAGE_BUCKET", defaults.storage_bucket),
            storage_subfolder: env_or("DROVER_STORAGE_SUBFOLDER", defaults.storage_subfolder),
            storage_token: env_or("DROVER_STORAGE_TOKEN", defaults.storage_token),
            poll_interval,
            start_poll_interval,
            start_timeout,
            deploy_poll_interval,
            dog_food_file: env_or("DROVER_DOG_FOOD_FILE", defaults.dog_food_file),
            dog_food_fail: env_or("DROVER_DOG_FOOD_FAIL", defaults.dog_food_fail),
            custom_dns,
            nameservers: env_list("DROVER_NAMESERVERS"),
            max_parallel,
            labels: BTreeMap::new(),
        };

        Ok(config)
    }

    /// Adds a label put on every job
    pub fn with_label(mut self, key: String, value: String) -> Self {
        self.labels.insert(key, value);
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.kube_url.is_empty() {
            anyhow::bail!("kube_url cannot be empty");
        }

        if !self.kube_url.starts_with("http://") && !self.kube_url.starts_with("https://") {
            anyhow::bail!("kube_url must start with http:// or https://");
        }

        if self.namespace.is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }

        if self.poll_interval.is_zero() || self.start_poll_interval.is_zero() {
            anyhow::bail!("poll intervals must be greater than 0");
        }

        if self.start_timeout < self.start_poll_interval {
            anyhow::bail!("start_timeout must not be shorter than start_poll_interval");
        }

        if self.dog_food_file.is_empty() {
            anyhow::bail!("dog_food_file cannot be empty");
        }

        if self.max_parallel == 0 {
            anyhow::bail!("max_parallel must be greater than 0");
        }

        if self.nameservers.len() > 3 {
            anyhow::bail!("at most 3 nameservers are supported");
        }

        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(
            "https://kubernetes.default.svc".to_string(),
            "drover".to_string(),
        )
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
