//! Error types for subtask execution

use drover_kube::KubeError;
use thiserror::Error;

/// Result type alias for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

/// Errors raised while running a subtask
///
/// Plugins never propagate these out of `run`/`wait`/`complete`; they are
/// rendered into the subtask's `error` field and the status is set instead.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Kubernetes API call failed
    #[error("kubernetes: {0}")]
    Kube(#[from] KubeError),

    /// Object storage read or write failed
    #[error("storage: {0:#}")]
    Storage(anyhow::Error),

    /// Helm release operation failed
    #[error("helm: {0:#}")]
    Helm(anyhow::Error),

    /// Image path resolution failed
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Job configuration could not be serialized
    #[error("serialize job config: {0}")]
    Serialize(#[from] serde_yaml::Error),

    /// HTTP call to an external system failed
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The subtask document does not match the plugin
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// A container to update was not found on any workload
    #[error("container {container} is not found in resources with label {selector}")]
    ContainerNotFound { container: String, selector: String },

    /// No docker host could be selected
    #[error("no docker host found")]
    NoDockerHost,
}

impl PluginError {
    pub fn invalid_task(message: impl Into<String>) -> Self {
        Self::InvalidTask(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(e) if e.is_not_found())
            || matches!(self, Self::ContainerNotFound { .. })
    }
}

/// Errors mapping an image URL onto values.yaml paths
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("match data illegal, expect length: 1-3, actual length: {0}")]
    PathCount(usize),

    #[error("image url {0} does not match the image pattern")]
    Unmatched(String),

    #[error("invalid values document: {0}")]
    Values(String),
}
