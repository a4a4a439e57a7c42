//! Errors raised while building a task graph
//!
//! Every variant fails task creation before any cluster object is touched.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The deploy destination has no such container
    #[error("container {container} doesn't exist in service {service} of {product}/{env}")]
    ContainerNotFound {
        product: String,
        env: String,
        service: String,
        container: String,
    },

    /// An image reference without a tag
    #[error("IMAGE is illegal")]
    ImageIllegal,

    /// No stage was produced for the run
    #[error("subtask not found")]
    NoSubtasks,

    #[error("permission denied: {creator} cannot deploy {product} to {namespace}")]
    PermissionDenied {
        creator: String,
        product: String,
        namespace: String,
    },

    /// Deploy destination not in `service/container` form
    #[error("[{0}]split target env error")]
    SplitTargetEnv(String),

    #[error("env type not match")]
    EnvTypeMismatch,

    /// A read model the run depends on is missing
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// Image distribution configured against a namespace no registry has
    #[error("no registry found with namespace [{0}]")]
    ReleaseRepoNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The catalog backend failed
    #[error("catalog error: {0}")]
    Catalog(String),
}

impl BuildError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_container_not_found(&self) -> bool {
        matches!(self, Self::ContainerNotFound { .. })
    }

    pub fn is_image_illegal(&self) -> bool {
        matches!(self, Self::ImageIllegal)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
