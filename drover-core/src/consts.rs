//! Well-known names shared between task creation and execution

/// Identifier of the cluster the engine itself runs in
pub const LOCAL_CLUSTER_ID: &str = "0123456789abcdef12345678";

/// Namespace used for jobs scheduled on attached (non-local) clusters
pub const ATTACHED_CLUSTER_NAMESPACE: &str = "koderover-agent";

/// Task creators acting with system authority
pub const WEBHOOK_TASK_CREATOR: &str = "webhook";
pub const CRON_TASK_CREATOR: &str = "timer";

/// Placeholder sent back to clients in place of credential values
pub const MASK_VALUE: &str = "********";

/// Marker file written by the in-container executor right before it exits
pub const DOG_FOOD_FILE: &str = "/var/run/koderover-dog-food";

/// Pull secret every job references regardless of configured registries
pub const DEFAULT_IMAGE_PULL_SECRET: &str = "default-registry-secret";

/// Default source for build images
pub const IMAGE_FROM_KODEROVER: &str = "koderover";
pub const IMAGE_FROM_CUSTOM: &str = "custom";

/// Registry provider that carries no namespace in image references
pub const REGISTRY_PROVIDER_AWS: &str = "ecr";

/// Service types a deploy destination can have
pub const K8S_DEPLOY_TYPE: &str = "k8s";
pub const HELM_DEPLOY_TYPE: &str = "helm";
pub const PM_DEPLOY_TYPE: &str = "pm";

/// Labels selecting the workloads that belong to a product service
pub const PRODUCT_LABEL: &str = "s-product";
pub const SERVICE_LABEL: &str = "s-service";

/// Annotation helm writes on every resource of a release
pub const HELM_RELEASE_ANNOTATION: &str = "meta.helm.sh/release-name";
