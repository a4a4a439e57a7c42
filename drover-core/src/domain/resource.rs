//! Workload replace records and job resource tiers

use serde::{Deserialize, Serialize};

/// Kind of workload a deploy may mutate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "Deployment"),
            WorkloadKind::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

/// Record of one container image replaced on a live workload
///
/// Consumed by the deploy wait phase to check readiness, and by rollback
/// tooling to restore `origin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: WorkloadKind,
    pub container: String,
    pub origin: String,
    pub name: String,
}

/// Named CPU and memory preset for a job container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceTier {
    High,
    Medium,
    Low,
    Min,
    Define,
    #[default]
    #[serde(other)]
    Default,
}

/// CPU (millicores) and memory (MiB) requests and limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub cpu_limit: u32,
    #[serde(default)]
    pub memory_limit: u32,
    #[serde(default)]
    pub cpu_req: u32,
    #[serde(default)]
    pub memory_req: u32,
}

impl ResourceSpec {
    const fn preset(cpu_limit: u32, memory_limit: u32) -> Self {
        Self {
            cpu_limit,
            memory_limit,
            cpu_req: cpu_limit / 4,
            memory_req: memory_limit / 4,
        }
    }
}

pub const HIGH_SPEC: ResourceSpec = ResourceSpec::preset(16_000, 32_768);
pub const MEDIUM_SPEC: ResourceSpec = ResourceSpec::preset(8_000, 16_384);
pub const LOW_SPEC: ResourceSpec = ResourceSpec::preset(4_000, 8_192);
pub const MIN_SPEC: ResourceSpec = ResourceSpec::preset(2_000, 2_048);
pub const DEFAULT_SPEC: ResourceSpec = ResourceSpec::preset(1_000, 1_024);

impl ResourceTier {
    /// Effective requests and limits for this tier
    ///
    /// Fixed tiers ignore `custom`. `Define` keeps the user limits and derives
    /// requests at a quarter of them; memory requests above 2Gi are halved
    /// once more. Requests never drop below 1.
    pub fn resolve(self, custom: &ResourceSpec) -> ResourceSpec {
        match self {
            ResourceTier::High => HIGH_SPEC,
            ResourceTier::Medium => MEDIUM_SPEC,
            ResourceTier::Low => LOW_SPEC,
            ResourceTier::Min => MIN_SPEC,
            ResourceTier::Default => DEFAULT_SPEC,
            ResourceTier::Define => {
                let cpu_req = (custom.cpu_limit / 4).max(1);
                let mut memory_req = custom.memory_limit / 4;
                if memory_req > 2 * 1024 {
                    memory_req /= 2;
                }
                ResourceSpec {
                    cpu_limit: custom.cpu_limit,
                    memory_limit: custom.memory_limit,
                    cpu_req,
                    memory_req: memory_req.max(1),
                }
            }
        }
    }
}
