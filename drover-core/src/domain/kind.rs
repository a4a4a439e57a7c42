//! Task kinds and their execution priority

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kind of a subtask, and of the stage that groups subtasks of that kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "jira")]
    Jira,
    #[serde(rename = "pipeline")]
    Pipeline,
    #[serde(rename = "buildv2")]
    Build,
    #[serde(rename = "buildv3")]
    BuildV3,
    #[serde(rename = "jenkins_build")]
    JenkinsBuild,
    #[serde(rename = "docker_build")]
    DockerBuild,
    #[serde(rename = "archive")]
    Archive,
    #[serde(rename = "artifact")]
    Artifact,
    #[serde(rename = "artifact_deploy")]
    ArtifactDeploy,
    #[serde(rename = "deploy")]
    Deploy,
    #[serde(rename = "testingv2")]
    Testing,
    #[serde(rename = "security")]
    Security,
    #[serde(rename = "distribute2kodo")]
    DistributeToS3,
    #[serde(rename = "release_image")]
    ReleaseImage,
    #[serde(rename = "reset_image")]
    ResetImage,
    #[serde(rename = "trigger")]
    Trigger,
    #[serde(rename = "extension")]
    Extension,
}

impl TaskKind {
    /// Every kind, in execution order
    pub const ALL: [TaskKind; 17] = [
        TaskKind::Jira,
        TaskKind::Pipeline,
        TaskKind::Build,
        TaskKind::BuildV3,
        TaskKind::JenkinsBuild,
        TaskKind::DockerBuild,
        TaskKind::Archive,
        TaskKind::Artifact,
        TaskKind::ArtifactDeploy,
        TaskKind::Deploy,
        TaskKind::Testing,
        TaskKind::Security,
        TaskKind::DistributeToS3,
        TaskKind::ReleaseImage,
        TaskKind::ResetImage,
        TaskKind::Trigger,
        TaskKind::Extension,
    ];

    /// Execution priority of this kind; lower runs earlier
    ///
    /// The table encodes real dependencies: a build must finish before the
    /// image it produces can be deployed, and images are reset last.
    pub fn order(self) -> u8 {
        match self {
            TaskKind::Jira => 1,
            TaskKind::Pipeline => 2,
            TaskKind::Build => 3,
            TaskKind::BuildV3 => 4,
            TaskKind::JenkinsBuild => 5,
            TaskKind::DockerBuild => 6,
            TaskKind::Archive => 7,
            TaskKind::Artifact => 8,
            TaskKind::ArtifactDeploy => 9,
            TaskKind::Deploy => 10,
            TaskKind::Testing => 11,
            TaskKind::Security => 12,
            TaskKind::DistributeToS3 => 13,
            TaskKind::ReleaseImage => 14,
            TaskKind::ResetImage => 15,
            TaskKind::Trigger => 16,
            TaskKind::Extension => 17,
        }
    }

    /// Wire name of this kind
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Jira => "jira",
            TaskKind::Pipeline => "pipeline",
            TaskKind::Build => "buildv2",
            TaskKind::BuildV3 => "buildv3",
            TaskKind::JenkinsBuild => "jenkins_build",
            TaskKind::DockerBuild => "docker_build",
            TaskKind::Archive => "archive",
            TaskKind::Artifact => "artifact",
            TaskKind::ArtifactDeploy => "artifact_deploy",
            TaskKind::Deploy => "deploy",
            TaskKind::Testing => "testingv2",
            TaskKind::Security => "security",
            TaskKind::DistributeToS3 => "distribute2kodo",
            TaskKind::ReleaseImage => "release_image",
            TaskKind::ResetImage => "reset_image",
            TaskKind::Trigger => "trigger",
            TaskKind::Extension => "extension",
        }
    }

    /// Whether several subtasks of this kind may target the same key
    ///
    /// One container can be deployed to many destinations, so deploy and
    /// reset-image subtasks get a numeric suffix instead of replacing each other.
    pub fn allows_duplicate_targets(self) -> bool {
        matches!(self, TaskKind::Deploy | TaskKind::ResetImage)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown task kind: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_strictly_increasing_over_all() {
        let orders: Vec<u8> = TaskKind::ALL.iter().map(|k| k.order()).collect();
        assert!(orders.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(orders.first(), Some(&1));
        assert_eq!(orders.last(), Some(&17));
    }

    #[test]
    fn test_build_runs_before_deploy() {
        assert!(TaskKind::Build.order() < TaskKind::Deploy.order());
        assert!(TaskKind::Deploy.order() < TaskKind::ResetImage.order());
    }

    #[test]
    fn test_parse_wire_names() {
        assert_eq!("buildv2".parse::<TaskKind>(), Ok(TaskKind::Build));
        assert_eq!("distribute2kodo".parse::<TaskKind>(), Ok(TaskKind::DistributeToS3));
        assert!("buildv9".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&TaskKind::Testing).unwrap();
        assert_eq!(json, "\"testingv2\"");
    }
}
