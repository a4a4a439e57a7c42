//! Subtasks
//!
//! A subtask is one executable unit inside a stage. Every kind has its own
//! struct; `SubTask` is the tagged union over them, serialized with a `type`
//! discriminant so task documents stay readable by external tooling.
//!
//! Use [`TypedSubTask`] to get at the concrete struct of a known kind:
//!
//! ```
//! use drover_core::subtask::{BuildTask, SubTask, TypedSubTask};
//!
//! let sub = SubTask::Build(BuildTask::default());
//! assert!(sub.as_typed::<BuildTask>().is_some());
//! ```

pub mod build;
pub mod delivery;
pub mod deploy;
pub mod hooks;

pub use build::{
    BuildStep, BuildTask, CacheSettings, DockerBuildCtx, DockerBuildStatus, FileArchiveCtx,
    Install, JobCtx, JobRuntime, KeyVal, Repository, TestingTask, upsert_env,
};
pub use delivery::{
    ArtifactTask, DistributeToS3Task, DockerBuildTask, JenkinsBuildArgs, JenkinsBuildParam,
    JenkinsBuildTask, ReleaseImageTask, RepoImage, SecurityTask,
};
pub use deploy::DeployTask;
pub use hooks::{JiraIssue, JiraTask, ServiceInfo, WebhookTask};

use serde::{Deserialize, Serialize};

use crate::domain::kind::TaskKind;
use crate::domain::status::TaskStatus;

/// State every subtask carries regardless of kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCommon {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub status: TaskStatus,
    /// Timeout in minutes as authored, in seconds once the runtime has used it
    #[serde(default)]
    pub timeout: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    /// Set when the subtask belongs to a restarted run
    #[serde(default)]
    pub is_restart: bool,
}

impl TaskCommon {
    /// Common state of a freshly created, enabled subtask
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }
}

/// Tagged union of every subtask kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubTask {
    #[serde(rename = "buildv2")]
    Build(BuildTask),
    #[serde(rename = "buildv3")]
    BuildV3(BuildTask),
    #[serde(rename = "artifact_deploy")]
    ArtifactDeploy(BuildTask),
    #[serde(rename = "jenkins_build")]
    JenkinsBuild(JenkinsBuildTask),
    #[serde(rename = "docker_build")]
    DockerBuild(DockerBuildTask),
    #[serde(rename = "artifact")]
    Artifact(ArtifactTask),
    #[serde(rename = "deploy")]
    Deploy(DeployTask),
    #[serde(rename = "reset_image")]
    ResetImage(DeployTask),
    #[serde(rename = "testingv2")]
    Testing(TestingTask),
    #[serde(rename = "security")]
    Security(SecurityTask),
    #[serde(rename = "distribute2kodo")]
    DistributeToS3(DistributeToS3Task),
    #[serde(rename = "release_image")]
    ReleaseImage(ReleaseImageTask),
    #[serde(rename = "jira")]
    Jira(JiraTask),
    #[serde(rename = "trigger")]
    Trigger(WebhookTask),
    #[serde(rename = "extension")]
    Extension(WebhookTask),
}

impl SubTask {
    pub fn kind(&self) -> TaskKind {
        match self {
            SubTask::Build(_) => TaskKind::Build,
            SubTask::BuildV3(_) => TaskKind::BuildV3,
            SubTask::ArtifactDeploy(_) => TaskKind::ArtifactDeploy,
            SubTask::JenkinsBuild(_) => TaskKind::JenkinsBuild,
            SubTask::DockerBuild(_) => TaskKind::DockerBuild,
            SubTask::Artifact(_) => TaskKind::Artifact,
            SubTask::Deploy(_) => TaskKind::Deploy,
            SubTask::ResetImage(_) => TaskKind::ResetImage,
            SubTask::Testing(_) => TaskKind::Testing,
            SubTask::Security(_) => TaskKind::Security,
            SubTask::DistributeToS3(_) => TaskKind::DistributeToS3,
            SubTask::ReleaseImage(_) => TaskKind::ReleaseImage,
            SubTask::Jira(_) => TaskKind::Jira,
            SubTask::Trigger(_) => TaskKind::Trigger,
            SubTask::Extension(_) => TaskKind::Extension,
        }
    }

    pub fn common(&self) -> &TaskCommon {
        match self {
            SubTask::Build(t) | SubTask::BuildV3(t) | SubTask::ArtifactDeploy(t) => &t.common,
            SubTask::JenkinsBuild(t) => &t.common,
            SubTask::DockerBuild(t) => &t.common,
            SubTask::Artifact(t) => &t.common,
            SubTask::Deploy(t) | SubTask::ResetImage(t) => &t.common,
            SubTask::Testing(t) => &t.common,
            SubTask::Security(t) => &t.common,
            SubTask::DistributeToS3(t) => &t.common,
            SubTask::ReleaseImage(t) => &t.common,
            SubTask::Jira(t) => &t.common,
            SubTask::Trigger(t) | SubTask::Extension(t) => &t.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut TaskCommon {
        match self {
            SubTask::Build(t) | SubTask::BuildV3(t) | SubTask::ArtifactDeploy(t) => &mut t.common,
            SubTask::JenkinsBuild(t) => &mut t.common,
            SubTask::DockerBuild(t) => &mut t.common,
            SubTask::Artifact(t) => &mut t.common,
            SubTask::Deploy(t) | SubTask::ResetImage(t) => &mut t.common,
            SubTask::Testing(t) => &mut t.common,
            SubTask::Security(t) => &mut t.common,
            SubTask::DistributeToS3(t) => &mut t.common,
            SubTask::ReleaseImage(t) => &mut t.common,
            SubTask::Jira(t) => &mut t.common,
            SubTask::Trigger(t) | SubTask::Extension(t) => &mut t.common,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.common().enabled
    }

    pub fn status(&self) -> TaskStatus {
        self.common().status
    }

    /// Concrete struct of this subtask, if it is of kind `T`
    pub fn as_typed<T: TypedSubTask>(&self) -> Option<&T> {
        T::peel(self)
    }

    pub fn as_typed_mut<T: TypedSubTask>(&mut self) -> Option<&mut T> {
        T::peel_mut(self)
    }

    /// Decodes a subtask from its JSON document form
    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Typed access to the struct behind one or more subtask kinds
pub trait TypedSubTask: Sized {
    /// Kinds whose payload is this struct
    const KINDS: &'static [TaskKind];

    fn peel(sub: &SubTask) -> Option<&Self>;

    fn peel_mut(sub: &mut SubTask) -> Option<&mut Self>;

    fn into_typed(sub: SubTask) -> Option<Self>;

    /// Wraps the struct back into the union as `kind`
    ///
    /// Kinds other than [`Self::KINDS`] fall back to the first of them.
    fn wrap(self, kind: TaskKind) -> SubTask;

    fn common(&self) -> &TaskCommon;

    fn common_mut(&mut self) -> &mut TaskCommon;
}

macro_rules! typed_subtask {
    ($ty:ty => $first:ident $(, $rest:ident)*) => {
        impl TypedSubTask for $ty {
            const KINDS: &'static [TaskKind] = &[TaskKind::$first $(, TaskKind::$rest)*];

            fn peel(sub: &SubTask) -> Option<&Self> {
                match sub {
                    SubTask::$first(t) $(| SubTask::$rest(t))* => Some(t),
                    _ => None,
                }
            }

            fn peel_mut(sub: &mut SubTask) -> Option<&mut Self> {
                match sub {
                    SubTask::$first(t) $(| SubTask::$rest(t))* => Some(t),
                    _ => None,
                }
            }

            fn into_typed(sub: SubTask) -> Option<Self> {
                match sub {
                    SubTask::$first(t) $(| SubTask::$rest(t))* => Some(t),
                    _ => None,
                }
            }

            fn wrap(self, kind: TaskKind) -> SubTask {
                match kind {
                    $(TaskKind::$rest => SubTask::$rest(self),)*
                    _ => SubTask::$first(self),
                }
            }

            fn common(&self) -> &TaskCommon {
                &self.common
            }

            fn common_mut(&mut self) -> &mut TaskCommon {
                &mut self.common
            }
        }
    };
}

typed_subtask!(BuildTask => Build, BuildV3, ArtifactDeploy);
typed_subtask!(JenkinsBuildTask => JenkinsBuild);
typed_subtask!(DockerBuildTask => DockerBuild);
typed_subtask!(ArtifactTask => Artifact);
typed_subtask!(DeployTask => Deploy, ResetImage);
typed_subtask!(TestingTask => Testing);
typed_subtask!(SecurityTask => Security);
typed_subtask!(DistributeToS3Task => DistributeToS3);
typed_subtask!(ReleaseImageTask => ReleaseImage);
typed_subtask!(JiraTask => Jira);
typed_subtask!(WebhookTask => Trigger, Extension);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resource::WorkloadKind;

    fn deploy() -> DeployTask {
        DeployTask {
            common: TaskCommon::enabled(),
            service_type: "k8s".to_string(),
            product_name: "demo".to_string(),
            env_name: "dev".to_string(),
            namespace: "demo-dev".to_string(),
            service_name: "aslan".to_string(),
            container_name: "web_aslan".to_string(),
            image: "hub.io/demo/web:1".to_string(),
            workload_type: Some(WorkloadKind::Deployment),
            ..Default::default()
        }
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let value = SubTask::Deploy(deploy()).to_value().unwrap();
        assert_eq!(value["type"], "deploy");
        assert_eq!(value["enabled"], true);
        assert_eq!(value["container_name"], "web_aslan");
    }

    #[test]
    fn test_document_round_trip_keeps_kind_and_fields() {
        let original = SubTask::ResetImage(deploy());
        let decoded = SubTask::from_value(original.to_value().unwrap()).unwrap();
        assert_eq!(decoded.kind(), TaskKind::ResetImage);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_from_foreign_document() {
        let value = serde_json::json!({
            "type": "buildv2",
            "enabled": true,
            "service_name": "aslan",
            "job_ctx": { "builds": [{ "repo_name": "zadig", "branch": "main" }] }
        });
        let sub = SubTask::from_value(value).unwrap();
        let build = sub.as_typed::<BuildTask>().unwrap();
        assert_eq!(build.job_ctx.builds[0].branch, "main");
        assert!(sub.is_enabled());
        assert_eq!(sub.status(), TaskStatus::Created);
    }

    #[test]
    fn test_typed_access_respects_kind() {
        let mut sub = SubTask::Deploy(deploy());
        assert!(sub.as_typed::<BuildTask>().is_none());
        sub.as_typed_mut::<DeployTask>().unwrap().image = "other".to_string();
        assert_eq!(sub.as_typed::<DeployTask>().unwrap().image, "other");
        assert_eq!(DeployTask::KINDS, &[TaskKind::Deploy, TaskKind::ResetImage]);
    }

    #[test]
    fn test_wrap_keeps_kind() {
        let sub = SubTask::ResetImage(deploy());
        let typed = DeployTask::into_typed(sub).unwrap();
        assert_eq!(typed.clone().wrap(TaskKind::ResetImage).kind(), TaskKind::ResetImage);
        assert_eq!(typed.wrap(TaskKind::Build).kind(), TaskKind::Deploy);
        assert!(BuildTask::into_typed(SubTask::Deploy(deploy())).is_none());
    }
}
