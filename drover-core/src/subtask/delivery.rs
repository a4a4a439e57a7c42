//! Image and package delivery subtasks

use serde::{Deserialize, Serialize};

use super::TaskCommon;

/// Registers an existing image as the build output of a target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    pub service_name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub registry_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JenkinsBuildParam {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JenkinsBuildArgs {
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub build_params: Vec<JenkinsBuildParam>,
}

impl JenkinsBuildArgs {
    /// String value of the `IMAGE` parameter, if any
    pub fn image_param(&self) -> Option<&str> {
        self.build_params
            .iter()
            .filter(|p| p.name == "IMAGE")
            .find_map(|p| p.value.as_str())
    }
}

/// Build delegated to an external Jenkins job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JenkinsBuildTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    pub service_name: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub jenkins_build_args: JenkinsBuildArgs,
}

/// Standalone image build from a Dockerfile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerBuildTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    pub service_name: String,
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub docker_file: String,
    #[serde(default)]
    pub build_args: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub registry_id: String,
}

/// Copies the build package to a destination object store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributeToS3Task {
    #[serde(flatten)]
    pub common: TaskCommon,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub package_file: String,
    #[serde(default)]
    pub dest_storage_url: String,
    #[serde(default)]
    pub s3_storage_id: String,
}

/// A registry an image is released to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoImage {
    pub repo_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub namespace: String,
}

/// Retags the built image into release registries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseImageTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub image_test: String,
    #[serde(default)]
    pub image_release: String,
    /// Namespace images are released under when no explicit release is set
    #[serde(default)]
    pub image_repo: String,
    #[serde(default)]
    pub releases: Vec<RepoImage>,
}

/// Image security scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityTask {
    #[serde(flatten)]
    pub common: TaskCommon,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub image_id: String,
}
