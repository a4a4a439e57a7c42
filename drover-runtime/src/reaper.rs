//! Configuration handed to the in-container executor
//!
//! The reaper reads a YAML document from the job's ConfigMap describing the
//! toolchains to install, the repositories to check out, the scripts to run
//! and where to put what it produces.

use serde::{Deserialize, Serialize};

use drover_core::domain::cache::{Cache, CacheDirType};
use drover_core::domain::payload::{ConfigPayload, ProxyConfig, RegistryNamespace};
use drover_core::subtask::{
    CacheSettings, DockerBuildCtx, FileArchiveCtx, Install, JobCtx, Repository,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReaperInstall {
    pub name: String,
    pub version: String,
    pub download: String,
    pub scripts: Vec<String>,
    pub bin_path: String,
    pub envs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub dir: String,
    pub file: String,
    pub test_report_file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerRegistry {
    pub host: String,
    pub user_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GinkgoTest {
    pub result_path: String,
    pub test_report_path: String,
    pub artifact_paths: Vec<String>,
}

/// Document the reaper executes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaperContext {
    pub workspace: String,
    pub clean_workspace: bool,
    pub ignore_cache: bool,
    pub cache_enable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<Cache>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir_type: Option<CacheDirType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cache_user_dir: String,
    pub proxy: ProxyConfig,
    pub installs: Vec<ReaperInstall>,
    pub repos: Vec<Repository>,
    pub envs: Vec<String>,
    pub secret_envs: Vec<String>,
    pub scripts: Vec<String>,
    pub post_scripts: Vec<String>,
    pub pm_deploy_scripts: Vec<String>,
    pub test_type: String,
    pub archive: Archive,
    pub docker_registry: DockerRegistry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_build_ctx: Option<DockerBuildCtx>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_archive_ctx: Option<FileArchiveCtx>,
    pub caches: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ginkgo_test: Option<GinkgoTest>,
    pub storage_endpoint: String,
    pub storage_bucket: String,
    pub artifact_path: String,
    pub pipeline_name: String,
    pub task_id: i64,
    pub service_name: String,
}

/// Splits a script into lines, accepting any line ending style
pub fn script_lines(script: &str) -> Vec<String> {
    script
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(String::from)
        .collect()
}

/// Assembles the reaper context of one job
pub struct ReaperContextBuilder<'a> {
    pub payload: &'a ConfigPayload,
    pub pipeline_name: &'a str,
    pub task_id: i64,
    pub service_name: &'a str,
    pub workspace: &'a str,
    pub job_ctx: &'a JobCtx,
    pub installs: &'a [Install],
    pub cache: &'a CacheSettings,
    pub archive_file: &'a str,
    pub test_report_file: &'a str,
    pub registry: Option<&'a RegistryNamespace>,
}

impl ReaperContextBuilder<'_> {
    pub fn build(&self) -> ReaperContext {
        let job = self.job_ctx;
        let mut ctx = ReaperContext {
            workspace: self.workspace.to_string(),
            clean_workspace: job.clean_workspace,
            ignore_cache: self.payload.ignore_cache,
            proxy: self.payload.proxy.clone(),
            repos: job.builds.clone(),
            test_type: job.test_type.clone(),
            caches: job.caches.clone(),
            docker_build_ctx: job.docker_build_ctx.clone(),
            file_archive_ctx: job.file_archive_ctx.clone(),
            artifact_path: job.artifact_path.clone(),
            pipeline_name: self.pipeline_name.to_string(),
            task_id: self.task_id,
            service_name: self.service_name.to_string(),
            ..Default::default()
        };

        if self.cache.cache_enable && !self.payload.reset_cache {
            ctx.cache_enable = true;
            ctx.cache = Some(self.cache.cache.clone());
            ctx.cache_dir_type = Some(self.cache.cache_dir_type);
            ctx.cache_user_dir = self.cache.cache_user_dir.clone();
        }

        ctx.installs = self
            .installs
            .iter()
            .map(|install| ReaperInstall {
                name: install.name.clone(),
                version: install.version.clone(),
                download: install.download.clone(),
                scripts: script_lines(&install.scripts),
                bin_path: install.bin_path.clone(),
                envs: install.envs.clone(),
            })
            .collect();

        for env in &job.env_vars {
            let line = format!("{}={}", env.key, env.value);
            if env.is_credential {
                ctx.secret_envs.push(line);
            } else {
                ctx.envs.push(line);
            }
        }

        ctx.scripts = job
            .build_steps
            .iter()
            .filter(|step| !step.scripts.is_empty())
            .flat_map(|step| script_lines(&step.scripts))
            .collect();
        if !job.post_scripts.is_empty() {
            ctx.post_scripts = script_lines(&job.post_scripts);
        }
        if !job.pm_deploy_scripts.is_empty() {
            ctx.pm_deploy_scripts = script_lines(&job.pm_deploy_scripts);
        }

        ctx.archive = Archive {
            dir: format!("{}/dist", self.workspace.trim_end_matches('/')),
            file: self.archive_file.to_string(),
            test_report_file: self.test_report_file.to_string(),
        };

        if let Some(reg) = self.registry {
            ctx.docker_registry = DockerRegistry {
                host: reg.reg_addr.clone(),
                user_name: reg.access_key.clone(),
                password: reg.secret_key.clone(),
            };
        }

        if !job.test_result_path.is_empty() {
            ctx.ginkgo_test = Some(GinkgoTest {
                result_path: job.test_result_path.clone(),
                test_report_path: job.test_report_path.clone(),
                artifact_paths: job
                    .artifact_path
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect(),
            });
        }

        if let Some(s3) = &self.payload.s3 {
            ctx.storage_endpoint = s3.endpoint.clone();
            ctx.storage_bucket = s3.bucket.clone();
        }

        ctx
    }

    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(&self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::domain::cache::CacheMedium;
    use drover_core::domain::payload::S3Storage;
    use drover_core::subtask::{BuildStep, KeyVal};

    fn job_ctx() -> JobCtx {
        JobCtx {
            env_vars: vec![
                KeyVal::new("ENV_NAME", "dev"),
                KeyVal {
                    key: "TOKEN".to_string(),
                    value: "s3cr3t".to_string(),
                    is_credential: true,
                },
            ],
            builds: vec![Repository {
                repo_name: "api".to_string(),
                branch: "main".to_string(),
                ..Default::default()
            }],
            build_steps: vec![
                BuildStep {
                    build_type: "shell".to_string(),
                    scripts: "make\r\nmake test".to_string(),
                },
                BuildStep::default(),
            ],
            post_scripts: "echo done".to_string(),
            test_result_path: "reports".to_string(),
            artifact_path: "out/a, out/b".to_string(),
            ..Default::default()
        }
    }

    fn builder<'a>(
        payload: &'a ConfigPayload,
        job_ctx: &'a JobCtx,
        cache: &'a CacheSettings,
        installs: &'a [Install],
    ) -> ReaperContextBuilder<'a> {
        ReaperContextBuilder {
            payload,
            pipeline_name: "demo",
            task_id: 3,
            service_name: "api",
            workspace: "/workspace",
            job_ctx,
            installs,
            cache,
            archive_file: "api-3.tar.gz",
            test_report_file: "",
            registry: None,
        }
    }

    #[test]
    fn test_envs_scripts_and_tests() {
        let payload = ConfigPayload {
            s3: Some(S3Storage {
                endpoint: "s3.example.com".to_string(),
                bucket: "ci".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let job = job_ctx();
        let cache = CacheSettings::default();
        let installs = vec![Install {
            name: "go".to_string(),
            version: "1.22".to_string(),
            scripts: "tar xf go.tgz\rmv go /usr/local".to_string(),
            ..Default::default()
        }];

        let ctx = builder(&payload, &job, &cache, &installs).build();
        assert_eq!(ctx.envs, vec!["ENV_NAME=dev"]);
        assert_eq!(ctx.secret_envs, vec!["TOKEN=s3cr3t"]);
        assert_eq!(ctx.scripts, vec!["make", "make test"]);
        assert_eq!(ctx.post_scripts, vec!["echo done"]);
        assert!(ctx.pm_deploy_scripts.is_empty());
        assert_eq!(ctx.installs[0].scripts, vec!["tar xf go.tgz", "mv go /usr/local"]);
        assert_eq!(ctx.archive.dir, "/workspace/dist");
        assert_eq!(ctx.storage_bucket, "ci");

        let ginkgo = ctx.ginkgo_test.unwrap();
        assert_eq!(ginkgo.artifact_paths, vec!["out/a", "out/b"]);
    }

    #[test]
    fn test_reset_cache_disables_cache() {
        let mut payload = ConfigPayload::default();
        let job = JobCtx::default();
        let cache = CacheSettings {
            cache: Cache {
                medium_type: Some(CacheMedium::Nfs),
                ..Default::default()
            },
            cache_enable: true,
            ..Default::default()
        };

        let ctx = builder(&payload, &job, &cache, &[]).build();
        assert!(ctx.cache_enable);
        assert!(ctx.cache.is_some());

        payload.reset_cache = true;
        let ctx = builder(&payload, &job, &cache, &[]).build();
        assert!(!ctx.cache_enable);
        assert!(ctx.cache.is_none());
    }

    #[test]
    fn test_yaml_document() {
        let payload = ConfigPayload::default();
        let job = job_ctx();
        let cache = CacheSettings::default();
        let yaml = builder(&payload, &job, &cache, &[]).to_yaml().unwrap();

        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["pipeline_name"].as_str(), Some("demo"));
        assert_eq!(doc["task_id"].as_i64(), Some(3));
        assert_eq!(doc["repos"][0]["repo_name"].as_str(), Some("api"));
        assert!(doc.get("docker_build_ctx").is_none());
    }
}
