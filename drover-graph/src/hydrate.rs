//! Subtask hydration
//!
//! Freshly compiled subtasks only hold what the templates know. Hydration
//! fills the values that exist once a run is requested: candidate image and
//! package names, registries, generated variables, the image currently
//! deployed and the creator's permission to deploy.
//!
//! Hydrating an already hydrated subtask leaves it unchanged, so restarted
//! runs can go through the same path.

use drover_core::consts::{CRON_TASK_CREATOR, WEBHOOK_TASK_CREATOR};
use drover_core::domain::payload::{ConfigPayload, RegistryNamespace};
use drover_core::image::{registry_image, replace_repo, trim_url_scheme};
use drover_core::subtask::{
    ArtifactTask, BuildTask, DeployTask, DistributeToS3Task, DockerBuildStatus, DockerBuildTask,
    JenkinsBuildTask, KeyVal, ReleaseImageTask, RepoImage, Repository, ServiceInfo, upsert_env,
};
use drover_core::SubTask;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::compiler::apply_build_args;
use crate::error::{BuildError, Result};

/// Run-level facts every subtask of a target is hydrated against
#[derive(Debug, Clone, Default)]
pub struct TaskOpt<'a> {
    pub task_id: i64,
    pub pipeline_name: &'a str,
    pub product_name: &'a str,
    pub env_name: &'a str,
    /// Namespace deploys go to
    pub namespace: &'a str,
    pub task_creator: &'a str,
    /// Service of the target
    pub service_name: &'a str,
    /// Refs requested for the run's repositories
    pub builds: &'a [Repository],
    /// Deploy container names carry a `_service` suffix
    pub is_workflow_task: bool,
}

impl TaskOpt<'_> {
    /// Webhook and timer runs act with system authority
    fn is_bot(&self) -> bool {
        self.task_creator == WEBHOOK_TASK_CREATOR || self.task_creator == CRON_TASK_CREATOR
    }
}

/// What earlier subtasks of a target hand to later ones
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetContext {
    /// Image produced or delivered by the target
    pub image: String,
    pub package_file: String,
    /// Variables of the target's build, used to render docker builds
    pub build_envs: Vec<KeyVal>,
    /// Build module the run is named after in logs
    pub service_name: String,
}

/// Hydrates the subtasks of one target in order
///
/// Subtasks must already be sorted: deploys read the image a build chose.
/// Built services are appended to `service_infos` for the extension stage.
pub async fn hydrate_subtasks(
    catalog: &dyn Catalog,
    opt: &TaskOpt<'_>,
    payload: &ConfigPayload,
    sub_tasks: &mut [SubTask],
    service_infos: &mut Vec<ServiceInfo>,
) -> Result<TargetContext> {
    let mut ctx = TargetContext::default();
    for sub_task in sub_tasks.iter_mut() {
        if !sub_task.is_enabled() {
            continue;
        }
        match sub_task {
            SubTask::Build(t) | SubTask::BuildV3(t) | SubTask::ArtifactDeploy(t) => {
                hydrate_build(opt, payload, t, &mut ctx, service_infos)?
            }
            SubTask::JenkinsBuild(t) => hydrate_jenkins_build(t, &mut ctx)?,
            SubTask::Artifact(t) => hydrate_artifact(payload, t, &mut ctx)?,
            SubTask::DockerBuild(t) => hydrate_docker_build(payload, t, &ctx),
            SubTask::Testing(t) => {
                apply_build_args(&mut t.job_ctx.builds, opt.builds);
                if ctx.service_name.is_empty() {
                    ctx.service_name = t.test_name.clone();
                }
            }
            SubTask::ResetImage(t) => hydrate_reset_image(catalog, opt, t).await?,
            SubTask::Deploy(t) => hydrate_deploy(catalog, opt, t, &ctx).await?,
            SubTask::DistributeToS3(t) => hydrate_distribute(opt, payload, t, &ctx)?,
            SubTask::ReleaseImage(t) => hydrate_release_image(payload, t, &ctx)?,
            SubTask::Jira(t) => apply_build_args(&mut t.builds, opt.builds),
            SubTask::Security(t) => t.image_name = ctx.image.clone(),
            SubTask::Trigger(_) | SubTask::Extension(_) => {}
        }
    }
    Ok(ctx)
}

fn active_registry(payload: &ConfigPayload) -> Result<&RegistryNamespace> {
    payload
        .registry_or_default(&payload.registry_id)
        .ok_or_else(|| BuildError::not_found("registry", payload.registry_id.clone()))
}

fn hydrate_build(
    opt: &TaskOpt<'_>,
    payload: &ConfigPayload,
    t: &mut BuildTask,
    ctx: &mut TargetContext,
    service_infos: &mut Vec<ServiceInfo>,
) -> Result<()> {
    // Workflow runs rename the module to `module_service`; a second pass
    // must see through that.
    let suffix = format!("_{}", t.service);
    let module = match t.service_name.strip_suffix(suffix.as_str()) {
        Some(module) if !t.service.is_empty() => module.to_string(),
        _ => t.service_name.clone(),
    };

    apply_build_args(&mut t.job_ctx.builds, opt.builds);

    let reg = active_registry(payload)?;
    let candidate = candidate_tag(opt.task_id, opt.product_name, opt.env_name, &t.job_ctx.builds);
    t.job_ctx.image = registry_image(reg, &format!("{}:{}", module, candidate));
    t.job_ctx.package_file = format!("{}-{}.tar.gz", module, candidate);

    for env in task_envs(opt, &module, &t.job_ctx.image, &t.job_ctx.package_file, &t.job_ctx.builds) {
        upsert_env(&mut t.job_ctx.env_vars, env);
    }

    if let Some(docker) = t.job_ctx.docker_build_ctx.as_mut() {
        docker.image_name = t.job_ctx.image.clone();
    }
    if let Some(archive) = t.job_ctx.file_archive_ctx.as_mut() {
        archive.file_name = t.job_ctx.package_file.clone();
    }

    let registry_repo = if reg.is_aws() {
        reg.reg_addr.clone()
    } else {
        format!("{}/{}", reg.reg_addr, reg.namespace)
    };
    let status = t
        .docker_build_status
        .as_ref()
        .map(|s| s.status)
        .unwrap_or_default();
    t.docker_build_status = Some(DockerBuildStatus {
        image_name: t.job_ctx.image.clone(),
        registry_repo,
        status,
    });

    if !opt.service_name.is_empty()
        && !service_infos
            .iter()
            .any(|s| s.service_name == opt.service_name && s.service_module == module)
    {
        service_infos.push(ServiceInfo {
            service_name: opt.service_name.to_string(),
            service_module: module.clone(),
            image: t.job_ctx.image.clone(),
        });
    }

    if opt.is_workflow_task && !t.service.is_empty() {
        t.service_name = format!("{}_{}", module, t.service);
    }

    debug!("Build {} will produce {}", module, t.job_ctx.image);
    ctx.image = t.job_ctx.image.clone();
    ctx.package_file = t.job_ctx.package_file.clone();
    ctx.build_envs = t.job_ctx.env_vars.clone();
    ctx.service_name = module;
    Ok(())
}

/// Tag suffix of the images and packages a run produces
///
/// Only characters valid in an image tag are kept.
pub fn candidate_tag(task_id: i64, product: &str, env: &str, builds: &[Repository]) -> String {
    let reference = builds.first().map(|r| r.ref_name()).unwrap_or_default();
    let mut parts = vec![task_id.to_string()];
    parts.extend(
        [product, env, reference.as_str()]
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(str::to_string),
    );
    let tag: String = parts
        .join("-")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    tag.chars().take(128).collect()
}

/// Variables generated for every build job
fn task_envs(
    opt: &TaskOpt<'_>,
    module: &str,
    image: &str,
    package_file: &str,
    builds: &[Repository],
) -> Vec<KeyVal> {
    let mut envs = vec![
        KeyVal::new("TASK_ID", opt.task_id.to_string()),
        KeyVal::new("ENV_NAME", opt.env_name),
        KeyVal::new("SERVICE", module),
        KeyVal::new("IMAGE", image),
        KeyVal::new("PKG_FILE", package_file),
    ];
    envs.extend(repo_envs(builds));
    envs
}

/// `<REPO>_BRANCH`, `_TAG`, `_PR` and `_COMMIT_ID` of each checkout
pub fn repo_envs(builds: &[Repository]) -> Vec<KeyVal> {
    let mut envs = Vec::new();
    for repo in builds {
        let prefix = repo.env_prefix();
        if !repo.branch.is_empty() {
            envs.push(KeyVal::new(format!("{}_BRANCH", prefix), &repo.branch));
        }
        if !repo.tag.is_empty() {
            envs.push(KeyVal::new(format!("{}_TAG", prefix), &repo.tag));
        }
        if repo.pr > 0 {
            envs.push(KeyVal::new(format!("{}_PR", prefix), repo.pr.to_string()));
        }
        if !repo.commit_id.is_empty() {
            envs.push(KeyVal::new(format!("{}_COMMIT_ID", prefix), &repo.commit_id));
        }
    }
    envs
}

fn hydrate_jenkins_build(t: &mut JenkinsBuildTask, ctx: &mut TargetContext) -> Result<()> {
    let image = match t.jenkins_build_args.image_param() {
        Some(image) if image.contains(':') => image.to_string(),
        _ => return Err(BuildError::ImageIllegal),
    };
    t.image = image.clone();
    ctx.image = image;
    Ok(())
}

fn hydrate_artifact(
    payload: &ConfigPayload,
    t: &mut ArtifactTask,
    ctx: &mut TargetContext,
) -> Result<()> {
    if !t.image.contains(':') {
        return Err(BuildError::ImageIllegal);
    }
    let reg = active_registry(payload)?;
    let host = trim_url_scheme(&reg.reg_addr);
    let prefix = if reg.is_aws() || reg.namespace.is_empty() {
        format!("{}/", host)
    } else {
        format!("{}/{}/", host, reg.namespace)
    };
    if !t.image.starts_with(&prefix) {
        t.image = format!("{}{}", prefix, t.image);
    }
    t.registry_id = reg.id.clone();
    ctx.image = t.image.clone();
    Ok(())
}

fn hydrate_docker_build(payload: &ConfigPayload, t: &mut DockerBuildTask, ctx: &TargetContext) {
    t.image = ctx.image.clone();
    for env in ctx.build_envs.iter().filter(|e| !e.is_credential) {
        let placeholder = format!("${}", env.key);
        t.docker_file = t.docker_file.replace(&placeholder, &env.value);
        t.work_dir = t.work_dir.replace(&placeholder, &env.value);
        t.build_args = t.build_args.replace(&placeholder, &env.value);
    }
    if t.registry_id.is_empty() {
        t.registry_id = payload.registry_id.clone();
    }
}

async fn validate_container(
    catalog: &dyn Catalog,
    t: &DeployTask,
    container: &str,
) -> Result<String> {
    catalog
        .container_image(&t.product_name, &t.env_name, &t.service_name, container)
        .await?
        .ok_or_else(|| BuildError::ContainerNotFound {
            product: t.product_name.clone(),
            env: t.env_name.clone(),
            service: t.service_name.clone(),
            container: container.to_string(),
        })
}

async fn hydrate_reset_image(
    catalog: &dyn Catalog,
    opt: &TaskOpt<'_>,
    t: &mut DeployTask,
) -> Result<()> {
    if !opt.namespace.is_empty() {
        t.namespace = opt.namespace.to_string();
    }
    let container = t.bare_container_name().to_string();
    t.image = validate_container(catalog, t, &container).await?;
    Ok(())
}

async fn hydrate_deploy(
    catalog: &dyn Catalog,
    opt: &TaskOpt<'_>,
    t: &mut DeployTask,
    ctx: &TargetContext,
) -> Result<()> {
    t.image = ctx.image.clone();
    if !opt.namespace.is_empty() {
        t.namespace = opt.namespace.to_string();
    }

    let container = if opt.is_workflow_task {
        t.bare_container_name().to_string()
    } else {
        t.container_name.clone()
    };
    validate_container(catalog, t, &container).await?;

    if opt.is_bot()
        || catalog
            .can_deploy(opt.task_creator, opt.product_name, &t.namespace)
            .await?
    {
        info!(
            "Deploy permission granted. product:{}, namespace:{}, creator:{}",
            opt.product_name, t.namespace, opt.task_creator
        );
        Ok(())
    } else {
        Err(BuildError::PermissionDenied {
            creator: opt.task_creator.to_string(),
            product: opt.product_name.to_string(),
            namespace: t.namespace.clone(),
        })
    }
}

fn hydrate_distribute(
    opt: &TaskOpt<'_>,
    payload: &ConfigPayload,
    t: &mut DistributeToS3Task,
    ctx: &TargetContext,
) -> Result<()> {
    t.package_file = ctx.package_file.clone();
    t.product_name = opt.product_name.to_string();
    t.service_name = ctx.service_name.clone();
    if t.dest_storage_url.is_empty() {
        let storage = payload.s3.as_ref().ok_or_else(|| {
            BuildError::InvalidRequest("default storage is required by distribute task".to_string())
        })?;
        t.dest_storage_url = format!(
            "{}/{}",
            storage.endpoint.trim_end_matches('/'),
            storage.bucket
        );
    }
    Ok(())
}

fn hydrate_release_image(
    payload: &ConfigPayload,
    t: &mut ReleaseImageTask,
    ctx: &TargetContext,
) -> Result<()> {
    t.image_test = ctx.image.clone();

    if t.releases.is_empty() {
        t.releases = payload
            .registries
            .iter()
            .filter(|r| r.namespace == t.image_repo)
            .map(|r| RepoImage {
                repo_id: r.id.clone(),
                ..Default::default()
            })
            .collect();
        if t.releases.is_empty() {
            return Err(BuildError::ReleaseRepoNotFound(t.image_repo.clone()));
        }
    }

    t.releases = t
        .releases
        .iter()
        .filter_map(|release| {
            let reg = payload.registry(&release.repo_id)?;
            Some(RepoImage {
                repo_id: release.repo_id.clone(),
                name: replace_repo(&ctx.image, &reg.reg_addr, &reg.namespace),
                host: trim_url_scheme(&reg.reg_addr),
                namespace: reg.namespace.clone(),
            })
        })
        .collect();

    match t.releases.first() {
        Some(first) => t.image_release = first.name.clone(),
        None => t.common.enabled = false,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DeployGrant, InMemoryCatalog, ProductEnv, ProductService, ServiceContainer};
    use drover_core::consts::REGISTRY_PROVIDER_AWS;
    use drover_core::subtask::{
        DockerBuildCtx, JenkinsBuildArgs, JenkinsBuildParam, JobCtx, SecurityTask, TaskCommon,
    };

    fn payload() -> ConfigPayload {
        ConfigPayload {
            registries: vec![
                RegistryNamespace {
                    id: "reg-1".to_string(),
                    reg_addr: "https://hub.example.com".to_string(),
                    namespace: "team".to_string(),
                    is_default: true,
                    ..Default::default()
                },
                RegistryNamespace {
                    id: "reg-2".to_string(),
                    reg_addr: "https://prod.example.com".to_string(),
                    namespace: "release".to_string(),
                    ..Default::default()
                },
            ],
            registry_id: "reg-1".to_string(),
            ..Default::default()
        }
    }

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog {
            envs: vec![ProductEnv {
                product_name: "demo".to_string(),
                env_name: "dev".to_string(),
                namespace: "demo-dev".to_string(),
                services: vec![vec![ProductService {
                    service_name: "web".to_string(),
                    containers: vec![ServiceContainer {
                        name: "api".to_string(),
                        image: "hub.example.com/team/api:old".to_string(),
                    }],
                    ..Default::default()
                }]],
                ..Default::default()
            }],
            grants: vec![DeployGrant {
                user: "alice".to_string(),
                product: "demo".to_string(),
                namespace: "*".to_string(),
            }],
            ..Default::default()
        }
    }

    fn opt<'a>(creator: &'a str) -> TaskOpt<'a> {
        TaskOpt {
            task_id: 7,
            pipeline_name: "wf",
            product_name: "demo",
            env_name: "dev",
            namespace: "demo-dev",
            task_creator: creator,
            service_name: "web",
            builds: &[],
            is_workflow_task: true,
        }
    }

    fn build() -> SubTask {
        SubTask::Build(BuildTask {
            common: TaskCommon::enabled(),
            service_name: "api".to_string(),
            service: "web".to_string(),
            job_ctx: JobCtx {
                builds: vec![Repository {
                    repo_name: "api-server".to_string(),
                    branch: "main".to_string(),
                    ..Default::default()
                }],
                docker_build_ctx: Some(DockerBuildCtx::default()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn deploy(container: &str) -> SubTask {
        SubTask::Deploy(DeployTask {
            common: TaskCommon::enabled(),
            product_name: "demo".to_string(),
            env_name: "dev".to_string(),
            service_name: "web".to_string(),
            container_name: container.to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_build_then_deploy_shares_image() {
        let catalog = catalog();
        let mut sub_tasks = vec![build(), deploy("api_web")];
        let mut infos = Vec::new();

        let ctx = hydrate_subtasks(&catalog, &opt("alice"), &payload(), &mut sub_tasks, &mut infos)
            .await
            .unwrap();

        let build = sub_tasks[0].as_typed::<BuildTask>().unwrap();
        assert_eq!(build.job_ctx.image, "hub.example.com/team/api:7-demo-dev-main");
        assert_eq!(build.job_ctx.package_file, "api-7-demo-dev-main.tar.gz");
        assert_eq!(build.service_name, "api_web");
        let status = build.docker_build_status.as_ref().unwrap();
        assert_eq!(status.registry_repo, "https://hub.example.com/team");
        assert!(build
            .job_ctx
            .env_vars
            .contains(&KeyVal::new("api_server_BRANCH", "main")));
        assert_eq!(
            build.job_ctx.docker_build_ctx.as_ref().unwrap().image_name,
            build.job_ctx.image
        );

        let deploy = sub_tasks[1].as_typed::<DeployTask>().unwrap();
        assert_eq!(deploy.image, ctx.image);
        assert_eq!(deploy.namespace, "demo-dev");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].service_module, "api");
    }

    #[tokio::test]
    async fn test_hydration_is_idempotent() {
        let catalog = catalog();
        let mut sub_tasks = vec![build(), deploy("api_web")];
        let mut infos = Vec::new();
        hydrate_subtasks(&catalog, &opt("alice"), &payload(), &mut sub_tasks, &mut infos)
            .await
            .unwrap();
        let once = sub_tasks.clone();

        hydrate_subtasks(&catalog, &opt("alice"), &payload(), &mut sub_tasks, &mut infos)
            .await
            .unwrap();

        assert_eq!(sub_tasks, once);
        assert_eq!(infos.len(), 1);
    }

    #[tokio::test]
    async fn test_aws_registry_repo_omits_namespace() {
        let mut payload = payload();
        payload.registries[0].reg_provider = REGISTRY_PROVIDER_AWS.to_string();
        let mut sub_tasks = vec![build()];

        hydrate_subtasks(&catalog(), &opt("alice"), &payload, &mut sub_tasks, &mut Vec::new())
            .await
            .unwrap();

        let build = sub_tasks[0].as_typed::<BuildTask>().unwrap();
        assert_eq!(
            build.docker_build_status.as_ref().unwrap().registry_repo,
            "https://hub.example.com"
        );
    }

    #[tokio::test]
    async fn test_missing_container_is_typed_error() {
        let mut sub_tasks = vec![build(), deploy("worker_web")];
        let err = hydrate_subtasks(&catalog(), &opt("alice"), &payload(), &mut sub_tasks, &mut Vec::new())
            .await
            .unwrap_err();

        match err {
            BuildError::ContainerNotFound {
                product,
                env,
                service,
                container,
            } => {
                assert_eq!((product.as_str(), env.as_str()), ("demo", "dev"));
                assert_eq!((service.as_str(), container.as_str()), ("web", "worker"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_permission_checked_for_users_not_bots() {
        let catalog = catalog();
        let mut sub_tasks = vec![build(), deploy("api_web")];
        let err = hydrate_subtasks(&catalog, &opt("mallory"), &payload(), &mut sub_tasks, &mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::PermissionDenied { .. }));

        for bot in [WEBHOOK_TASK_CREATOR, CRON_TASK_CREATOR] {
            let mut sub_tasks = vec![build(), deploy("api_web")];
            hydrate_subtasks(&catalog, &opt(bot), &payload(), &mut sub_tasks, &mut Vec::new())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_reset_image_records_running_image() {
        let mut sub_tasks = vec![SubTask::ResetImage(DeployTask {
            common: TaskCommon::enabled(),
            product_name: "demo".to_string(),
            env_name: "dev".to_string(),
            service_name: "web".to_string(),
            container_name: "api".to_string(),
            skip_waiting: true,
            ..Default::default()
        })];

        hydrate_subtasks(&catalog(), &opt("alice"), &payload(), &mut sub_tasks, &mut Vec::new())
            .await
            .unwrap();

        let reset = sub_tasks[0].as_typed::<DeployTask>().unwrap();
        assert_eq!(reset.image, "hub.example.com/team/api:old");
    }

    #[tokio::test]
    async fn test_jenkins_image_must_have_tag() {
        let jenkins = |value: &str| {
            SubTask::JenkinsBuild(JenkinsBuildTask {
                common: TaskCommon::enabled(),
                service_name: "api".to_string(),
                jenkins_build_args: JenkinsBuildArgs {
                    job_name: "api".to_string(),
                    build_params: vec![JenkinsBuildParam {
                        name: "IMAGE".to_string(),
                        value: serde_json::json!(value),
                    }],
                },
                ..Default::default()
            })
        };

        let mut bad = vec![jenkins("hub.example.com/team/api")];
        let err = hydrate_subtasks(&catalog(), &opt("alice"), &payload(), &mut bad, &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.is_image_illegal());

        let mut good = vec![
            jenkins("hub.example.com/team/api:1.0"),
            SubTask::Security(SecurityTask {
                common: TaskCommon::enabled(),
                ..Default::default()
            }),
        ];
        hydrate_subtasks(&catalog(), &opt("alice"), &payload(), &mut good, &mut Vec::new())
            .await
            .unwrap();
        let security = good[1].as_typed::<SecurityTask>().unwrap();
        assert_eq!(security.image_name, "hub.example.com/team/api:1.0");
    }

    #[tokio::test]
    async fn test_artifact_image_gets_registry_prefix_once() {
        let mut sub_tasks = vec![SubTask::Artifact(ArtifactTask {
            common: TaskCommon::enabled(),
            service_name: "api".to_string(),
            image: "api:1.0".to_string(),
            registry_id: String::new(),
        })];
        for _ in 0..2 {
            hydrate_subtasks(&catalog(), &opt("alice"), &payload(), &mut sub_tasks, &mut Vec::new())
                .await
                .unwrap();
        }
        let artifact = sub_tasks[0].as_typed::<ArtifactTask>().unwrap();
        assert_eq!(artifact.image, "hub.example.com/team/api:1.0");
        assert_eq!(artifact.registry_id, "reg-1");
    }

    #[tokio::test]
    async fn test_docker_build_renders_plain_envs_only() {
        let mut sub_tasks = vec![
            build(),
            SubTask::DockerBuild(DockerBuildTask {
                common: TaskCommon::enabled(),
                service_name: "api".to_string(),
                docker_file: "$SERVICE/Dockerfile".to_string(),
                build_args: "--build-arg T=$TASK_ID".to_string(),
                ..Default::default()
            }),
        ];

        hydrate_subtasks(&catalog(), &opt("alice"), &payload(), &mut sub_tasks, &mut Vec::new())
            .await
            .unwrap();

        let docker = sub_tasks[1].as_typed::<DockerBuildTask>().unwrap();
        assert_eq!(docker.docker_file, "api/Dockerfile");
        assert_eq!(docker.build_args, "--build-arg T=7");
        assert_eq!(docker.image, "hub.example.com/team/api:7-demo-dev-main");
    }

    #[tokio::test]
    async fn test_release_image_defaults_to_matching_namespace() {
        let mut sub_tasks = vec![
            build(),
            SubTask::ReleaseImage(ReleaseImageTask {
                common: TaskCommon::enabled(),
                image_repo: "release".to_string(),
                ..Default::default()
            }),
        ];

        hydrate_subtasks(&catalog(), &opt("alice"), &payload(), &mut sub_tasks, &mut Vec::new())
            .await
            .unwrap();

        let release = sub_tasks[1].as_typed::<ReleaseImageTask>().unwrap();
        assert_eq!(release.releases.len(), 1);
        assert_eq!(release.releases[0].host, "prod.example.com");
        assert_eq!(release.image_release, "prod.example.com/release/api:7-demo-dev-main");
        assert!(release.common.enabled);
    }

    #[tokio::test]
    async fn test_release_image_without_known_registry_is_disabled() {
        let mut sub_tasks = vec![SubTask::ReleaseImage(ReleaseImageTask {
            common: TaskCommon::enabled(),
            releases: vec![RepoImage {
                repo_id: "gone".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        })];

        hydrate_subtasks(&catalog(), &opt("alice"), &payload(), &mut sub_tasks, &mut Vec::new())
            .await
            .unwrap();

        assert!(!sub_tasks[0].is_enabled());
    }

    #[test]
    fn test_candidate_tag_is_a_valid_image_tag() {
        let builds = vec![Repository {
            repo_name: "api".to_string(),
            branch: "feature/login".to_string(),
            ..Default::default()
        }];
        assert_eq!(candidate_tag(3, "demo", "", &builds), "3-demo-feature-login");
        assert_eq!(candidate_tag(3, "demo", "dev", &[]), "3-demo-dev");
    }
}
