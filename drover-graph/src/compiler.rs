//! Compiles build and test definitions into subtasks

use drover_core::consts::{IMAGE_FROM_KODEROVER, LOCAL_CLUSTER_ID, MASK_VALUE};
use drover_core::subtask::{
    BuildStep, BuildTask, CacheSettings, DockerBuildCtx, FileArchiveCtx, JenkinsBuildArgs,
    JenkinsBuildTask, JobCtx, JobRuntime, KeyVal, Repository, TaskCommon, TestingTask,
};
use drover_core::SubTask;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::{BuildModule, Catalog, PreBuild, ProductEnv};
use crate::error::Result;

/// One build module invocation of a target
#[derive(Debug, Clone, Default)]
pub struct BuildModuleArgs<'a> {
    /// Module name
    pub target: &'a str,
    pub service_name: &'a str,
    pub product_name: &'a str,
    /// User overrides of the module's environment variables
    pub variables: &'a [KeyVal],
    pub env: Option<&'a ProductEnv>,
    /// Compile into `artifact_deploy` subtasks instead of `buildv2`
    pub artifact_deploy: bool,
}

/// Test module requested for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestArgs {
    pub test_module_name: String,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub builds: Vec<Repository>,
}

/// Builds one subtask per build module of the target
pub async fn build_module_to_subtasks(
    catalog: &dyn Catalog,
    args: &BuildModuleArgs<'_>,
) -> Result<Vec<SubTask>> {
    let modules = catalog
        .build_modules(args.product_name, args.service_name, args.target)
        .await?;
    if modules.is_empty() {
        warn!(
            "No build module for {}/{} in {}",
            args.target, args.service_name, args.product_name
        );
    }

    let mut sub_tasks = Vec::with_capacity(modules.len());
    for module in &modules {
        let build = compile_build_module(catalog, module, args).await?;
        sub_tasks.push(if args.artifact_deploy {
            SubTask::ArtifactDeploy(build)
        } else {
            SubTask::Build(build)
        });
    }
    Ok(sub_tasks)
}

async fn compile_build_module(
    catalog: &dyn Catalog,
    module: &BuildModule,
    args: &BuildModuleArgs<'_>,
) -> Result<BuildTask> {
    let pre = &module.pre_build;
    let runtime = job_runtime(catalog, pre).await?;

    let cluster = catalog.cluster(&runtime.cluster_id).await?;
    // A cluster without a cache medium has nothing to mount.
    let cache = if cluster.cache.is_configured() {
        CacheSettings {
            cache: cluster.cache,
            cache_enable: module.cache_enable,
            cache_dir_type: module.cache_dir_type,
            cache_user_dir: module.cache_user_dir.clone(),
        }
    } else {
        CacheSettings {
            cache: cluster.cache,
            cache_enable: false,
            ..Default::default()
        }
    };

    let mut build_steps = Vec::new();
    if !module.scripts.is_empty() {
        build_steps.push(BuildStep {
            build_type: "shell".to_string(),
            scripts: module.scripts.clone(),
        });
    }

    let post = module.post_build.clone().unwrap_or_default();
    let job_ctx = JobCtx {
        env_vars: override_envs(&pre.envs, args.variables),
        builds: module.repos.clone(),
        build_steps,
        docker_build_ctx: post.docker_build.map(|d| DockerBuildCtx {
            work_dir: d.work_dir,
            docker_file: d.docker_file,
            build_args: d.build_args,
            image_name: String::new(),
        }),
        file_archive_ctx: post.file_location.map(|file_location| FileArchiveCtx {
            file_location,
            file_name: String::new(),
        }),
        post_scripts: post.scripts,
        pm_deploy_scripts: module.pm_deploy_scripts.clone(),
        caches: module.caches.clone(),
        upload_pkg: pre.upload_pkg,
        clean_workspace: pre.clean_workspace,
        enable_proxy: pre.enable_proxy,
        ..Default::default()
    };

    debug!(
        "Compiled build module {} for {}/{}",
        module.name, args.target, args.service_name
    );

    Ok(BuildTask {
        common: TaskCommon {
            timeout: module.timeout,
            ..TaskCommon::enabled()
        },
        service_name: args.target.to_string(),
        service: args.service_name.to_string(),
        product_name: args.product_name.to_string(),
        env_name: args.env.map(|e| e.env_name.clone()).unwrap_or_default(),
        runtime,
        install_ctx: pre.installs.clone(),
        job_ctx,
        cache,
        ..Default::default()
    })
}

/// Image, resources and cluster of a job definition
async fn job_runtime(catalog: &dyn Catalog, pre: &PreBuild) -> Result<JobRuntime> {
    let mut build_os = pre.build_os.clone();
    // Custom base images can be renamed after the module was saved.
    if !pre.image_id.is_empty() {
        match catalog.basic_image(&pre.image_id).await {
            Ok(Some(image)) => build_os = image,
            Ok(None) => warn!("Basic image {} not found", pre.image_id),
            Err(e) => warn!("Failed to look up basic image {}: {}", pre.image_id, e),
        }
    }

    Ok(JobRuntime {
        build_os,
        image_from: if pre.image_from.is_empty() {
            IMAGE_FROM_KODEROVER.to_string()
        } else {
            pre.image_from.clone()
        },
        image_id: pre.image_id.clone(),
        res_req: pre.res_req,
        res_req_spec: pre.res_req_spec,
        cluster_id: if pre.cluster_id.is_empty() {
            LOCAL_CLUSTER_ID.to_string()
        } else {
            pre.cluster_id.clone()
        },
    })
}

/// Applies user overrides to declared variables; masked values keep the
/// declared value
fn override_envs(declared: &[KeyVal], overrides: &[KeyVal]) -> Vec<KeyVal> {
    declared
        .iter()
        .map(|env| {
            match overrides
                .iter()
                .find(|o| o.key == env.key && o.value != MASK_VALUE)
            {
                Some(o) => KeyVal {
                    key: env.key.clone(),
                    value: o.value.clone(),
                    is_credential: o.is_credential,
                },
                None => env.clone(),
            }
        })
        .collect()
}

/// A target built by an external Jenkins job
pub fn jenkins_build_to_subtasks(
    target: &str,
    service_name: &str,
    jenkins_build_args: &JenkinsBuildArgs,
) -> Vec<SubTask> {
    vec![SubTask::JenkinsBuild(JenkinsBuildTask {
        common: TaskCommon::enabled(),
        service_name: target.to_string(),
        service: service_name.to_string(),
        image: String::new(),
        jenkins_build_args: jenkins_build_args.clone(),
    })]
}

/// Builds the testing subtasks of a run
///
/// `services` lists the services the run builds; it is exported to the test
/// job as `SERVICES`.
pub async fn test_args_to_subtasks(
    catalog: &dyn Catalog,
    tests: &[TestArgs],
    services: &[String],
) -> Result<Vec<TestingTask>> {
    let mut resp = Vec::with_capacity(tests.len());
    for test in tests {
        let module = catalog.test_module(&test.test_module_name).await?;
        let pre = module.pre_test.clone().unwrap_or_default();

        let mut env_vars = override_envs(&pre.envs, &test.envs);
        env_vars.push(KeyVal::new("SERVICES", services.join(",")));

        let mut builds = module.repos.clone();
        apply_build_args(&mut builds, &test.builds);

        let job_ctx = JobCtx {
            env_vars,
            builds,
            build_steps: vec![BuildStep {
                build_type: "shell".to_string(),
                scripts: module.scripts.clone(),
            }],
            test_type: module.test_type.clone(),
            test_result_path: module.test_result_path.clone(),
            test_report_path: module.test_report_path.clone(),
            artifact_path: module.artifact_path.clone(),
            caches: module.caches.clone(),
            clean_workspace: pre.clean_workspace,
            enable_proxy: pre.enable_proxy,
            ..Default::default()
        };

        resp.push(TestingTask {
            common: TaskCommon {
                timeout: module.timeout,
                ..TaskCommon::enabled()
            },
            test_name: "test".to_string(),
            test_module_name: module.name.clone(),
            runtime: job_runtime(catalog, &pre).await?,
            install_ctx: pre.installs.clone(),
            job_ctx,
            namespace: pre.namespace.clone(),
            ..Default::default()
        });
    }
    Ok(resp)
}

/// Points declared checkouts at the refs requested for this run
///
/// Repositories are matched by name, and by owner when both sides name one.
pub fn apply_build_args(builds: &mut [Repository], args: &[Repository]) {
    for repo in builds.iter_mut() {
        let Some(arg) = args.iter().find(|a| {
            a.repo_name == repo.repo_name
                && (a.repo_owner.is_empty()
                    || repo.repo_owner.is_empty()
                    || a.repo_owner == repo.repo_owner)
        }) else {
            continue;
        };
        if !arg.branch.is_empty() {
            repo.branch = arg.branch.clone();
        }
        if !arg.tag.is_empty() {
            repo.tag = arg.tag.clone();
        }
        if arg.pr > 0 {
            repo.pr = arg.pr;
        }
        if !arg.commit_id.is_empty() {
            repo.commit_id = arg.commit_id.clone();
        }
    }
}
