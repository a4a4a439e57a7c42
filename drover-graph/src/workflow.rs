//! Workflow task creation
//!
//! Turns a workflow run request into a task document: subtasks are compiled
//! per target, hydrated, merged into stages and ordered. Nothing is created
//! on a cluster here.

use chrono::Utc;
use drover_core::consts::{HELM_DEPLOY_TYPE, K8S_DEPLOY_TYPE, PM_DEPLOY_TYPE};
use drover_core::domain::stage::Stage;
use drover_core::domain::target::{DeployEnv, Target};
use drover_core::domain::task::Task;
use drover_core::subtask::{
    ArtifactTask, DeployTask, DistributeToS3Task, JiraTask, ReleaseImageTask, SecurityTask,
    ServiceInfo, TaskCommon, WebhookTask,
};
use drover_core::{SubTask, TaskStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ProductEnv, Workflow};
use crate::compiler::{
    build_module_to_subtasks, jenkins_build_to_subtasks, test_args_to_subtasks, BuildModuleArgs,
    TestArgs,
};
use crate::error::{BuildError, Result};
use crate::hydrate::{hydrate_subtasks, TaskOpt};
use crate::order::{sort_stages, sort_subtasks};
use crate::scheduler::{QueueEntry, QueueState, SchedulerContext};
use crate::stage::add_subtask_to_stage;

/// Stage key of the extension webhook
pub const EXTENSION_KEY: &str = "extension";

/// Request to run a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowTaskArgs {
    pub workflow_name: String,
    pub product_name: String,
    /// Environment to deploy to; several comma-separated environments let the
    /// least busy one be picked
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub tests: Vec<TestArgs>,
    #[serde(default)]
    pub ignore_cache: bool,
    #[serde(default)]
    pub reset_cache: bool,
}

/// A task ready to be queued
#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub task_id: i64,
    pub pipeline_name: String,
    pub task: Task,
}

/// Builds task graphs for workflow runs
pub struct GraphBuilder<'a> {
    catalog: &'a dyn Catalog,
    scheduler: &'a SchedulerContext,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(catalog: &'a dyn Catalog, scheduler: &'a SchedulerContext) -> Self {
        Self { catalog, scheduler }
    }

    /// Creates the task of a workflow run and queues it
    ///
    /// # Errors
    /// Fails on the first target that cannot be compiled or hydrated, and
    /// with [`BuildError::NoSubtasks`] when the run would have no stage.
    pub async fn create_workflow_task(
        &self,
        args: &WorkflowTaskArgs,
        task_creator: &str,
    ) -> Result<CreatedTask> {
        let workflow = self.catalog.workflow(&args.workflow_name).await?;
        let product_name = if args.product_name.is_empty() {
            workflow.product_name.clone()
        } else {
            args.product_name.clone()
        };

        let env_name = self.pick_env(&product_name, &args.namespace);
        let env = match env_name.as_deref() {
            Some(name) => Some(self.catalog.product_env(&product_name, name).await?),
            None => None,
        };

        let mut payload = self.catalog.config_payload().await?;
        payload.registry_id = match env.as_ref().filter(|e| !e.registry_id.is_empty()) {
            Some(env) => env.registry_id.clone(),
            None => payload
                .default_registry()
                .map(|r| r.id.clone())
                .unwrap_or_default(),
        };
        payload.ignore_cache = args.ignore_cache;
        payload.reset_cache = args.reset_cache;

        let task_id = self.catalog.next_task_id(&args.workflow_name).await?;
        let deploy_timeout = match self.catalog.project(&product_name).await {
            Ok(project) => project.timeout,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };

        let namespace = env.as_ref().map(|e| e.namespace.clone()).unwrap_or_default();
        let mut stages: Vec<Stage> = Vec::new();
        let mut service_infos: Vec<ServiceInfo> = Vec::new();

        for target in &args.targets {
            let mut sub_tasks = self
                .target_subtasks(&workflow, target, env.as_ref(), deploy_timeout)
                .await?;
            sort_subtasks(&mut sub_tasks);

            let opt = TaskOpt {
                task_id,
                pipeline_name: &args.workflow_name,
                product_name: &product_name,
                env_name: env_name.as_deref().unwrap_or_default(),
                namespace: &namespace,
                task_creator,
                service_name: &target.service_name,
                builds: &target.build.repos,
                is_workflow_task: true,
            };
            hydrate_subtasks(self.catalog, &opt, &payload, &mut sub_tasks, &mut service_infos)
                .await?;

            for sub_task in sub_tasks {
                add_subtask_to_stage(&mut stages, sub_task, &target.key());
            }
        }

        if let Some(extension) = workflow.extension_stage.as_ref().filter(|e| e.enabled) {
            let webhook = WebhookTask {
                common: TaskCommon {
                    timeout: extension.timeout,
                    ..TaskCommon::enabled()
                },
                url: extension.url.clone(),
                path: extension.path.clone(),
                headers: extension.headers.clone(),
                service_infos: service_infos.clone(),
            };
            add_subtask_to_stage(&mut stages, SubTask::Extension(webhook), EXTENSION_KEY);
        }

        if !args.tests.is_empty() {
            let mut services: Vec<String> = Vec::new();
            for target in &args.targets {
                if !services.contains(&target.service_name) {
                    services.push(target.service_name.clone());
                }
            }
            for test in test_args_to_subtasks(self.catalog, &args.tests, &services).await? {
                let key = test.test_module_name.clone();
                add_subtask_to_stage(&mut stages, SubTask::Testing(test), &key);
            }
        }

        sort_stages(&mut stages);
        if stages.iter().all(|s| s.sub_tasks.is_empty()) {
            return Err(BuildError::NoSubtasks);
        }

        let task = Task {
            task_id,
            pipeline_name: args.workflow_name.clone(),
            pipeline_type: "workflow".to_string(),
            product_name: product_name.clone(),
            env_name: env_name.clone().unwrap_or_default(),
            namespace: namespace.clone(),
            task_creator: task_creator.to_string(),
            status: TaskStatus::Created,
            stages,
            config_payload: payload,
            is_restart: false,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            error: String::new(),
        };

        self.scheduler.enqueue(QueueEntry {
            pipeline_name: task.pipeline_name.clone(),
            task_id,
            product_name,
            namespace: task.env_name.clone(),
            state: QueueState::Queued,
        });
        info!(
            "Created task {}:{} with {} stages",
            task.pipeline_name,
            task_id,
            task.stages.len()
        );

        Ok(CreatedTask {
            task_id,
            pipeline_name: task.pipeline_name.clone(),
            task,
        })
    }

    fn pick_env(&self, product: &str, requested: &str) -> Option<String> {
        let envs: Vec<String> = requested
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();
        match envs.len() {
            0 => None,
            1 => envs.into_iter().next(),
            _ => self.scheduler.pick_least_busy(product, &envs),
        }
    }

    /// Unsorted, unhydrated subtasks of one target
    async fn target_subtasks(
        &self,
        workflow: &Workflow,
        target: &Target,
        env: Option<&ProductEnv>,
        deploy_timeout: i64,
    ) -> Result<Vec<SubTask>> {
        let product_name = if target.product_name.is_empty() {
            workflow.product_name.as_str()
        } else {
            target.product_name.as_str()
        };

        let mut sub_tasks = if let Some(jenkins) = &target.jenkins_build_args {
            jenkins_build_to_subtasks(&target.name, &target.service_name, jenkins)
        } else if !target.image.is_empty() {
            vec![SubTask::Artifact(ArtifactTask {
                common: TaskCommon::enabled(),
                service_name: target.name.clone(),
                image: target.image.clone(),
                registry_id: String::new(),
            })]
        } else {
            let args = BuildModuleArgs {
                target: &target.name,
                service_name: &target.service_name,
                product_name,
                variables: &target.envs,
                env,
                artifact_deploy: false,
            };
            build_module_to_subtasks(self.catalog, &args).await?
        };

        if let Some(env) = env {
            for deploy in target.deploy.iter().filter(|d| d.deploy_type != PM_DEPLOY_TYPE) {
                let task = deploy_env_to_subtask(target, deploy, env, deploy_timeout)?;
                if workflow.reset_image {
                    sub_tasks.push(SubTask::ResetImage(reset_image_subtask(&task)));
                }
                sub_tasks.push(SubTask::Deploy(task));
            }
        }

        if let Some(stage) = workflow.distribute_stage.as_ref().filter(|s| s.enabled) {
            for distribute in &stage.distributes {
                let t = &distribute.target;
                let same_product = t.product_name.is_empty() || t.product_name == product_name;
                if !same_product
                    || t.service_name != target.service_name
                    || t.service_module != target.name
                {
                    continue;
                }
                if distribute.image_distribute {
                    sub_tasks.push(SubTask::ReleaseImage(ReleaseImageTask {
                        common: TaskCommon::enabled(),
                        service_name: target.name.clone(),
                        image_repo: stage.image_repo.clone(),
                        releases: stage.releases.clone(),
                        ..Default::default()
                    }));
                }
                if distribute.qstack_distribute && !stage.dest_storage_url.is_empty() {
                    sub_tasks.push(SubTask::DistributeToS3(DistributeToS3Task {
                        common: TaskCommon::enabled(),
                        dest_storage_url: stage.dest_storage_url.clone(),
                        ..Default::default()
                    }));
                }
            }
        }

        match self.catalog.jira().await {
            Ok(Some(_)) => sub_tasks.push(SubTask::Jira(JiraTask {
                common: TaskCommon::enabled(),
                builds: target.build.repos.clone(),
                issues: Vec::new(),
            })),
            Ok(None) => {}
            Err(e) => warn!("Failed to read jira config: {}", e),
        }

        if workflow.security_stage.as_ref().is_some_and(|s| s.enabled) {
            sub_tasks.push(SubTask::Security(SecurityTask {
                common: TaskCommon::enabled(),
                service_name: target.name.clone(),
                ..Default::default()
            }));
        }

        debug!("Target {} compiled into {} subtasks", target.key(), sub_tasks.len());
        Ok(sub_tasks)
    }
}

/// Deploy subtask for one `service/container` destination of a target
pub fn deploy_env_to_subtask(
    target: &Target,
    deploy: &DeployEnv,
    env: &ProductEnv,
    timeout: i64,
) -> Result<DeployTask> {
    let parts: Vec<&str> = deploy.env.split('/').collect();
    let [service, container] = parts.as_slice() else {
        return Err(BuildError::SplitTargetEnv(deploy.env.clone()));
    };

    let (service_type, service_revision) = match deploy.deploy_type.as_str() {
        K8S_DEPLOY_TYPE => (K8S_DEPLOY_TYPE, 0),
        HELM_DEPLOY_TYPE => (
            HELM_DEPLOY_TYPE,
            env.service(service).map(|s| s.revision).unwrap_or_default(),
        ),
        _ => return Err(BuildError::EnvTypeMismatch),
    };

    let product_name = if deploy.product_name.is_empty() {
        target.product_name.clone()
    } else {
        deploy.product_name.clone()
    };

    Ok(DeployTask {
        common: TaskCommon {
            timeout,
            ..TaskCommon::enabled()
        },
        service_type: service_type.to_string(),
        product_name,
        env_name: env.env_name.clone(),
        namespace: env.namespace.clone(),
        service_name: service.to_string(),
        service_revision,
        container_name: format!("{}_{}", container, service),
        cluster_id: env.cluster_id.clone(),
        workload_type: env.service(service).and_then(|s| s.workload_type),
        ..Default::default()
    })
}

/// Reset counterpart of a deploy: restores the image found at creation
pub fn reset_image_subtask(deploy: &DeployTask) -> DeployTask {
    DeployTask {
        container_name: deploy.bare_container_name().to_string(),
        skip_waiting: true,
        ..deploy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        BuildModule, DeployGrant, DistributeStage, ExtensionStage, InMemoryCatalog,
        ProductDistribute, ProductService, Project, ServiceContainer, ServiceModuleTarget,
        TestModule,
    };
    use drover_core::domain::payload::{ConfigPayload, RegistryNamespace};
    use drover_core::domain::target::BuildRef;
    use drover_core::subtask::{BuildTask, Repository, TestingTask};
    use drover_core::TaskKind;

    fn env(name: &str) -> ProductEnv {
        ProductEnv {
            product_name: "demo".to_string(),
            env_name: name.to_string(),
            namespace: format!("demo-{}", name),
            services: vec![vec![ProductService {
                service_name: "web".to_string(),
                service_type: "helm".to_string(),
                revision: 4,
                containers: vec![ServiceContainer {
                    name: "api".to_string(),
                    image: "hub.example.com/team/api:old".to_string(),
                }],
                ..Default::default()
            }]],
            ..Default::default()
        }
    }

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog {
            workflows: vec![Workflow {
                name: "demo-workflow".to_string(),
                product_name: "demo".to_string(),
                reset_image: true,
                distribute_stage: Some(DistributeStage {
                    enabled: true,
                    image_repo: "release".to_string(),
                    distributes: vec![ProductDistribute {
                        target: ServiceModuleTarget {
                            product_name: "demo".to_string(),
                            service_name: "web".to_string(),
                            service_module: "api".to_string(),
                        },
                        image_distribute: true,
                        qstack_distribute: false,
                    }],
                    ..Default::default()
                }),
                security_stage: None,
                extension_stage: Some(ExtensionStage {
                    enabled: true,
                    url: "https://hooks.example.com".to_string(),
                    ..Default::default()
                }),
            }],
            projects: vec![Project {
                name: "demo".to_string(),
                timeout: 10,
            }],
            envs: vec![env("dev"), env("qa")],
            build_modules: vec![BuildModule {
                name: "api-build".to_string(),
                product_name: "demo".to_string(),
                targets: vec![ServiceModuleTarget {
                    product_name: "demo".to_string(),
                    service_name: "web".to_string(),
                    service_module: "api".to_string(),
                }],
                timeout: 30,
                repos: vec![Repository {
                    repo_name: "api".to_string(),
                    branch: "main".to_string(),
                    ..Default::default()
                }],
                scripts: "make".to_string(),
                ..Default::default()
            }],
            test_modules: vec![TestModule {
                name: "smoke".to_string(),
                product_name: "demo".to_string(),
                scripts: "make test".to_string(),
                ..Default::default()
            }],
            grants: vec![DeployGrant {
                user: "alice".to_string(),
                product: "demo".to_string(),
                namespace: "*".to_string(),
            }],
            config: ConfigPayload {
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
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn target(deploy: &str, deploy_type: &str) -> Target {
        Target {
            name: "api".to_string(),
            service_name: "web".to_string(),
            product_name: "demo".to_string(),
            build: BuildRef {
                repos: vec![Repository {
                    repo_name: "api".to_string(),
                    branch: "feature-x".to_string(),
                    ..Default::default()
                }],
            },
            deploy: vec![DeployEnv {
                env: deploy.to_string(),
                deploy_type: deploy_type.to_string(),
                product_name: String::new(),
            }],
            ..Default::default()
        }
    }

    fn args(targets: Vec<Target>) -> WorkflowTaskArgs {
        WorkflowTaskArgs {
            workflow_name: "demo-workflow".to_string(),
            product_name: "demo".to_string(),
            namespace: "dev".to_string(),
            targets,
            tests: vec![TestArgs {
                test_module_name: "smoke".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_workflow_task() {
        let catalog = catalog();
        let scheduler = SchedulerContext::new();
        let builder = GraphBuilder::new(&catalog, &scheduler);

        let created = builder
            .create_workflow_task(&args(vec![target("web/api", "helm")]), "alice")
            .await
            .unwrap();
        let task = &created.task;

        assert_eq!(created.task_id, 1);
        assert_eq!(task.pipeline_type, "workflow");
        assert_eq!(task.namespace, "demo-dev");
        assert_eq!(task.config_payload.registry_id, "reg-1");

        let kinds: Vec<TaskKind> = task.stages.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TaskKind::Build,
                TaskKind::Deploy,
                TaskKind::Testing,
                TaskKind::ReleaseImage,
                TaskKind::ResetImage,
                TaskKind::Extension,
            ]
        );

        let build = task.stage(TaskKind::Build).unwrap().sub_tasks["api_web"]
            .as_typed::<BuildTask>()
            .unwrap();
        assert_eq!(build.job_ctx.image, "hub.example.com/team/api:1-demo-dev-feature-x");
        assert_eq!(build.job_ctx.builds[0].branch, "feature-x");

        let deploy = task.stage(TaskKind::Deploy).unwrap().sub_tasks["api_web"]
            .as_typed::<DeployTask>()
            .unwrap();
        assert_eq!(deploy.image, build.job_ctx.image);
        assert_eq!(deploy.service_revision, 4);
        assert_eq!(deploy.common.timeout, 10);

        let reset = task.stage(TaskKind::ResetImage).unwrap().sub_tasks["api_web"]
            .as_typed::<DeployTask>()
            .unwrap();
        assert_eq!(reset.image, "hub.example.com/team/api:old");
        assert!(reset.skip_waiting);
        assert!(task.stage(TaskKind::ResetImage).unwrap().after_all);

        let testing = task.stage(TaskKind::Testing).unwrap().sub_tasks["smoke"]
            .as_typed::<TestingTask>()
            .unwrap();
        assert!(testing
            .job_ctx
            .env_vars
            .iter()
            .any(|e| e.key == "SERVICES" && e.value == "web"));

        let extension = task.stage(TaskKind::Extension).unwrap().sub_tasks[EXTENSION_KEY]
            .as_typed::<WebhookTask>()
            .unwrap();
        assert_eq!(extension.service_infos.len(), 1);
        assert_eq!(extension.service_infos[0].image, build.job_ctx.image);
    }

    #[tokio::test]
    async fn test_task_ids_increase_per_workflow() {
        let catalog = catalog();
        let scheduler = SchedulerContext::new();
        let builder = GraphBuilder::new(&catalog, &scheduler);
        let request = args(vec![target("web/api", "k8s")]);

        let first = builder.create_workflow_task(&request, "alice").await.unwrap();
        let second = builder.create_workflow_task(&request, "alice").await.unwrap();

        assert_eq!(second.task_id, first.task_id + 1);
    }

    #[tokio::test]
    async fn test_busy_env_is_avoided() {
        let catalog = catalog();
        let scheduler = SchedulerContext::new();
        scheduler.enqueue(QueueEntry {
            pipeline_name: "other".to_string(),
            task_id: 1,
            product_name: "demo".to_string(),
            namespace: "dev".to_string(),
            state: QueueState::Running,
        });
        let builder = GraphBuilder::new(&catalog, &scheduler);
        let mut request = args(vec![target("web/api", "k8s")]);
        request.namespace = "dev,qa".to_string();

        let created = builder.create_workflow_task(&request, "alice").await.unwrap();

        assert_eq!(created.task.env_name, "qa");
        assert_eq!(created.task.namespace, "demo-qa");
    }

    #[tokio::test]
    async fn test_malformed_destination_fails_creation() {
        let catalog = catalog();
        let scheduler = SchedulerContext::new();
        let builder = GraphBuilder::new(&catalog, &scheduler);

        let err = builder
            .create_workflow_task(&args(vec![target("web", "k8s")]), "alice")
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "[web]split target env error");
    }

    #[tokio::test]
    async fn test_run_without_targets_or_tests_has_no_subtasks() {
        let mut catalog = catalog();
        catalog.workflows[0].extension_stage = None;
        let scheduler = SchedulerContext::new();
        let builder = GraphBuilder::new(&catalog, &scheduler);
        let mut request = args(Vec::new());
        request.tests.clear();

        let err = builder.create_workflow_task(&request, "alice").await.unwrap_err();

        assert!(matches!(err, BuildError::NoSubtasks));
    }

    #[test]
    fn test_deploy_env_type_must_be_known() {
        let err = deploy_env_to_subtask(
            &target("web/api", "pm"),
            &DeployEnv {
                env: "web/api".to_string(),
                deploy_type: "vm".to_string(),
                product_name: String::new(),
            },
            &env("dev"),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::EnvTypeMismatch));
    }

    #[test]
    fn test_deploy_env_to_subtask() {
        let t = target("web/api", "k8s");
        let deploy = deploy_env_to_subtask(&t, &t.deploy[0], &env("dev"), 10).unwrap();

        assert_eq!(deploy.container_name, "api_web");
        assert_eq!(deploy.service_type, "k8s");
        assert_eq!(deploy.namespace, "demo-dev");
        assert_eq!(deploy.service_revision, 0);

        let reset = reset_image_subtask(&deploy);
        assert_eq!(reset.container_name, "api");
        assert!(reset.skip_waiting);
    }
}
