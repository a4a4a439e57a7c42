//! Kubernetes Job manifests for executor-driven subtasks

use std::collections::BTreeMap;

use drover_core::consts::{DEFAULT_IMAGE_PULL_SECRET, IMAGE_FROM_CUSTOM};
use drover_core::domain::cache::CacheDirType;
use drover_core::domain::payload::{AdvancedConfig, RegistryNamespace};
use drover_core::domain::resource::ResourceSpec;
use drover_core::subtask::JobRuntime;
use drover_kube::{
    Affinity, ConfigMapVolumeSource, Container, EnvVar, Job, JobSpec, LocalObjectReference,
    NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, ObjectMeta,
    PersistentVolumeClaimVolumeSource, PodDnsConfig, PodDnsConfigOption, PodSpec,
    PodTemplateSpec, PreferredSchedulingTerm, ResourceRequirements, Volume, VolumeMount,
};

use super::secret::registry_secret_name;

/// ConfigMap key holding the executor configuration
pub const JOB_CONFIG_KEY: &str = "job-config.xml";

/// Directory the ConfigMap is mounted at inside the job container
pub const CONFIG_MOUNT_DIR: &str = "/mnt/job";

const JOB_CONFIG_VOLUME: &str = "job-config";
const CACHE_VOLUME: &str = "build-cache";
const WORKSPACE_DIR: &str = "/workspace";
const DIND_SERVER: &str = ".dind";
const RESOURCE_SERVER: &str = "resource-server";

/// Images that carry their own entrypoint instead of downloading the reaper
const PLUGIN_IMAGES: [&str; 3] = ["predator-plugin", "jenkins-plugin", "packager-plugin"];

/// NFS volume holding the build cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMount {
    pub claim_name: String,
    pub mount_path: String,
}

impl CacheMount {
    /// Mount for `claim`, at the workspace or at the user directory
    pub fn new(claim: &str, dir_type: CacheDirType, user_dir: &str) -> Self {
        let mount_path = match dir_type {
            CacheDirType::Workspace => WORKSPACE_DIR.to_string(),
            CacheDirType::UserDefined => user_dir.to_string(),
        };
        Self {
            claim_name: claim.to_string(),
            mount_path,
        }
    }
}

/// Everything that varies between the Jobs of different subtasks
#[derive(Debug, Clone, Default)]
pub struct JobTemplate {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub container_name: String,
    pub image: String,
    pub docker_host: String,
    pub registries: Vec<RegistryNamespace>,
    pub resources: ResourceSpec,
    pub cache: Option<CacheMount>,
    pub affinity: Option<Affinity>,
    pub dns_config: Option<PodDnsConfig>,
    /// Shell script downloading and starting the reaper, for non-plugin images
    pub boot_script: Option<String>,
}

impl JobTemplate {
    /// Builds the Job manifest
    ///
    /// The Job runs exactly once: one completion, no parallelism, no
    /// retries, and pods are never restarted.
    pub fn build(&self) -> Job {
        let mut pull_secrets = vec![LocalObjectReference {
            name: DEFAULT_IMAGE_PULL_SECRET.to_string(),
        }];
        for reg in &self.registries {
            let name = registry_secret_name(reg);
            if !pull_secrets.iter().any(|s| s.name == name) {
                pull_secrets.push(LocalObjectReference { name });
            }
        }

        let mut volume_mounts = vec![VolumeMount {
            name: JOB_CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_MOUNT_DIR.to_string(),
        }];
        let mut volumes = vec![Volume {
            name: JOB_CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: self.name.clone(),
            }),
            persistent_volume_claim: None,
        }];
        if let Some(cache) = &self.cache {
            volume_mounts.push(VolumeMount {
                name: CACHE_VOLUME.to_string(),
                mount_path: cache.mount_path.clone(),
            });
            volumes.push(Volume {
                name: CACHE_VOLUME.to_string(),
                config_map: None,
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: cache.claim_name.clone(),
                }),
            });
        }

        let (command, args) = match &self.boot_script {
            Some(script) if !is_plugin_image(&self.image) => (
                vec!["/bin/sh".to_string(), "-c".to_string()],
                vec![script.clone()],
            ),
            _ => (Vec::new(), Vec::new()),
        };

        let container = Container {
            name: self.container_name.clone(),
            image: self.image.clone(),
            image_pull_policy: Some("Always".to_string()),
            command,
            args,
            env: vec![
                EnvVar::new("JOB_CONFIG_FILE", format!("{}/{}", CONFIG_MOUNT_DIR, JOB_CONFIG_KEY)),
                EnvVar::new("DOCKER_HOST", &self.docker_host),
            ],
            volume_mounts,
            resources: Some(resource_requirements(&self.resources)),
            termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        };

        let dns_policy = self.dns_config.as_ref().map(|_| "None".to_string());

        let mut metadata = ObjectMeta::named(&self.name);
        metadata.labels = self.labels.clone();

        Job::new(
            metadata,
            JobSpec {
                completions: Some(1),
                parallelism: Some(1),
                backoff_limit: Some(0),
                template: PodTemplateSpec {
                    metadata: ObjectMeta {
                        labels: self.labels.clone(),
                        ..Default::default()
                    },
                    spec: PodSpec {
                        restart_policy: Some("Never".to_string()),
                        image_pull_secrets: pull_secrets,
                        containers: vec![container],
                        volumes,
                        affinity: self.affinity.clone(),
                        dns_policy,
                        dns_config: self.dns_config.clone(),
                    },
                },
            },
        )
    }
}

pub fn is_plugin_image(image: &str) -> bool {
    PLUGIN_IMAGES.iter().any(|p| image.contains(p))
}

/// Effective tier as Kubernetes quantities
pub fn resource_requirements(spec: &ResourceSpec) -> ResourceRequirements {
    let quantities = |cpu: u32, memory: u32| {
        BTreeMap::from([
            ("cpu".to_string(), format!("{}m", cpu)),
            ("memory".to_string(), format!("{}Mi", memory)),
        ])
    };
    ResourceRequirements {
        limits: quantities(spec.cpu_limit, spec.memory_limit),
        requests: quantities(spec.cpu_req, spec.memory_req),
    }
}

/// Image the job container runs
///
/// Custom images are used as-is; otherwise `build_os` selects a flavor of
/// the reaper image.
pub fn job_image(reaper_image: &str, runtime: &JobRuntime) -> String {
    if runtime.image_from == IMAGE_FROM_CUSTOM {
        runtime.build_os.clone()
    } else {
        format!("{}-{}", reaper_image, runtime.build_os)
    }
}

/// Node affinity from a cluster's scheduling preferences
pub fn node_affinity(config: Option<&AdvancedConfig>) -> Option<Affinity> {
    let config = config.filter(|c| !c.node_labels.is_empty())?;
    let terms = config.node_labels.iter().map(|label| NodeSelectorTerm {
        match_expressions: vec![NodeSelectorRequirement {
            key: label.key.clone(),
            operator: label.operator.clone(),
            values: label.value.clone(),
        }],
    });

    let node_affinity = match config.strategy.as_str() {
        "required" => NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: terms.collect(),
            }),
            ..Default::default()
        },
        "preferred" => NodeAffinity {
            preferred_during_scheduling_ignored_during_execution: terms
                .map(|preference| PreferredSchedulingTerm {
                    weight: 10,
                    preference,
                })
                .collect(),
            ..Default::default()
        },
        _ => return None,
    };

    Some(Affinity {
        node_affinity: Some(node_affinity),
    })
}

/// DNS configuration resolving short service names of linked namespaces
pub fn dns_config(exec_namespace: &str, linked: &[String], nameservers: &[String]) -> PodDnsConfig {
    let mut searches: Vec<String> = linked
        .iter()
        .filter(|ns| !ns.is_empty())
        .map(|ns| format!("{}.svc.cluster.local", ns))
        .collect();
    searches.push(format!("{}.svc.cluster.local", exec_namespace));
    searches.push("svc.cluster.local".to_string());
    searches.push("cluster.local".to_string());
    searches.dedup();

    PodDnsConfig {
        nameservers: nameservers.iter().take(3).cloned().collect(),
        searches,
        options: vec![PodDnsConfigOption {
            name: "ndots".to_string(),
            value: Some("5".to_string()),
        }],
    }
}

/// Qualifies the resource server host in `url` with `namespace`
pub fn qualify_resource_server(url: &str, namespace: &str) -> String {
    url.replacen(RESOURCE_SERVER, &format!("{}.{}", RESOURCE_SERVER, namespace), 1)
}

/// Points a docker host at the dind service of `exec_namespace`
pub fn namespaced_docker_host(host: &str, home_namespace: &str, exec_namespace: &str) -> String {
    if host.is_empty() || host.contains(exec_namespace) {
        return host.to_string();
    }
    if !home_namespace.is_empty() && host.contains(home_namespace) {
        return host.replacen(home_namespace, exec_namespace, 1);
    }
    host.replacen(DIND_SERVER, &format!("{}.{}", DIND_SERVER, exec_namespace), 1)
}

/// Script downloading the reaper binary and starting it
pub fn reaper_boot_script(binary_url: &str, proxy: Option<&str>) -> String {
    let proxy = proxy.map(|p| format!(" --proxy {}", p)).unwrap_or_default();
    format!(
        "curl -m 60 --retry-delay 5 --retry 3 -sL{} {} -o reaper && chmod +x reaper && mv reaper /usr/local/bin && /usr/local/bin/reaper",
        proxy, binary_url
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::domain::payload::NodeSelectorLabel;
    use drover_core::domain::resource::ResourceTier;

    fn template() -> JobTemplate {
        JobTemplate {
            name: "demo-1-buildv2-api".to_string(),
            labels: BTreeMap::from([("s-type".to_string(), "buildv2".to_string())]),
            container_name: "buildv2".to_string(),
            image: "koderover/reaper-plugin:1.0-focal".to_string(),
            docker_host: "tcp://dind.drover:2375".to_string(),
            registries: vec![RegistryNamespace {
                id: "r1".to_string(),
                reg_addr: "https://hub.example.com".to_string(),
                namespace: "team".to_string(),
                access_key: "ak".to_string(),
                ..Default::default()
            }],
            resources: ResourceTier::Low.resolve(&ResourceSpec::default()),
            boot_script: Some(reaper_boot_script("http://resource-server/reaper", None)),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_runs_once() {
        let job = template().build();
        assert_eq!(job.spec.completions, Some(1));
        assert_eq!(job.spec.parallelism, Some(1));
        assert_eq!(job.spec.backoff_limit, Some(0));

        let pod = &job.spec.template.spec;
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            pod.image_pull_secrets
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>(),
            vec!["default-registry-secret", "team-registry-secret"]
        );
        assert_eq!(pod.volumes[0].config_map.as_ref().unwrap().name, "demo-1-buildv2-api");
        assert!(pod.dns_policy.is_none());
    }

    #[test]
    fn test_container_env_and_resources() {
        let job = template().build();
        let container = &job.spec.template.spec.containers[0];
        assert_eq!(container.name, "buildv2");
        assert_eq!(container.env[0], EnvVar::new("JOB_CONFIG_FILE", "/mnt/job/job-config.xml"));
        assert_eq!(container.env[1], EnvVar::new("DOCKER_HOST", "tcp://dind.drover:2375"));
        assert_eq!(container.command, vec!["/bin/sh", "-c"]);
        assert!(container.args[0].ends_with("/usr/local/bin/reaper"));

        let resources = container.resources.as_ref().unwrap();
        assert_eq!(resources.limits["cpu"], "4000m");
        assert_eq!(resources.limits["memory"], "8192Mi");
        assert_eq!(resources.requests["cpu"], "1000m");
        assert_eq!(resources.requests["memory"], "2048Mi");
    }

    #[test]
    fn test_plugin_image_keeps_entrypoint() {
        let mut t = template();
        t.image = "koderover/predator-plugin:1.0".to_string();
        let job = t.build();
        assert!(job.spec.template.spec.containers[0].command.is_empty());
    }

    #[test]
    fn test_nfs_cache_volume() {
        let mut t = template();
        t.cache = Some(CacheMount::new("cache-pvc", CacheDirType::UserDefined, "/root/.m2"));
        let job = t.build();
        let pod = &job.spec.template.spec;
        assert_eq!(
            pod.volumes[1].persistent_volume_claim.as_ref().unwrap().claim_name,
            "cache-pvc"
        );
        assert_eq!(pod.containers[0].volume_mounts[1].mount_path, "/root/.m2");
        assert_eq!(
            CacheMount::new("c", CacheDirType::Workspace, "/ignored").mount_path,
            "/workspace"
        );
    }

    #[test]
    fn test_job_image() {
        let mut runtime = JobRuntime {
            build_os: "focal".to_string(),
            image_from: "koderover".to_string(),
            ..Default::default()
        };
        assert_eq!(job_image("koderover/reaper-plugin:1.0", &runtime), "koderover/reaper-plugin:1.0-focal");
        runtime.image_from = IMAGE_FROM_CUSTOM.to_string();
        runtime.build_os = "my/builder:2".to_string();
        assert_eq!(job_image("koderover/reaper-plugin:1.0", &runtime), "my/builder:2");
    }

    #[test]
    fn test_node_affinity_strategies() {
        let mut config = AdvancedConfig {
            strategy: "required".to_string(),
            node_labels: vec![NodeSelectorLabel {
                key: "pool".to_string(),
                operator: "In".to_string(),
                value: vec!["build".to_string()],
            }],
        };
        let required = node_affinity(Some(&config)).unwrap().node_affinity.unwrap();
        let terms = required
            .required_during_scheduling_ignored_during_execution
            .unwrap()
            .node_selector_terms;
        assert_eq!(terms[0].match_expressions[0].key, "pool");

        config.strategy = "preferred".to_string();
        let preferred = node_affinity(Some(&config)).unwrap().node_affinity.unwrap();
        assert_eq!(preferred.preferred_during_scheduling_ignored_during_execution[0].weight, 10);

        config.strategy = "random".to_string();
        assert!(node_affinity(Some(&config)).is_none());
        assert!(node_affinity(None).is_none());
    }

    #[test]
    fn test_dns_config() {
        let nameservers: Vec<String> = (1..=4).map(|i| format!("10.0.0.{}", i)).collect();
        let dns = dns_config("drover", &["demo-dev".to_string()], &nameservers);
        assert_eq!(
            dns.searches,
            vec![
                "demo-dev.svc.cluster.local",
                "drover.svc.cluster.local",
                "svc.cluster.local",
                "cluster.local"
            ]
        );
        assert_eq!(dns.nameservers.len(), 3);
        assert_eq!(dns.options[0].value.as_deref(), Some("5"));

        let mut t = template();
        t.dns_config = Some(dns);
        assert_eq!(t.build().spec.template.spec.dns_policy.as_deref(), Some("None"));
    }

    #[test]
    fn test_host_rewrites() {
        assert_eq!(
            qualify_resource_server("http://resource-server/reaper", "koderover-agent"),
            "http://resource-server.koderover-agent/reaper"
        );
        assert_eq!(
            namespaced_docker_host("tcp://dind-0.dind:2375", "drover", "drover"),
            "tcp://dind-0.dind.drover:2375"
        );
        assert_eq!(
            namespaced_docker_host("tcp://dind-0.dind.drover:2375", "drover", "koderover-agent"),
            "tcp://dind-0.dind.koderover-agent:2375"
        );
        assert!(reaper_boot_script("u", Some("http://p:3128")).contains(" --proxy http://p:3128 u "));
    }
}
