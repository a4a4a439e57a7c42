//! In-memory cluster for lifecycle tests

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use drover_core::domain::resource::WorkloadKind;
use drover_kube::{
    ConfigMap, Container, ExecOutput, Job, JobStatus, KubeApi, KubeError, ObjectMeta, Pod,
    PodSpec, PodStatus, Result, Secret, Workload,
};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    job_status: Option<JobStatus>,
    pods: VecDeque<Vec<Pod>>,
    exec: VecDeque<Option<String>>,
    config_maps: BTreeMap<String, ConfigMap>,
    jobs: BTreeMap<String, Job>,
    workloads: Vec<(WorkloadKind, Workload)>,
    fail_create_job: bool,
}

/// Scripted cluster
///
/// Pod lists and exec results are served from queues; the last queued pod
/// list keeps being returned once the others are consumed.
#[derive(Default)]
pub struct FakeKube {
    state: Mutex<State>,
}

impl FakeKube {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn pod(name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta::named(name),
            spec: PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            status: PodStatus {
                phase: phase.to_string(),
                ..Default::default()
            },
        }
    }

    pub fn workload(name: &str, labels: &[(&str, &str)], containers: &[(&str, &str)]) -> Workload {
        let mut workload = Workload::default();
        workload.metadata.name = name.to_string();
        workload.metadata.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        workload.spec.replicas = Some(1);
        workload.spec.template.spec.containers = containers
            .iter()
            .map(|(name, image)| Container {
                name: name.to_string(),
                image: image.to_string(),
                ..Default::default()
            })
            .collect();
        workload
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn set_job_status(&self, status: JobStatus) {
        self.lock().job_status = Some(status);
    }

    pub fn push_pods(&self, pods: Vec<Pod>) {
        self.lock().pods.push_back(pods);
    }

    pub fn push_exec(&self, dog_food: Option<&str>) {
        self.lock().exec.push_back(dog_food.map(String::from));
    }

    pub fn add_workload(&self, kind: WorkloadKind, workload: Workload) {
        self.lock().workloads.push((kind, workload));
    }

    /// Marks every workload as rolled out
    pub fn mark_ready(&self) {
        for (_, w) in self.lock().workloads.iter_mut() {
            w.status.ready_replicas = w.spec.replicas.unwrap_or(1);
            w.status.updated_replicas = w.spec.replicas.unwrap_or(1);
        }
    }

    pub fn fail_create_job(&self) {
        self.lock().fail_create_job = true;
    }

    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.lock().config_maps.get(name).cloned()
    }

    pub fn job(&self, name: &str) -> Option<Job> {
        self.lock().jobs.get(name).cloned()
    }

    pub fn image_of(&self, name: &str, container: &str) -> Option<String> {
        self.lock()
            .workloads
            .iter()
            .find(|(_, w)| w.metadata.name == name)
            .and_then(|(_, w)| w.containers().iter().find(|c| c.name == container))
            .map(|c| c.image.clone())
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

#[async_trait]
impl KubeApi for FakeKube {
    async fn get_job(&self, _namespace: &str, name: &str) -> Result<Option<Job>> {
        let state = self.lock();
        Ok(state.job_status.map(|status| {
            let mut job = Job::new(ObjectMeta::named(name), Default::default());
            job.status = Some(status);
            job
        }))
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<()> {
        let mut state = self.lock();
        if state.fail_create_job {
            return Err(KubeError::api_error(403, "forbidden"));
        }
        state
            .calls
            .push(format!("create_job {} {}", namespace, job.metadata.name));
        state.jobs.insert(job.metadata.name.clone(), job.clone());
        Ok(())
    }

    async fn delete_jobs(&self, namespace: &str, selector: &str) -> Result<()> {
        self.lock()
            .calls
            .push(format!("delete_jobs {} {}", namespace, selector));
        Ok(())
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!(
            "create_config_map {} {}",
            namespace, config_map.metadata.name
        ));
        state
            .config_maps
            .insert(config_map.metadata.name.clone(), config_map.clone());
        Ok(())
    }

    async fn delete_config_maps(&self, namespace: &str, selector: &str) -> Result<()> {
        self.lock()
            .calls
            .push(format!("delete_config_maps {} {}", namespace, selector));
        Ok(())
    }

    async fn upsert_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.lock()
            .calls
            .push(format!("upsert_secret {} {}", namespace, secret.metadata.name));
        Ok(())
    }

    async fn list_pods(&self, _namespace: &str, _selector: &str) -> Result<Vec<Pod>> {
        let mut state = self.lock();
        let pods = if state.pods.len() > 1 {
            state.pods.pop_front()
        } else {
            state.pods.front().cloned()
        };
        Ok(pods.unwrap_or_default())
    }

    async fn pod_logs(&self, _namespace: &str, pod: &str, container: &str) -> Result<String> {
        Ok(format!("log of {}/{}", pod, container))
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        _command: &[String],
    ) -> Result<ExecOutput> {
        let mut state = self.lock();
        state
            .calls
            .push(format!("exec {} {} {}", namespace, pod, container));
        Ok(match state.exec.pop_front().flatten() {
            Some(stdout) => ExecOutput {
                stdout,
                success: true,
            },
            None => ExecOutput::default(),
        })
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        _namespace: &str,
        selector: &str,
    ) -> Result<Vec<Workload>> {
        Ok(self
            .lock()
            .workloads
            .iter()
            .filter(|(k, w)| *k == kind && matches_selector(&w.metadata.labels, selector))
            .map(|(_, w)| w.clone())
            .collect())
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>> {
        Ok(self
            .lock()
            .workloads
            .iter()
            .find(|(k, w)| *k == kind && w.metadata.name == name)
            .map(|(_, w)| w.clone()))
    }

    async fn set_container_image(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!(
            "set_image {} {} {} {} {}",
            kind, namespace, name, container, image
        ));
        let workload = state
            .workloads
            .iter_mut()
            .find(|(k, w)| *k == kind && w.metadata.name == name)
            .map(|(_, w)| w)
            .ok_or_else(|| KubeError::api_error(404, "workload not found"))?;
        for c in workload.spec.template.spec.containers.iter_mut() {
            if c.name == container {
                c.image = image.to_string();
            }
        }
        Ok(())
    }
}
