//! The cluster operations the engine depends on, as a trait
//!
//! Everything above this crate talks to [`KubeApi`] so lifecycle logic can
//! be tested against an in-memory cluster.

use async_trait::async_trait;
use drover_core::domain::resource::WorkloadKind;

use crate::KubeClient;
use crate::error::Result;
use crate::objects::{ConfigMap, ExecOutput, Job, Pod, Secret, Workload};

#[async_trait]
pub trait KubeApi: Send + Sync {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<()>;
    async fn delete_jobs(&self, namespace: &str, selector: &str) -> Result<()>;

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()>;
    async fn delete_config_maps(&self, namespace: &str, selector: &str) -> Result<()>;
    async fn upsert_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;
    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String>;
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput>;

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Workload>>;
    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>>;
    async fn set_container_image(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<()>;
}

#[async_trait]
impl KubeApi for KubeClient {
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        KubeClient::get_job(self, namespace, name).await
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<()> {
        KubeClient::create_job(self, namespace, job).await
    }

    async fn delete_jobs(&self, namespace: &str, selector: &str) -> Result<()> {
        KubeClient::delete_jobs(self, namespace, selector).await
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        KubeClient::create_config_map(self, namespace, config_map).await
    }

    async fn delete_config_maps(&self, namespace: &str, selector: &str) -> Result<()> {
        KubeClient::delete_config_maps(self, namespace, selector).await
    }

    async fn upsert_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        KubeClient::upsert_secret(self, namespace, secret).await
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        KubeClient::list_pods(self, namespace, selector).await
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String> {
        KubeClient::pod_logs(self, namespace, pod, container).await
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        KubeClient::exec(self, namespace, pod, container, command).await
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Workload>> {
        KubeClient::list_workloads(self, kind, namespace, selector).await
    }

    async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>> {
        KubeClient::get_workload(self, kind, namespace, name).await
    }

    async fn set_container_image(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<()> {
        KubeClient::set_container_image(self, kind, namespace, name, container, image).await
    }
}
