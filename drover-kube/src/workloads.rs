//! Deployment and StatefulSet endpoints

use drover_core::domain::resource::WorkloadKind;
use tracing::debug;

use crate::KubeClient;
use crate::error::Result;
use crate::objects::{ObjectList, Workload};

impl KubeClient {
    fn workloads_url(&self, kind: WorkloadKind, namespace: &str) -> String {
        let resource = match kind {
            WorkloadKind::Deployment => "deployments",
            WorkloadKind::StatefulSet => "statefulsets",
        };
        format!(
            "{}/apis/apps/v1/namespaces/{}/{}",
            self.base_url, namespace, resource
        )
    }

    /// List workloads of a kind, optionally filtered by a label selector
    pub async fn list_workloads(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Workload>> {
        let url = self.workloads_url(kind, namespace);
        let mut request = self.authorize(self.client.get(&url));
        if !selector.is_empty() {
            request = request.query(&[("labelSelector", selector)]);
        }
        let response = request.send().await?;

        let list: ObjectList<Workload> = self.handle_response(response).await?;
        Ok(list.items)
    }

    /// Get a workload by name
    pub async fn get_workload(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Workload>> {
        let url = format!("{}/{}", self.workloads_url(kind, namespace), name);
        let response = self.authorize(self.client.get(&url)).send().await?;

        self.handle_optional_response(response).await
    }

    /// Point one container of a workload at a new image
    ///
    /// Sent as a strategic merge patch, which merges containers by name and
    /// leaves every other field of the workload untouched.
    pub async fn set_container_image(
        &self,
        kind: WorkloadKind,
        namespace: &str,
        name: &str,
        container: &str,
        image: &str,
    ) -> Result<()> {
        debug!(
            "Setting image of {} {}/{} container {} to {}",
            kind, namespace, name, container, image
        );
        let url = format!("{}/{}", self.workloads_url(kind, namespace), name);
        let patch = serde_json::json!({
            "spec": { "template": { "spec": {
                "containers": [{ "name": container, "image": image }]
            } } }
        });
        let response = self
            .authorize(self.client.patch(&url))
            .header("Content-Type", "application/strategic-merge-patch+json")
            .body(patch.to_string())
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
