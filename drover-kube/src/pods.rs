//! Pod endpoints

use crate::KubeClient;
use crate::error::Result;
use crate::objects::{ObjectList, Pod};

impl KubeClient {
    fn pods_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.base_url, namespace)
    }

    /// List pods matching a label selector
    pub async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let url = self.pods_url(namespace);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("labelSelector", selector)])
            .send()
            .await?;

        let list: ObjectList<Pod> = self.handle_response(response).await?;
        Ok(list.items)
    }

    /// Full log of one container
    pub async fn pod_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String> {
        let url = format!("{}/{}/log", self.pods_url(namespace), pod);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("container", container)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(crate::KubeError::api_error(status.as_u16(), body));
        }
        Ok(body)
    }
}
