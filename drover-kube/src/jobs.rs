//! Job endpoints

use tracing::debug;

use crate::KubeClient;
use crate::error::Result;
use crate::objects::Job;

impl KubeClient {
    fn jobs_url(&self, namespace: &str) -> String {
        format!("{}/apis/batch/v1/namespaces/{}/jobs", self.base_url, namespace)
    }

    /// Get a job by name
    ///
    /// # Returns
    /// `None` when the job does not exist
    pub async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let url = format!("{}/{}", self.jobs_url(namespace), name);
        let response = self.authorize(self.client.get(&url)).send().await?;

        self.handle_optional_response(response).await
    }

    /// Create a job
    pub async fn create_job(&self, namespace: &str, job: &Job) -> Result<()> {
        debug!("Creating job {}/{}", namespace, job.metadata.name);
        let url = self.jobs_url(namespace);
        let response = self.authorize(self.client.post(&url)).json(job).send().await?;

        self.handle_empty_response(response).await
    }

    /// Delete every job matching a label selector, pods included
    pub async fn delete_jobs(&self, namespace: &str, selector: &str) -> Result<()> {
        debug!("Deleting jobs in {} with selector {}", namespace, selector);
        let url = self.jobs_url(namespace);
        let response = self
            .authorize(self.client.delete(&url))
            .query(&[("labelSelector", selector), ("propagationPolicy", "Background")])
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
