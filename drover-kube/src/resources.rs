//! ConfigMap and Secret endpoints

use tracing::debug;

use crate::KubeClient;
use crate::error::Result;
use crate::objects::{ConfigMap, Secret};

impl KubeClient {
    fn core_url(&self, namespace: &str, resource: &str) -> String {
        format!("{}/api/v1/namespaces/{}/{}", self.base_url, namespace, resource)
    }

    /// Create a config map
    pub async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        debug!("Creating config map {}/{}", namespace, config_map.metadata.name);
        let url = self.core_url(namespace, "configmaps");
        let response = self
            .authorize(self.client.post(&url))
            .json(config_map)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Delete every config map matching a label selector
    pub async fn delete_config_maps(&self, namespace: &str, selector: &str) -> Result<()> {
        let url = self.core_url(namespace, "configmaps");
        let response = self
            .authorize(self.client.delete(&url))
            .query(&[("labelSelector", selector)])
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Replace a secret, creating it when it does not exist yet
    pub async fn upsert_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let url = format!(
            "{}/{}",
            self.core_url(namespace, "secrets"),
            secret.metadata.name
        );
        let response = self.authorize(self.client.put(&url)).json(secret).send().await?;

        match self.handle_empty_response(response).await {
            Err(e) if e.is_not_found() => {
                debug!("Secret {}/{} not found, creating", namespace, secret.metadata.name);
                let url = self.core_url(namespace, "secrets");
                let response = self.authorize(self.client.post(&url)).json(secret).send().await?;
                self.handle_empty_response(response).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::ObjectMeta;
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_upsert_secret_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/namespaces/ci/secrets/team-registry-secret"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/ci/secrets"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = KubeClient::new(server.uri());
        let secret = Secret::new(
            ObjectMeta::named("team-registry-secret"),
            Secret::DOCKERCFG_TYPE,
            BTreeMap::from([(".dockercfg".to_string(), "{}".to_string())]),
        );
        client.upsert_secret("ci", &secret).await.unwrap();
    }
}
