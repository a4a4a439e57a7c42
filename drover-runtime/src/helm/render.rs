//! Render sets: the values an environment renders its charts with
//!
//! Helm deploys read the service's current chart values and image paths
//! from here and write the values with the new image back.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use super::resolve::ImagePathSpec;

/// Values of one service chart in an environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderChart {
    pub service_name: String,
    #[serde(default)]
    pub chart_version: String,
    /// Chart values as maintained by the environment
    #[serde(default)]
    pub values_yaml: String,
    /// Environment-specific overrides applied on top of `values_yaml`
    #[serde(default)]
    pub override_yaml: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderSet {
    pub name: String,
    #[serde(default)]
    pub revision: i64,
    /// Values shared by every chart of the environment
    #[serde(default)]
    pub default_values: String,
    #[serde(default)]
    pub chart_infos: Vec<RenderChart>,
}

impl RenderSet {
    pub fn chart(&self, service_name: &str) -> Option<&RenderChart> {
        self.chart_infos.iter().find(|c| c.service_name == service_name)
    }

    pub fn chart_mut(&mut self, service_name: &str) -> Option<&mut RenderChart> {
        self.chart_infos
            .iter_mut()
            .find(|c| c.service_name == service_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceContainer {
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub image_path: Option<ImagePathSpec>,
}

/// A service as currently applied in an environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductService {
    pub service_name: String,
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub containers: Vec<ServiceContainer>,
}

/// Everything a helm deploy needs to know about one environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRender {
    pub product_name: String,
    pub env_name: String,
    #[serde(default)]
    pub services: Vec<ProductService>,
    #[serde(default)]
    pub render_set: RenderSet,
}

impl EnvironmentRender {
    pub fn service(&self, service_name: &str) -> Option<&ProductService> {
        self.services.iter().find(|s| s.service_name == service_name)
    }
}

#[async_trait]
pub trait RenderSetStore: Send + Sync {
    async fn environment(&self, product_name: &str, env_name: &str)
    -> Result<Option<EnvironmentRender>>;

    async fn update_render_set(
        &self,
        product_name: &str,
        env_name: &str,
        render_set: &RenderSet,
    ) -> Result<()>;
}

/// Render sets held in memory, typically loaded from a task bundle
#[derive(Debug, Default)]
pub struct InMemoryRenderSets {
    environments: Mutex<Vec<EnvironmentRender>>,
}

impl InMemoryRenderSets {
    pub fn new(environments: Vec<EnvironmentRender>) -> Self {
        Self {
            environments: Mutex::new(environments),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<EnvironmentRender>> {
        self.environments.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RenderSetStore for InMemoryRenderSets {
    async fn environment(
        &self,
        product_name: &str,
        env_name: &str,
    ) -> Result<Option<EnvironmentRender>> {
        Ok(self
            .lock()
            .iter()
            .find(|e| e.product_name == product_name && e.env_name == env_name)
            .cloned())
    }

    async fn update_render_set(
        &self,
        product_name: &str,
        env_name: &str,
        render_set: &RenderSet,
    ) -> Result<()> {
        let mut environments = self.lock();
        let Some(env) = environments
            .iter_mut()
            .find(|e| e.product_name == product_name && e.env_name == env_name)
        else {
            anyhow::bail!("environment {}/{} not found", product_name, env_name);
        };
        env.render_set = render_set.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> EnvironmentRender {
        EnvironmentRender {
            product_name: "demo".to_string(),
            env_name: "dev".to_string(),
            services: vec![ProductService {
                service_name: "api".to_string(),
                revision: 3,
                ..Default::default()
            }],
            render_set: RenderSet {
                name: "demo-dev".to_string(),
                chart_infos: vec![RenderChart {
                    service_name: "api".to_string(),
                    values_yaml: "image: old".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_update_render_set() {
        let store = InMemoryRenderSets::new(vec![env()]);
        let mut found = store.environment("demo", "dev").await.unwrap().unwrap();
        assert_eq!(found.service("api").map(|s| s.revision), Some(3));

        found.render_set.chart_mut("api").unwrap().values_yaml = "image: new".to_string();
        store
            .update_render_set("demo", "dev", &found.render_set)
            .await
            .unwrap();

        let updated = store.environment("demo", "dev").await.unwrap().unwrap();
        assert_eq!(updated.render_set.chart("api").unwrap().values_yaml, "image: new");
    }

    #[tokio::test]
    async fn test_unknown_environment() {
        let store = InMemoryRenderSets::default();
        assert!(store.environment("demo", "prod").await.unwrap().is_none());
        assert!(
            store
                .update_render_set("demo", "prod", &RenderSet::default())
                .await
                .is_err()
        );
    }
}
