//! Helm releases
//!
//! Chart upgrades go through the `helm` binary, the same way exec goes
//! through kubectl. [`HelmClient`] is the seam tests replace.

pub mod render;
pub mod resolve;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

pub use render::{EnvironmentRender, InMemoryRenderSets, RenderChart, RenderSet, RenderSetStore};
pub use resolve::ImagePathSpec;

/// Releases kept by helm for each service
pub const MAX_HISTORY: u32 = 10;

/// Release name of a service deployed in `namespace`
pub fn release_name(namespace: &str, service_name: &str) -> String {
    format!("{}-{}", namespace, service_name)
}

/// Service name a release name was generated from
pub fn service_of_release<'a>(release: &'a str, namespace: &str) -> &'a str {
    release
        .strip_prefix(namespace)
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(release)
}

/// One entry of a release's history
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HelmRelease {
    pub revision: i64,
    pub status: String,
}

impl HelmRelease {
    /// Whether an install, upgrade or rollback is still in flight
    pub fn is_pending(&self) -> bool {
        self.status.starts_with("pending")
    }
}

/// What to install or upgrade
#[derive(Debug, Clone)]
pub struct ChartSpec {
    pub release_name: String,
    pub chart_path: PathBuf,
    pub namespace: String,
    pub version: String,
    pub values_yaml: String,
    pub timeout: Duration,
}

#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Release history, newest last; empty when the release does not exist
    async fn release_history(&self, namespace: &str, release: &str) -> Result<Vec<HelmRelease>>;

    async fn upgrade_install(&self, spec: &ChartSpec) -> Result<()>;
}

/// Helm client driving the `helm` binary
#[derive(Debug, Clone)]
pub struct CliHelmClient {
    binary: String,
}

impl CliHelmClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output> {
        debug!("Running {} {}", self.binary, args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary))
    }
}

impl Default for CliHelmClient {
    fn default() -> Self {
        Self::new("helm")
    }
}

#[async_trait]
impl HelmClient for CliHelmClient {
    async fn release_history(&self, namespace: &str, release: &str) -> Result<Vec<HelmRelease>> {
        let args = vec![
            "history".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--max".to_string(),
            MAX_HISTORY.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self.run(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not found") {
                return Ok(Vec::new());
            }
            anyhow::bail!("helm history {} failed: {}", release, stderr.trim());
        }

        let mut history: Vec<HelmRelease> = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Failed to parse history of {}", release))?;
        history.sort_by_key(|r| r.revision);
        Ok(history)
    }

    async fn upgrade_install(&self, spec: &ChartSpec) -> Result<()> {
        let values = tempfile::Builder::new()
            .prefix("values-")
            .suffix(".yaml")
            .tempfile()
            .context("Failed to create values file")?;
        tokio::fs::write(values.path(), &spec.values_yaml)
            .await
            .context("Failed to write values file")?;

        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            spec.release_name.clone(),
            spec.chart_path.display().to_string(),
            "--namespace".to_string(),
            spec.namespace.clone(),
            "--values".to_string(),
            values.path().display().to_string(),
            "--reuse-values".to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{}s", spec.timeout.as_secs()),
            "--history-max".to_string(),
            MAX_HISTORY.to_string(),
        ];
        if !spec.version.is_empty() {
            args.push("--version".to_string());
            args.push(spec.version.clone());
        }

        let output = self.run(&args).await?;
        if !output.status.success() {
            anyhow::bail!(
                "helm upgrade {} failed: {}",
                spec.release_name,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
