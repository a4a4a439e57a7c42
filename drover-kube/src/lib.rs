//! Drover Kubernetes Client
//!
//! A small, typed client for the parts of the Kubernetes API the execution
//! engine uses: jobs, pods, config maps, secrets and workloads.
//!
//! CRUD calls go straight to the API server over HTTP. Commands inside
//! containers are run through `kubectl exec`, which handles the streaming
//! protocol for us.
//!
//! # Example
//!
//! ```no_run
//! use drover_kube::{KubeApi, KubeClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = KubeClient::new("https://10.0.0.1:6443").with_token("secret");
//!
//!     let pods = client.list_pods("default", "s-task=demo-1").await?;
//!     println!("Found {} pods", pods.len());
//!     Ok(())
//! }
//! ```

mod api;
pub mod error;
mod exec;
mod jobs;
pub mod objects;
mod pods;
mod resources;
mod workloads;

// Re-export commonly used types
pub use api::KubeApi;
pub use error::{KubeError, Result};
pub use objects::*;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// HTTP client for a Kubernetes API server
#[derive(Debug, Clone)]
pub struct KubeClient {
    /// Base URL of the API server (e.g., "https://10.0.0.1:6443")
    base_url: String,
    /// Bearer token sent with every request
    token: Option<String>,
    /// kubectl binary used for exec
    kubectl: String,
    /// HTTP client instance
    client: Client,
}

impl KubeClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the API server
    ///
    /// # Example
    /// ```
    /// use drover_kube::KubeClient;
    ///
    /// let client = KubeClient::new("https://10.0.0.1:6443");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, CA bundles, proxies, etc.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the API server
    /// * `client` - A configured reqwest Client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            kubectl: "kubectl".to_string(),
            client,
        }
    }

    /// Authenticate requests with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// Use a specific kubectl binary for exec
    pub fn with_kubectl(mut self, kubectl: impl Into<String>) -> Self {
        self.kubectl = kubectl.into();
        self
    }

    /// Get the base URL of the API server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(KubeError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| KubeError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response whose body is not needed
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(KubeError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }

    /// Handle a GET response where 404 means "absent"
    async fn handle_optional_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        match self.handle_response(response).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = KubeClient::new("https://10.0.0.1:6443/");
        assert_eq!(client.base_url(), "https://10.0.0.1:6443");
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let client = KubeClient::new("https://10.0.0.1:6443").with_token("");
        assert!(client.token.is_none());
    }
}
