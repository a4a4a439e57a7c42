//! Object storage for logs, packages and charts

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Object at `key`, `None` when it does not exist
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Object store reached over plain HTTP `PUT`/`GET` on `{base}/{key}`
///
/// Works against S3-compatible gateways that accept bearer tokens, and
/// against presigned bucket URLs.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, bucket: &str) -> Self {
        let endpoint = endpoint.trim_end_matches('/');
        let base_url = if bucket.is_empty() {
            endpoint.to_string()
        } else {
            format!("{}/{}", endpoint, bucket.trim_matches('/'))
        };
        Self::from_url(base_url)
    }

    /// Store rooted at an arbitrary URL, such as a distribution destination
    pub fn from_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client: Client::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let url = self.object_url(key);
        let response = self
            .authorize(self.client.put(&url))
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("upload {} returned {}", url, response.status());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let url = self.object_url(key);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .with_context(|| format!("Failed to read {}", url))?;
                Ok(Some(bytes.to_vec()))
            }
            status => anyhow::bail!("download {} returned {}", url, status),
        }
    }
}

/// Object store kept in memory
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.lock().insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().get(key).cloned())
    }
}
