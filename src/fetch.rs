#![allow(async_fn_in_trait)]

use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::error::DeployError;

/// Read-only source of ciphertext bundles, compose files and config templates.
pub trait Fetcher {
    /// GET `path` below the base URL. Missing or empty content is a
    /// [`DeployError::Fetch`].
    async fn fetch(&self, path: &str) -> Result<Vec<u8>>;

    async fn fetch_text(&self, path: &str) -> Result<String> {
        let bytes = self.fetch(path).await?;
        String::from_utf8(bytes)
            .map_err(|_| DeployError::fetch(path, "content is not UTF-8").into())
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("pvestack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url_for(path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DeployError::fetch(&url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeployError::fetch(&url, format!("HTTP {}", status)).into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DeployError::fetch(&url, e.to_string()))?;

        if body.is_empty() {
            return Err(DeployError::fetch(&url, "empty response").into());
        }

        Ok(body.to_vec())
    }
}
