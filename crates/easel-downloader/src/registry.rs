//! Client for the remote model registry.
//!
//! Metadata lives at `{base}/api/models/{repo}` and enumerates the repo's
//! files in a `siblings` array; file bytes are served from
//! `{base}/{repo}/resolve/main/{path}` with range-request support.

use serde::Deserialize;
use url::Url;

use crate::error::DownloadError;

/// One file entry in a repo's metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoFile {
    /// Path relative to the repo root.
    pub rfilename: String,
    #[serde(default)]
    pub size: Option<i64>,
}

/// Registry metadata for one repo.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoMetadata {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub siblings: Vec<RepoFile>,
}

/// HTTP client for one registry endpoint.
#[derive(Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    /// `base_url` without a trailing slash, e.g. `https://huggingface.co`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetch and decode a repo's metadata. This is also the validity check
    /// used before a download starts.
    pub async fn model_info(&self, repo: &str) -> Result<RepoMetadata, DownloadError> {
        let url = format!("{}/api/models/{}", self.base_url, repo);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url,
            });
        }

        response
            .json::<RepoMetadata>()
            .await
            .map_err(|e| DownloadError::Registry(e.to_string()))
    }

    /// The download URL for one file, with every path component
    /// percent-encoded.
    pub fn resolve_url(&self, repo: &str, path: &str) -> Result<String, DownloadError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| DownloadError::Registry(format!("bad registry base: {e}")))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| DownloadError::Registry("registry base cannot carry a path".into()))?;
            segments.extend(repo.split('/'));
            segments.extend(["resolve", "main"]);
            segments.extend(path.split('/'));
        }
        Ok(url.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
