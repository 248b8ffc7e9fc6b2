use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::ServiceError;

use super::manifest::Manifest;

/// A place the raw catalog document can be loaded from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> Result<Manifest, ServiceError>;
}

/// Contents-API response for a single file read. The `sha` integrity token is
/// required by the editing workflow for optimistic-concurrency writes; the
/// read path parses and ignores it.
#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    #[allow(dead_code)]
    #[serde(default)]
    sha: String,
}

/// Reads the catalog document from a version-controlled content store
/// (GitHub contents API), authenticated with a bearer credential.
pub struct GithubContentSource {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    branch: String,
    path: String,
    token: String,
}

impl GithubContentSource {
    pub fn new(
        repo: String,
        branch: String,
        path: String,
        token: String,
    ) -> Result<Self, ServiceError> {
        Self::with_api_base("https://api.github.com".to_string(), repo, branch, path, token)
    }

    /// Base URL override, used by tests to point at a stub server.
    pub fn with_api_base(
        api_base: String,
        repo: String,
        branch: String,
        path: String,
        token: String,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("catalog http client: {}", e)))?;
        Ok(Self {
            client,
            api_base,
            repo,
            branch,
            path,
            token,
        })
    }
}

#[async_trait]
impl CatalogSource for GithubContentSource {
    async fn fetch(&self) -> Result<Manifest, ServiceError> {
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.api_base, self.repo, self.path, self.branch
        );
        debug!(repo = %self.repo, branch = %self.branch, "fetching catalog document");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "menu-concierge-api")
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("catalog fetch: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "catalog fetch returned {}",
                response.status()
            )));
        }

        let contents: ContentsResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("catalog payload: {}", e)))?;

        // Contents API base64 wraps lines; strip whitespace before decoding.
        let cleaned: String = contents
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| ServiceError::ExternalServiceError(format!("catalog decode: {}", e)))?;

        let manifest: Manifest = serde_json::from_slice(&decoded)
            .map_err(|e| ServiceError::ExternalServiceError(format!("catalog parse: {}", e)))?;
        Ok(manifest)
    }
}

/// Local on-disk fallback copy of the catalog document.
pub struct LocalManifestSource {
    path: PathBuf,
}

impl LocalManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for LocalManifestSource {
    async fn fetch(&self) -> Result<Manifest, ServiceError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            warn!(path = %self.path.display(), "local catalog read failed: {}", e);
            ServiceError::ExternalServiceError(format!("local catalog read: {}", e))
        })?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| ServiceError::ExternalServiceError(format!("local catalog parse: {}", e)))?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn local_source_reads_manifest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sections":{{"hot_drinks":{{"en":"Hot Drinks","items":[{{"id":"latte","arName":"لاتيه"}}]}}}}}}"#
        )
        .unwrap();

        let source = LocalManifestSource::new(file.path());
        let manifest = source.fetch().await.unwrap();
        assert_eq!(manifest.sections["hot_drinks"].items[0].id, "latte");
    }

    #[tokio::test]
    async fn local_source_missing_file_is_an_error() {
        let source = LocalManifestSource::new("/nonexistent/manifest.json");
        assert!(source.fetch().await.is_err());
    }

    #[tokio::test]
    async fn local_source_rejects_malformed_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json at all").unwrap();

        let source = LocalManifestSource::new(file.path());
        assert!(source.fetch().await.is_err());
    }
}
