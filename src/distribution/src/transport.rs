//! Blob transport between the pipeline and a remote registry.
//!
//! The pipeline only sees [`BlobTransport`]: opaque byte streams
//! addressed by digest plus raw manifest JSON. [`RegistryTransport`]
//! implements it over the distribution HTTP protocol directly, since
//! the manifests exchanged here carry a `crypto` extension field no
//! typed registry client round-trips. Token challenge flows are out of
//! scope; anonymous and basic authentication are supported.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{RequestBuilder, Response, StatusCode};

use enclayer_core::error::{EnclayerError, Result};

use crate::manifest::MANIFEST_MEDIA_TYPE;
use crate::reference::ImageReference;

/// Moves manifests and opaque blobs to and from a remote store.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Fetch the raw manifest JSON for a reference.
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<String>;

    /// Fetch the blob addressed by `digest` into the file at `dest`.
    async fn fetch_blob(&self, reference: &ImageReference, digest: &str, dest: &Path)
        -> Result<()>;

    /// Upload the file at `src` as the blob addressed by `digest`.
    async fn upload_blob(&self, reference: &ImageReference, digest: &str, src: &Path)
        -> Result<()>;

    /// Upload the manifest JSON under the reference's tag; returns the
    /// manifest URL.
    async fn upload_manifest(
        &self,
        reference: &ImageReference,
        media_type: &str,
        body: String,
    ) -> Result<String>;
}

/// Authentication credentials for a registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// No credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Basic authentication.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`, falling back to
    /// anonymous when either is unset.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();
        match (username, password) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => request.basic_auth(user, Some(pass)),
            _ => request,
        }
    }
}

/// Registry-backed transport speaking the distribution HTTP protocol.
pub struct RegistryTransport {
    client: reqwest::Client,
    auth: RegistryAuth,
}

impl Default for RegistryTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-request deadline, sized for large layer blobs.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

impl RegistryTransport {
    pub fn new() -> Self {
        Self::with_auth(RegistryAuth::anonymous())
    }

    pub fn with_auth(auth: RegistryAuth) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, auth }
    }

    /// Base URL of the repository API for a reference. Docker Hub's
    /// registry answers on a different host than its reference name.
    fn repo_url(&self, reference: &ImageReference) -> String {
        let host = match reference.registry.as_str() {
            "docker.io" => "registry-1.docker.io",
            other => other,
        };
        format!("https://{host}/v2/{}", reference.repository)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| EnclayerError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(EnclayerError::Transport(format!(
                "{status} from {}",
                response.url()
            )))
        }
    }
}

#[async_trait]
impl BlobTransport for RegistryTransport {
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<String> {
        let url = format!(
            "{}/manifests/{}",
            self.repo_url(reference),
            reference.manifest_selector()
        );
        tracing::debug!(url = %url, "fetching manifest");

        let request = self
            .auth
            .apply(self.client.get(&url))
            .header(ACCEPT, MANIFEST_MEDIA_TYPE);
        let response = self.send(request).await?;
        response
            .text()
            .await
            .map_err(|e| EnclayerError::Transport(e.to_string()))
    }

    async fn fetch_blob(
        &self,
        reference: &ImageReference,
        digest: &str,
        dest: &Path,
    ) -> Result<()> {
        let url = format!("{}/blobs/{digest}", self.repo_url(reference));
        tracing::debug!(url = %url, "fetching blob");

        let request = self.auth.apply(self.client.get(&url));
        let response = self.send(request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| EnclayerError::Transport(e.to_string()))?;
        std::fs::write(dest, &bytes)?;
        Ok(())
    }

    async fn upload_blob(
        &self,
        reference: &ImageReference,
        digest: &str,
        src: &Path,
    ) -> Result<()> {
        let repo = self.repo_url(reference);

        // Skip the upload when the registry already has the content.
        let head = self
            .auth
            .apply(self.client.head(format!("{repo}/blobs/{digest}")))
            .send()
            .await;
        if let Ok(response) = head {
            if response.status() == StatusCode::OK {
                tracing::debug!(digest = %digest, "blob already present");
                return Ok(());
            }
        }

        // Two-step monolithic upload: POST a session, PUT the bytes.
        let start = self
            .auth
            .apply(self.client.post(format!("{repo}/blobs/uploads/")));
        let response = self.send(start).await?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                EnclayerError::Transport("upload session without location".to_string())
            })?;

        let mut upload_url = if location.starts_with('/') {
            let host = repo
                .split("/v2/")
                .next()
                .unwrap_or(&repo)
                .to_string();
            format!("{host}{location}")
        } else {
            location.to_string()
        };
        upload_url.push(if upload_url.contains('?') { '&' } else { '?' });
        upload_url.push_str(&format!("digest={digest}"));

        let data = std::fs::read(src)?;
        tracing::debug!(digest = %digest, size = data.len(), "uploading blob");

        let put = self
            .auth
            .apply(self.client.put(&upload_url))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data);
        self.send(put).await?;
        Ok(())
    }

    async fn upload_manifest(
        &self,
        reference: &ImageReference,
        media_type: &str,
        body: String,
    ) -> Result<String> {
        let url = format!(
            "{}/manifests/{}",
            self.repo_url(reference),
            reference.manifest_selector()
        );
        tracing::debug!(url = %url, "uploading manifest");

        let put = self
            .auth
            .apply(self.client.put(&url))
            .header(CONTENT_TYPE, media_type)
            .body(body);
        self.send(put).await?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_anonymous_by_default() {
        let auth = RegistryAuth::anonymous();
        assert!(auth.username.is_none());
        assert!(auth.password.is_none());
    }

    #[test]
    fn test_auth_basic() {
        let auth = RegistryAuth::basic("user", "pass");
        assert_eq!(auth.username.as_deref(), Some("user"));
        assert_eq!(auth.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_repo_url_maps_docker_hub_host() {
        let transport = RegistryTransport::new();
        let reference = ImageReference::parse("alpine:3.20").unwrap();
        assert_eq!(
            transport.repo_url(&reference),
            "https://registry-1.docker.io/v2/library/alpine"
        );
    }

    #[test]
    fn test_repo_url_keeps_custom_registry() {
        let transport = RegistryTransport::new();
        let reference = ImageReference::parse("ghcr.io/acme/app:1").unwrap();
        assert_eq!(
            transport.repo_url(&reference),
            "https://ghcr.io/v2/acme/app"
        );
    }
}
