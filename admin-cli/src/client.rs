//! HTTPS client for the provisioning endpoint.

use anyhow::{bail, Context, Result};
use enclave_bootstrap::provision::{ProvisionRequest, STATUS_HEADER};
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;

/// Client for one bootstrap instance.
pub struct ProvisioningClient {
    pub base_url: String,
    http: reqwest::Client,
}

impl ProvisioningClient {
    /// Build a client.
    ///
    /// # Arguments
    /// * `base_url` - e.g. `https://instance.example.app:8443`
    /// * `ca_cert` - PEM certificate to trust instead of the built-in roots
    /// * `insecure` - Skip server certificate verification entirely
    pub fn new(base_url: &str, ca_cert: Option<&Path>, insecure: bool) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30));

        if let Some(path) = ca_cert {
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read CA certificate {}", path.display()))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .with_context(|| format!("invalid CA certificate {}", path.display()))?;
            builder = builder.tls_built_in_root_certs(false).add_root_certificate(cert);
        }
        if insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: builder.build().context("failed to build HTTPS client")?,
        })
    }

    /// Value of the status header, or `None` if the endpoint is not answering.
    pub async fn status(&self) -> Option<String> {
        let resp = self.http.get(format!("{}/", self.base_url)).send().await.ok()?;
        resp.headers()
            .get(STATUS_HEADER.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    /// Poll until the endpoint reports it is waiting for secrets.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.status().await {
                return Ok(status);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("{} did not come up within {:?}", self.base_url, timeout);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Submit secrets. Returns whether the instance accepted them.
    pub async fn provision(&self, request: &ProvisionRequest) -> Result<bool> {
        let resp = self
            .http
            .post(format!("{}/", self.base_url))
            .json(request)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base_url))?;

        match resp.status() {
            StatusCode::OK => Ok(true),
            StatusCode::UNAUTHORIZED => Ok(false),
            other => bail!("unexpected response from {}: {}", self.base_url, other),
        }
    }
}
