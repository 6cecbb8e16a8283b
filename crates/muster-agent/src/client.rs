//! HTTP client for the server's agent surface.

use std::time::Duration;

use anyhow::Context;

use muster_api::{RegisterResponse, RegisterServiceRequest};

/// Thin wrapper over the agent endpoints. Any non-2xx response is an
/// error carrying the response body.
#[derive(Clone)]
pub struct ServerClient {
    base: String,
    http: reqwest::Client,
}

impl ServerClient {
    pub fn new(server: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("build http client")?;
        Ok(Self {
            base: server.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn register(&self, req: &RegisterServiceRequest) -> anyhow::Result<RegisterResponse> {
        let url = format!("{}/v1/agent/service/register", self.base);
        let resp = self.http.put(&url).json(req).send().await?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("register failed: {}", body);
        }
        Ok(resp.json().await?)
    }

    pub async fn deregister(&self, namespace: &str, service: &str, id: &str) -> anyhow::Result<()> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}?ns={}&service={}",
            self.base, id, namespace, service
        );
        let resp = self.http.put(&url).send().await?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("deregister failed: {}", body);
        }
        Ok(())
    }

    /// Report a check outcome: `action` is pass, warn or fail.
    pub async fn check_action(&self, action: &str, check_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/v1/agent/check/{}/{}", self.base, action, check_id);
        let resp = self.http.put(&url).send().await?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("check {} failed: {}", action, body);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ServerClient::new("http://127.0.0.1:8500/").unwrap();
        assert_eq!(client.base, "http://127.0.0.1:8500");
    }
}
