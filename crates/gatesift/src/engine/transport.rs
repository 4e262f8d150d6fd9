//! The transport seam between the probe client and the wire.
//!
//! `ProbeTransport` is the single polymorphic boundary in the engine:
//! production wires [`HttpTransport`] to the gateway, tests substitute a
//! deterministic oracle. One call, one submission; retries live a layer
//! up in the probe client.

use async_trait::async_trait;
use gatesift_protocol::{ProbeError, ScanConfig};
use std::time::Duration;
use tracing::debug;

use crate::engine::request::RequestBuilder;

/// Raw result of one upstream submission, before rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Submits one probe text upstream and returns the raw HTTP outcome.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn submit(&self, text: &str) -> Result<RawResponse, ProbeError>;
}

/// Production transport: POST to the configured chat-completion
/// endpoint with bearer auth and a per-request deadline.
pub struct HttpTransport {
    client: reqwest::Client,
    builder: RequestBuilder,
    api_key: String,
}

impl HttpTransport {
    pub fn new(config: &ScanConfig) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )
            .build()
            .map_err(|e| ProbeError::Transport(format!("client init failed: {e}")))?;

        Ok(Self {
            client,
            builder: RequestBuilder::new(config),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn submit(&self, text: &str) -> Result<RawResponse, ProbeError> {
        let body = self.builder.build(text)?;

        let response = self
            .client
            .post(self.builder.url())
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Transport("request timed out".into())
                } else {
                    ProbeError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Transport(format!("body read failed: {e}")))?;

        debug!(status, body_len = body.len(), "response received");
        Ok(RawResponse { status, body })
    }
}
