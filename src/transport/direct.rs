//! Direct transport: HTTPS POST through reqwest
//!
//! Response chunks are pushed into the SSE decoder as soon as they arrive.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;

use crate::llm::streaming::StreamContext;
use crate::transport::{ApiRequest, Transport, TransportError, TransportKind};

/// Anthropic Messages API endpoint
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Overall request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// reqwest-backed transport to a fixed endpoint
pub struct DirectTransport {
    client: Client,
    url: String,
}

impl DirectTransport {
    /// Create a transport for `url` with an overall request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    async fn perform(&self, request: &ApiRequest<'_>, ctx: &mut StreamContext) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header("x-api-key", request.api_key)
            .header("anthropic-version", request.api_version)
            .body(request.body.to_vec())
            .send()
            .await?;

        let status = response.status().as_u16();

        if status == 200 {
            let mut chunks = response.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                debug!("Received {} byte chunk", chunk.len());
                ctx.feed(&chunk);
            }
        } else {
            // keep only what the accumulator can hold
            let limit = ctx.response().capacity().saturating_sub(1);
            let mut body = Vec::new();
            let mut chunks = response.bytes_stream();
            while body.len() < limit {
                let Some(chunk) = chunks.next().await else {
                    break;
                };
                let chunk = chunk?;
                let take = chunk.len().min(limit - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            ctx.capture_error_body(&body);
        }

        Ok(status)
    }
}

impl std::fmt::Debug for DirectTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectTransport").field("url", &self.url).finish()
    }
}
