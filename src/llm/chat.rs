//! Chat orchestration
//!
//! [`ChatClient`] owns the credentials and the transports. A call checks the
//! API key, builds the body, runs the selected transport with a fresh
//! [`StreamContext`] and turns the outcome into one text result.

use std::sync::Arc;

use log::{error, info, warn};

use crate::config::Config;
use crate::credentials::{
    API_KEY_KEY, CredentialStore, Credentials, LLM_NAMESPACE, MAX_API_KEY_LEN, MAX_MODEL_LEN, MODEL_KEY,
    truncate_str,
};
use crate::error::{ChatError, Result};
use crate::llm::buffer::{DEFAULT_MAX_LINE_LEN, DEFAULT_MAX_RESPONSE_CAPACITY, DEFAULT_RESPONSE_CAPACITY};
use crate::llm::request::ChatRequest;
use crate::llm::streaming::StreamContext;
use crate::transport::{
    ApiRequest, DirectTransport, TcpConnector, Transport, TransportError, TunneledTransport,
};

/// Returned when a 200 stream carried no text
pub const NO_RESPONSE_MESSAGE: &str = "No response from Claude API";

/// Anthropic API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default max tokens
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Per-request limits and wire constants
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub api_version: String,
    pub max_tokens: u32,
    pub max_line_len: usize,
    pub initial_response_capacity: usize,
    pub max_response_capacity: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            api_version: ANTHROPIC_VERSION.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            initial_response_capacity: DEFAULT_RESPONSE_CAPACITY,
            max_response_capacity: DEFAULT_MAX_RESPONSE_CAPACITY,
        }
    }
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_version: config.llm.api_version.clone(),
            max_tokens: config.llm.max_tokens,
            max_line_len: config.stream.max_line_len,
            initial_response_capacity: config.stream.initial_response_capacity,
            max_response_capacity: config.stream.max_response_capacity,
        }
    }

    fn stream_context(&self) -> StreamContext {
        StreamContext::new(
            self.max_line_len,
            self.initial_response_capacity,
            self.max_response_capacity,
        )
    }
}

/// Copy `src` into `dst` as a NUL-terminated string, truncating to fit.
///
/// Returns the number of bytes copied, not counting the terminator. An empty
/// `dst` receives nothing.
pub fn write_c_string(dst: &mut [u8], src: &[u8]) -> usize {
    let Some(room) = dst.len().checked_sub(1) else {
        return 0;
    };
    let n = src.len().min(room);
    dst[..n].copy_from_slice(&src[..n]);
    dst[n] = 0;
    n
}

/// Chat entry point with its configuration and transports
pub struct ChatClient {
    store: Arc<dyn CredentialStore>,
    credentials: Credentials,
    settings: ChatSettings,
    direct: Arc<dyn Transport>,
    tunneled: Option<Arc<dyn Transport>>,
    proxy_enabled: bool,
}

impl ChatClient {
    /// Create a client that sends directly; add a tunnel with [`ChatClient::with_tunnel`]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        credentials: Credentials,
        settings: ChatSettings,
        direct: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            credentials,
            settings,
            direct,
            tunneled: None,
            proxy_enabled: false,
        }
    }

    /// Build the production client: reqwest direct transport, TCP tunnel,
    /// credentials loaded from `store`.
    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let credentials = Credentials::load(store.as_ref(), &config.llm.default_model)?;
        let direct = DirectTransport::new(config.llm.api_url.clone(), config.llm.timeout())?;
        let tunneled = TunneledTransport::new(Arc::new(TcpConnector), config.tunnel_settings());

        let mut client = Self::new(store, credentials, ChatSettings::from_config(config), Arc::new(direct))
            .with_tunnel(Arc::new(tunneled));
        client.set_proxy_enabled(config.proxy.enabled);
        Ok(client)
    }

    pub fn with_tunnel(mut self, tunneled: Arc<dyn Transport>) -> Self {
        self.tunneled = Some(tunneled);
        self
    }

    /// Route subsequent calls through the tunnel (true) or directly (false)
    pub fn set_proxy_enabled(&mut self, enabled: bool) {
        self.proxy_enabled = enabled;
    }

    pub fn proxy_enabled(&self) -> bool {
        self.proxy_enabled
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Persist a new API key, then use it for subsequent calls
    pub fn set_api_key(&mut self, api_key: &str) -> Result<()> {
        let api_key = truncate_str(api_key, MAX_API_KEY_LEN);
        self.store.set(LLM_NAMESPACE, API_KEY_KEY, api_key)?;
        self.credentials.replace_api_key(api_key);
        info!("API key saved");
        Ok(())
    }

    /// Persist a new model identifier, then use it for subsequent calls
    pub fn set_model(&mut self, model: &str) -> Result<()> {
        let model = truncate_str(model, MAX_MODEL_LEN);
        self.store.set(LLM_NAMESPACE, MODEL_KEY, model)?;
        self.credentials.replace_model(model);
        info!("Model set to: {}", model);
        Ok(())
    }

    fn transport(&self) -> Result<&dyn Transport> {
        if !self.proxy_enabled {
            return Ok(self.direct.as_ref());
        }
        match &self.tunneled {
            Some(tunneled) => Ok(tunneled.as_ref()),
            None => Err(TransportError::NoTunnel.into()),
        }
    }

    /// Run one chat completion.
    ///
    /// `messages` is a JSON messages array, or free text sent as a single user
    /// message. A 200 response without any text yields [`NO_RESPONSE_MESSAGE`].
    pub async fn chat(&self, system_prompt: &str, messages: &str) -> Result<String> {
        if !self.credentials.has_api_key() {
            warn!("Chat requested with no API key configured");
            return Err(ChatError::NoCredential);
        }

        let body = ChatRequest::new(
            self.credentials.model(),
            self.settings.max_tokens,
            system_prompt,
            messages,
        )
        .to_body()?;

        let transport = self.transport()?;
        info!(
            "Calling Claude API (model: {}, body: {} bytes, transport: {})",
            self.credentials.model(),
            body.len(),
            transport.kind()
        );

        let request = ApiRequest {
            api_key: self.credentials.api_key(),
            api_version: &self.settings.api_version,
            body: &body,
        };
        let mut ctx = self.settings.stream_context();

        let status = match transport.perform(&request, &mut ctx).await {
            Ok(status) => status,
            Err(e) => {
                error!("HTTP request failed: {}", e);
                return Err(e.into());
            }
        };

        if status != 200 {
            error!("API returned status {}", status);
            return Err(ChatError::http(status, ctx.response().as_bytes()));
        }

        if ctx.truncated_lines() > 0 || ctx.response().dropped_bytes() > 0 {
            warn!(
                "Response degraded: {} truncated lines, {} dropped bytes",
                ctx.truncated_lines(),
                ctx.response().dropped_bytes()
            );
        }

        if ctx.response().is_empty() {
            return Ok(NO_RESPONSE_MESSAGE.to_string());
        }

        info!("Claude response: {} bytes", ctx.response().len());
        Ok(ctx.response().to_string_lossy())
    }

    /// Run a chat and write the result, or the error message, into `out` as a
    /// NUL-terminated string truncated to fit.
    ///
    /// Returns the bytes written on success.
    pub async fn chat_into(&self, system_prompt: &str, messages: &str, out: &mut [u8]) -> Result<usize> {
        match self.chat(system_prompt, messages).await {
            Ok(text) => Ok(write_c_string(out, text.as_bytes())),
            Err(e) => {
                write_c_string(out, e.to_string().as_bytes());
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("credentials", &self.credentials)
            .field("settings", &self.settings)
            .field("proxy_enabled", &self.proxy_enabled)
            .field("has_tunnel", &self.tunneled.is_some())
            .finish()
    }
}
