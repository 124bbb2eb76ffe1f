//! Transport layer - how a serialized request reaches the API
//!
//! Two strategies implement [`Transport`]:
//! - [`DirectTransport`]: HTTPS through reqwest, response chunks decoded as they arrive
//! - [`TunneledTransport`]: hand-written HTTP/1.1 over a stream connection that an
//!   external [`TunnelConnector`] has already set up through a proxy
//!
//! Both drive the caller's [`StreamContext`] and report only the final status.

pub mod direct;
pub mod tcp;
pub mod tunnel;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::streaming::StreamContext;

pub use direct::DirectTransport;
pub use tcp::TcpConnector;
pub use tunnel::{TunnelConnection, TunnelConnector, TunnelSettings, TunneledTransport};

/// Everything a transport needs besides the streaming context
#[derive(Clone, Copy)]
pub struct ApiRequest<'a> {
    pub api_key: &'a str,
    pub api_version: &'a str,
    /// Serialized JSON body
    pub body: &'a [u8],
}

impl std::fmt::Debug for ApiRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("api_version", &self.api_version)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Which strategy carried a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Direct,
    Tunneled,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Direct => write!(f, "direct"),
            TransportKind::Tunneled => write!(f, "tunneled"),
        }
    }
}

/// Failures below the HTTP status level
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("proxy enabled but no tunnel connector configured")]
    NoTunnel,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One way of performing a streaming chat request.
///
/// Implementations feed a 200 body into `ctx` (via [`StreamContext::feed`] or
/// [`StreamContext::deliver`]) and capture any other body verbatim, then
/// return the HTTP status.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn perform(&self, request: &ApiRequest<'_>, ctx: &mut StreamContext) -> Result<u16, TransportError>;
}
