//! Error types for clawchat
//!
//! Centralized error handling using thiserror. The `Display` output of
//! [`ChatError`] is exactly the text handed back to callers of a chat.

use thiserror::Error;

use crate::credentials::StoreError;
use crate::transport::TransportError;

/// Maximum number of characters of a server error body carried in [`ChatError::Http`]
pub const ERROR_BODY_PREVIEW_CHARS: usize = 200;

/// All failures a chat call or a credential update can surface
#[derive(Debug, Error)]
pub enum ChatError {
    /// No API key has been configured; nothing was sent
    #[error("Error: No API key configured")]
    NoCredential,

    /// The request body could not be serialized
    #[error("Error: Failed to build request")]
    Build(#[source] serde_json::Error),

    /// Connection, write, read or timeout failure; no status available
    #[error("Error: HTTP request failed ({0})")]
    Transport(#[from] TransportError),

    /// The server answered with a non-200 status
    #[error("API error (HTTP {status}){}", body_suffix(.body))]
    Http { status: u16, body: Option<String> },

    /// Credential persistence failed
    #[error("Error: Credential store failed ({0})")]
    Store(#[from] StoreError),
}

impl ChatError {
    /// Build an HTTP error, keeping at most the first 200 characters of the body
    pub fn http(status: u16, body: &[u8]) -> Self {
        let body = if body.is_empty() {
            None
        } else {
            Some(
                String::from_utf8_lossy(body)
                    .chars()
                    .take(ERROR_BODY_PREVIEW_CHARS)
                    .collect(),
            )
        };
        ChatError::Http { status, body }
    }

    /// Status code for HTTP errors
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn body_suffix(body: &Option<String>) -> String {
    match body {
        Some(b) => format!(": {}", b),
        None => String::new(),
    }
}

/// Result type alias for clawchat operations
pub type Result<T> = std::result::Result<T, ChatError>;
