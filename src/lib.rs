//! clawchat - streaming chat completions for constrained clients
//!
//! Sends a chat request to the Anthropic Messages API either directly or
//! through a proxy tunnel, and decodes the server-sent event stream into a
//! single answer string.

pub mod config;
pub mod credentials;
pub mod error;
pub mod llm;
pub mod transport;

pub use error::{ChatError, Result};
