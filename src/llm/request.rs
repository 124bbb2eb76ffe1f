//! Request construction for the Anthropic Messages API
//!
//! Builds the streaming request body: model, max_tokens, `stream: true`, the
//! top-level system prompt and the messages array.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatError, Result};

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Interpret the caller's messages argument.
///
/// Valid JSON is passed through untouched. Anything else becomes a single
/// user message carrying the raw text.
pub fn parse_messages(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(messages) => messages,
        Err(_) => serde_json::json!([Message::user(raw)]),
    }
}

/// A streaming chat request, serialized in wire field order
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub max_tokens: u32,
    pub stream: bool,
    pub system: &'a str,
    pub messages: Value,
}

impl<'a> ChatRequest<'a> {
    /// Create a streaming request from a system prompt and a messages argument
    /// that is either a JSON array or free text.
    pub fn new(model: &'a str, max_tokens: u32, system: &'a str, messages: &str) -> Self {
        Self {
            model,
            max_tokens,
            stream: true,
            system,
            messages: parse_messages(messages),
        }
    }

    /// Serialize to the compact JSON POST body
    pub fn to_body(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(ChatError::Build)
    }
}
