//! LLM Client Layer - Anthropic Messages API over a streaming transport
//!
//! This module provides:
//! - Request body construction
//! - SSE stream decoding into accumulated text
//! - Growable buffers with explicit truncation policy
//! - The chat orchestrator

pub mod buffer;
pub mod chat;
pub mod request;
pub mod streaming;

pub use buffer::{GrowableBuffer, LineBuffer, ResponseBuffer};
pub use chat::{ChatClient, ChatSettings, NO_RESPONSE_MESSAGE, write_c_string};
pub use request::{ChatRequest, Message, Role, parse_messages};
pub use streaming::{ApiErrorBody, Delta, StreamContext, StreamEvent, parse_sse_line};
