//! Streaming support for LLM responses.
//!
//! Decodes the Anthropic Server-Sent Events stream into accumulated answer
//! text. Bytes arrive in fragments of any size; [`StreamContext::feed`]
//! reassembles lines across calls and each complete `data: ` line is decoded
//! into a [`StreamEvent`].
//!
//! ```text
//! event: content_block_delta
//! data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}
//!
//! data: [DONE]
//! ```

use log::{debug, error};
use serde::Deserialize;

use crate::llm::buffer::{LineBuffer, ResponseBuffer};

/// Prefix carried by every payload line
const DATA_PREFIX: &[u8] = b"data: ";

/// End-of-stream sentinel payload
const DONE_SENTINEL: &[u8] = b"[DONE]";

/// Events received during streaming from the Anthropic API.
///
/// Only the shapes that affect the answer are modelled; every other
/// `type` decodes to [`StreamEvent::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental content for a block
    ContentBlockDelta { delta: Delta },
    /// In-band error envelope
    Error { error: ApiErrorBody },
    /// message_start, ping, content_block_stop and friends
    #[serde(other)]
    Unrecognized,
}

/// Payload of a `content_block_delta` event
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    /// input_json_delta, thinking_delta, ...
    #[serde(other)]
    Other,
}

/// Body of an `error` event
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StreamEvent {
    /// Text carried by a text delta, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
            } => Some(text),
            _ => None,
        }
    }
}

/// Decode one complete SSE line.
///
/// Returns `None` for lines without the `data: ` prefix, for the `[DONE]`
/// sentinel and for payloads that are not valid event JSON.
pub fn parse_sse_line(line: &[u8]) -> Option<StreamEvent> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    if payload == DONE_SENTINEL {
        return None;
    }

    match serde_json::from_slice(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping undecodable SSE payload: {}", e);
            None
        }
    }
}

/// Per-request decoding state: the partial line and the accumulated answer.
#[derive(Debug, Default)]
pub struct StreamContext {
    line: LineBuffer,
    response: ResponseBuffer,
    events: usize,
    truncated_lines: usize,
    last_api_error: Option<String>,
}

impl StreamContext {
    /// Create a context with explicit line and response limits.
    pub fn new(max_line_len: usize, initial_response_capacity: usize, max_response_capacity: usize) -> Self {
        Self {
            line: LineBuffer::new(max_line_len),
            response: ResponseBuffer::new(initial_response_capacity, max_response_capacity),
            events: 0,
            truncated_lines: 0,
            last_api_error: None,
        }
    }

    /// Feed a fragment of the raw stream.
    ///
    /// `\r` is discarded, `\n` ends a line, and bytes past the line limit are
    /// dropped. A partial line at the end of `data` is kept for the next call.
    pub fn feed(&mut self, data: &[u8]) {
        for &byte in data {
            match byte {
                b'\n' => self.finish_line(),
                b'\r' => {}
                _ => {
                    self.line.push(byte);
                }
            }
        }
    }

    fn finish_line(&mut self) {
        if self.line.is_truncated() {
            self.truncated_lines += 1;
            debug!("SSE line truncated to {} bytes", self.line.max_len());
        }

        if !self.line.is_empty()
            && let Some(event) = parse_sse_line(self.line.as_slice())
        {
            self.apply(event);
        }
        self.line.clear();
    }

    /// Apply one decoded event to the accumulated answer.
    pub fn apply(&mut self, event: StreamEvent) {
        self.events += 1;
        match event {
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
            } => self.response.append(text.as_bytes()),
            StreamEvent::Error { error: body } => {
                // informational only, the HTTP status decides the outcome
                if let Some(message) = body.message {
                    error!("API error: {}", message);
                    self.last_api_error = Some(message);
                }
            }
            StreamEvent::ContentBlockDelta { .. } | StreamEvent::Unrecognized => {}
        }
    }

    /// Route a complete response body according to its status.
    ///
    /// A 200 body is decoded as an event stream; any other body is kept
    /// verbatim as the error payload and never decoded.
    pub fn deliver(&mut self, status: u16, body: &[u8]) {
        if status == 200 {
            self.feed(body);
        } else {
            self.capture_error_body(body);
        }
    }

    /// Keep a raw error body, truncated to the accumulator capacity.
    pub fn capture_error_body(&mut self, body: &[u8]) {
        self.response.replace_truncated(body);
    }

    pub fn response(&self) -> &ResponseBuffer {
        &self.response
    }

    /// Decoded events seen so far, recognized or not
    pub fn events(&self) -> usize {
        self.events
    }

    pub fn truncated_lines(&self) -> usize {
        self.truncated_lines
    }

    /// Message of the most recent in-band `error` event
    pub fn last_api_error(&self) -> Option<&str> {
        self.last_api_error.as_deref()
    }
}
