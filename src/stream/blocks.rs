//! Per-content-block accumulators (§4.3): one for tool-use (accumulates
//! partial-JSON fragments), one for text, one for thinking.

use serde_json::Value;

use super::StreamEvent;
use crate::error::Error;
use crate::message::parse_tool_call;

/// A handler for one open content-block index. `on_delta` may emit
/// events eagerly (text/thinking); `finalize` runs once, on
/// `content_block_stop`.
pub trait BlockHandler: Send {
    /// Handle one streamed delta fragment, optionally emitting an event
    /// immediately (used by text/thinking for low-latency streaming).
    fn on_delta(&mut self, delta: &Value) -> Option<StreamEvent>;

    /// Finalize the block at `content_block_stop`. Returns at most one
    /// terminal event for this block.
    fn finalize(&mut self) -> Option<StreamEvent>;
}

/// Accumulates partial-JSON fragments for a `tool_use` block; on
/// finalize, concatenates, parses once, and dispatches to the message
/// parser.
pub struct ToolUseHandler {
    tool_name: String,
    buffer: String,
}

impl ToolUseHandler {
    pub fn new(tool_name: impl Into<String>) -> Self {
        ToolUseHandler {
            tool_name: tool_name.into(),
            buffer: String::new(),
        }
    }
}

impl BlockHandler for ToolUseHandler {
    fn on_delta(&mut self, delta: &Value) -> Option<StreamEvent> {
        if let Some(fragment) = delta.get("partial_json").and_then(Value::as_str) {
            self.buffer.push_str(fragment);
        }
        // Tool-use deltas are buffered, never emitted eagerly.
        None
    }

    fn finalize(&mut self) -> Option<StreamEvent> {
        if self.buffer.trim().is_empty() {
            // Partial JSON that never arrived: discard silently.
            return None;
        }

        let parsed: Value = match serde_json::from_str(&self.buffer) {
            Ok(v) => v,
            Err(e) => {
                return Some(StreamEvent::Error {
                    message: format!("tool_use '{}' JSON parse failure: {e}", self.tool_name),
                    kind: None,
                });
            }
        };

        match parse_tool_call(&self.tool_name, &parsed) {
            Ok(Some(msg)) => Some(StreamEvent::A2uiMessage(msg)),
            Ok(None) => None,
            Err(Error::Stream(reason)) => Some(StreamEvent::Error {
                message: reason,
                kind: Some("MessageParseException".to_string()),
            }),
            Err(other) => Some(StreamEvent::Error {
                message: other.to_string(),
                kind: None,
            }),
        }
    }
}

/// Text blocks emit each delta immediately as it arrives and finalize
/// silently.
#[derive(Default)]
pub struct TextHandler;

impl BlockHandler for TextHandler {
    fn on_delta(&mut self, delta: &Value) -> Option<StreamEvent> {
        delta
            .get("text")
            .and_then(Value::as_str)
            .map(|chunk| StreamEvent::Text(chunk.to_string()))
    }

    fn finalize(&mut self) -> Option<StreamEvent> {
        None
    }
}

/// Thinking (reasoning) blocks emit each delta immediately, and a final
/// event with `is_complete = true` at finalize.
#[derive(Default)]
pub struct ThinkingHandler;

impl BlockHandler for ThinkingHandler {
    fn on_delta(&mut self, delta: &Value) -> Option<StreamEvent> {
        delta.get("thinking").and_then(Value::as_str).map(|chunk| {
            StreamEvent::Thinking {
                chunk: chunk.to_string(),
                is_complete: false,
            }
        })
    }

    fn finalize(&mut self) -> Option<StreamEvent> {
        Some(StreamEvent::Thinking {
            chunk: String::new(),
            is_complete: true,
        })
    }
}
