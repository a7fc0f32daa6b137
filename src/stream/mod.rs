//! Stream Parser (§4.3): an event-driven state machine that routes
//! server events to block handlers and emits fully-typed `StreamEvent`s.

mod blocks;

pub use blocks::{BlockHandler, TextHandler, ThinkingHandler, ToolUseHandler};

use std::collections::HashMap;

use futures::Stream;
use serde::Deserialize;
use serde_json::Value;

use crate::message::A2uiMessage;

/// One server-sent event, per the vocabulary in §4.3. Unknown `type`
/// values deserialize into `Other` and are ignored by the parser.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "message_start")]
    MessageStart,
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: u64,
        #[serde(rename = "contentBlock")]
        content_block: ContentBlockStart,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: u64, delta: Value },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: u64 },
    #[serde(rename = "message_delta")]
    MessageDelta,
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "error")]
    Error { error: ServerErrorPayload },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockStart {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerErrorPayload {
    pub message: String,
}

/// The tagged union of events the stream parser emits (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Raw server event, opaque, for callers that want to observe
    /// everything.
    Delta(String),
    Text(String),
    Thinking { chunk: String, is_complete: bool },
    A2uiMessage(A2uiMessage),
    Complete,
    Error { message: String, kind: Option<String> },
}

/// Event-driven state machine: one `BlockHandler` per open content-block
/// index, created on `content_block_start` and torn down on
/// `content_block_stop`.
pub struct StreamParser {
    handlers: HashMap<u64, Box<dyn BlockHandler>>,
    terminated: bool,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        StreamParser {
            handlers: HashMap::new(),
            terminated: false,
        }
    }

    /// Clears all open block handlers. Idempotent.
    pub fn reset(&mut self) {
        self.handlers.clear();
        self.terminated = false;
    }

    /// Whether the parser has seen a terminal event (`message_stop` or
    /// `error`) and should stop reading from the input stream.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed one server event, returning zero or more StreamEvents.
    pub fn process(&mut self, event: ServerEvent) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }

        match event {
            ServerEvent::MessageStart | ServerEvent::MessageDelta | ServerEvent::Ping => {
                Vec::new()
            }
            ServerEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let handler: Box<dyn BlockHandler> = match content_block.block_type.as_str() {
                    "tool_use" => Box::new(ToolUseHandler::new(
                        content_block.name.unwrap_or_default(),
                    )),
                    "text" => Box::new(TextHandler),
                    "thinking" => Box::new(ThinkingHandler),
                    _ => return Vec::new(),
                };
                self.handlers.insert(index, handler);
                Vec::new()
            }
            ServerEvent::ContentBlockDelta { index, delta } => {
                if let Some(handler) = self.handlers.get_mut(&index) {
                    handler.on_delta(&delta).into_iter().collect()
                } else {
                    Vec::new()
                }
            }
            ServerEvent::ContentBlockStop { index } => {
                if let Some(mut handler) = self.handlers.remove(&index) {
                    handler.finalize().into_iter().collect()
                } else {
                    Vec::new()
                }
            }
            ServerEvent::MessageStop => {
                self.terminated = true;
                vec![StreamEvent::Complete]
            }
            ServerEvent::Error { error } => {
                self.terminated = true;
                vec![StreamEvent::Error {
                    message: error.message,
                    kind: None,
                }]
            }
            ServerEvent::Other => Vec::new(),
        }
    }
}

/// Drive a stream of server events through a `StreamParser`, yielding a
/// flat stream of `StreamEvent`s. Malformed JSON in the underlying
/// transport (see `crate::handler`) is represented as `Err` items that
/// this function turns into `StreamEvent::Error` without terminating
/// the output stream, matching §7's propagation policy.
pub fn parse_stream<S>(
    events: S,
) -> impl Stream<Item = StreamEvent>
where
    S: Stream<Item = crate::Result<ServerEvent>>,
{
    use futures::StreamExt;

    events
        .scan(StreamParser::new(), |parser, item| {
            if parser.is_terminated() {
                return futures::future::ready(None);
            }
            let out = match item {
                Ok(event) => parser.process(event),
                Err(e) => vec![StreamEvent::Error {
                    message: e.to_string(),
                    kind: None,
                }],
            };
            futures::future::ready(Some(out))
        })
        .flat_map(futures::stream::iter)
}
