//! Content Generator Facade (§4.10): the single public entry point tying
//! the handler, stream parser, and broadcast channels together into one
//! `sendRequest`/event-stream surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};

use crate::config::ProxyConfig;
use crate::error::{ContentGeneratorError, Error, Result};
use crate::handler::{ApiRequest, Handler};
use crate::message::A2uiMessage;
use crate::stream::{parse_stream, StreamEvent, StreamParser};

const CHANNEL_CAPACITY: usize = 256;

/// One chunk of "thinking" content, per §3: distinguished from the final
/// chunk so consumers can tell when the thinking phase has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingChunk {
    pub chunk: String,
    pub is_complete: bool,
}

/// Ties a `Handler` and `StreamParser` together behind a single
/// `send_request` entry point, fanning the parsed stream out onto
/// per-kind broadcast channels plus a processing-state watch signal.
/// Only one request may be in flight at a time; a second call while one
/// is active fails fast with `Error::RequestAlreadyInProgress`.
pub struct ContentGeneratorFacade {
    handler: Handler,
    proxy: ProxyConfig,
    parser: Mutex<StreamParser>,
    a2ui_tx: broadcast::Sender<A2uiMessage>,
    text_tx: broadcast::Sender<String>,
    thinking_tx: broadcast::Sender<ThinkingChunk>,
    error_tx: broadcast::Sender<ContentGeneratorError>,
    processing_tx: watch::Sender<bool>,
    in_flight: AtomicBool,
    disposed: AtomicBool,
}

impl ContentGeneratorFacade {
    pub fn new(handler: Handler) -> Self {
        let (a2ui_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (text_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (thinking_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (error_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (processing_tx, _) = watch::channel(false);

        ContentGeneratorFacade {
            handler,
            proxy: ProxyConfig::direct(),
            parser: Mutex::new(StreamParser::new()),
            a2ui_tx,
            text_tx,
            thinking_tx,
            error_tx,
            processing_tx,
            in_flight: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Apply the Proxy configuration group (§6): `includeHistory`,
    /// `maxHistoryMessages`, and `authToken`/`tokenProvider`. The auth
    /// source, if set, supersedes whatever the handler was built with.
    pub fn with_proxy_config(mut self, proxy: ProxyConfig) -> Self {
        if let Some(auth) = proxy.auth.clone() {
            self.handler = self.handler.with_auth_source(auth);
        }
        self.proxy = proxy;
        self
    }

    pub fn subscribe_a2ui(&self) -> broadcast::Receiver<A2uiMessage> {
        self.a2ui_tx.subscribe()
    }

    pub fn subscribe_text(&self) -> broadcast::Receiver<String> {
        self.text_tx.subscribe()
    }

    pub fn subscribe_thinking(&self) -> broadcast::Receiver<ThinkingChunk> {
        self.thinking_tx.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ContentGeneratorError> {
        self.error_tx.subscribe()
    }

    /// Current processing state; `true` from the moment `send_request`
    /// accepts a request until the stream completes or errors.
    pub fn is_processing(&self) -> bool {
        *self.processing_tx.borrow()
    }

    pub fn watch_processing(&self) -> watch::Receiver<bool> {
        self.processing_tx.subscribe()
    }

    /// Send one request, draining its response stream onto the
    /// per-kind broadcast channels. Fails immediately if a request is
    /// already in flight or the facade has been disposed.
    pub async fn send_request(
        &self,
        message: Value,
        history: Option<Vec<Value>>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::config("facade has been disposed"));
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::RequestAlreadyInProgress);
        }

        let _ = self.processing_tx.send(true);
        let result = self.drive_request(message, history, model.into(), max_tokens).await;
        let _ = self.processing_tx.send(false);
        self.in_flight.store(false, Ordering::SeqCst);

        if let Err(err) = &result {
            let _ = self.error_tx.send(ContentGeneratorError::new(err));
        }
        result
    }

    async fn drive_request(
        &self,
        message: Value,
        history: Option<Vec<Value>>,
        model: String,
        max_tokens: u32,
    ) -> Result<()> {
        let mut messages = self.proxy.apply_history_policy(history.unwrap_or_default());
        messages.push(message);

        {
            let mut parser = self.parser.lock().await;
            parser.reset();
        }

        let request = ApiRequest::new(model, messages, max_tokens);
        let server_events = self.handler.create_stream(request).await?;
        let mut events = Box::pin(parse_stream(server_events));

        while let Some(event) = events.next().await {
            self.route(event).await;
        }

        Ok(())
    }

    async fn route(&self, event: StreamEvent) {
        match event {
            StreamEvent::Delta(_) => {}
            StreamEvent::Text(text) => {
                let _ = self.text_tx.send(text);
            }
            StreamEvent::Thinking { chunk, is_complete } => {
                let _ = self.thinking_tx.send(ThinkingChunk { chunk, is_complete });
            }
            StreamEvent::A2uiMessage(message) => {
                let _ = self.a2ui_tx.send(message);
            }
            StreamEvent::Complete => {}
            StreamEvent::Error { message, kind } => {
                let err = Error::stream(match kind {
                    Some(k) => format!("{k}: {message}"),
                    None => message,
                });
                let _ = self.error_tx.send(ContentGeneratorError::new(&err));
            }
        }
    }

    /// Reset the stream parser and mark this facade disposed: further
    /// `send_request` calls fail with a config error. Broadcast channels
    /// are dropped when the facade itself is dropped.
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let _ = self.processing_tx.send(false);
        self.parser.lock().await.reset();
    }
}
