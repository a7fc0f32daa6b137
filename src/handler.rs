//! Proxy/Direct Handler (§4.4): assembles the vendor HTTP request, drives
//! it through the resilience pipeline (circuit breaker, rate limiter,
//! retry policy), and decodes the response body into `ServerEvent`s.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::AuthSource;
use crate::error::{Error, Result};
use crate::metrics::{MetricEvent, MetricsCollector};
use crate::rate_limit::{parse_retry_after, RateLimiter};
use crate::retry::RetryConfig;
use crate::schema::VendorTool;
use crate::stream::ServerEvent;

const DEFAULT_STREAM_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The vendor-facing request body, per §3's `ApiRequest`: messages plus
/// generation controls. Optional fields are omitted from the wire body
/// rather than serialized as null.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub messages: Vec<Value>,
    pub max_tokens: u32,
    pub model: String,
    pub system_instruction: Option<String>,
    pub tools: Vec<VendorTool>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
}

impl ApiRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Value>, max_tokens: u32) -> Self {
        ApiRequest {
            messages,
            max_tokens,
            model: model.into(),
            system_instruction: None,
            tools: Vec::new(),
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<VendorTool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_stop_sequences(mut self, stop_sequences: Vec<String>) -> Self {
        self.stop_sequences = Some(stop_sequences);
        self
    }

    /// Render the wire body, omitting every optional field that is `None`
    /// rather than serializing it as `null`.
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(self.model.clone()));
        body.insert("max_tokens".to_string(), Value::from(self.max_tokens));
        body.insert("messages".to_string(), Value::Array(self.messages.clone()));
        body.insert("stream".to_string(), Value::Bool(true));

        if let Some(system) = &self.system_instruction {
            body.insert("system".to_string(), Value::String(system.clone()));
        }
        if !self.tools.is_empty() {
            body.insert(
                "tools".to_string(),
                serde_json::to_value(&self.tools).expect("VendorTool always serializes"),
            );
        }
        if let Some(t) = self.temperature {
            body.insert("temperature".to_string(), Value::from(t));
        }
        if let Some(p) = self.top_p {
            body.insert("top_p".to_string(), Value::from(p));
        }
        if let Some(k) = self.top_k {
            body.insert("top_k".to_string(), Value::from(k));
        }
        if let Some(stop) = &self.stop_sequences {
            body.insert(
                "stop_sequences".to_string(),
                Value::Array(stop.iter().cloned().map(Value::String).collect()),
            );
        }

        Value::Object(body)
    }
}

/// Drives HTTP requests against the vendor's streaming completion
/// endpoint, wrapping each attempt in the rate limiter, circuit breaker,
/// and retry policy, and decoding the response body as `ServerEvent`s.
pub struct Handler {
    http_client: reqwest::Client,
    base_url: String,
    auth: Option<AuthSource>,
    retry_config: RetryConfig,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsCollector>,
    stream_inactivity_timeout: Duration,
}

impl Handler {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(Error::Network)?;

        Ok(Handler {
            http_client,
            base_url: base_url.into(),
            auth: api_key.map(AuthSource::Token),
            retry_config: RetryConfig::default(),
            rate_limiter: Arc::new(RateLimiter::new(5.0, 5.0)),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                "handler",
                crate::circuit_breaker::CircuitBreakerConfig::defaults(),
            )),
            metrics: Arc::new(MetricsCollector::new(1000)),
            stream_inactivity_timeout: DEFAULT_STREAM_INACTIVITY_TIMEOUT,
        })
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = breaker;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_stream_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.stream_inactivity_timeout = timeout;
        self
    }

    /// Override the bearer-auth source (e.g. a `ProxyConfig`'s
    /// `authToken`/`tokenProvider`), superseding the `api_key` passed to
    /// `new`. Resolved fresh on every attempt, so a `Provider` can hand
    /// back a rotated token on retry.
    pub fn with_auth_source(mut self, auth: AuthSource) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    #[cfg(test)]
    pub(crate) fn has_auth(&self) -> bool {
        self.auth.is_some()
    }

    /// Issue the streaming request. The connection attempt (but not the
    /// body) is protected by the circuit breaker, rate limiter, and
    /// retry policy; once bytes start arriving, transport/parse failures
    /// surface as `Err` items in the returned stream without this
    /// function itself failing.
    pub async fn create_stream(
        &self,
        request: ApiRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<ServerEvent>> + Send>>> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("a2ui_request", request_id = %request_id, model = %request.model);
        let started_at = Instant::now();

        async {
            self.circuit_breaker.check_state()?;

            self.metrics.emit(MetricEvent::RequestStart {
                endpoint: format!("{}/v1/messages", self.base_url),
                model: Some(request.model.clone()),
                timestamp_ms: 0,
                request_id: Some(request_id.clone()),
            });

            let body = request.to_body();
            let url = format!("{}/v1/messages", self.base_url);
            let client = &self.http_client;
            let auth = self.auth.clone();
            let circuit_breaker = self.circuit_breaker.clone();
            let rate_limiter = self.rate_limiter.clone();
            let metrics = self.metrics.clone();
            let retry_config = self.retry_config.clone();
            let rid = request_id.clone();

            let mut attempt = 0u32;
            let response = loop {
                let url = url.clone();
                let body = body.clone();
                let auth = auth.clone();
                let metrics_for_attempt = metrics.clone();
                let rid_for_attempt = rid.clone();
                let rate_limiter_for_429 = rate_limiter.clone();

                let outcome = rate_limiter
                    .execute(|| async move {
                        let mut req = client.post(&url).json(&body);
                        if let Some(auth) = &auth {
                            req = req.bearer_auth(auth.resolve());
                        }
                        let response = req.send().await.map_err(Error::Network)?;
                        if response.status().is_success() {
                            Ok(response)
                        } else {
                            let status = response.status().as_u16();
                            let retry_after = parse_retry_after(
                                response
                                    .headers()
                                    .get("retry-after")
                                    .and_then(|v| v.to_str().ok()),
                            );
                            rate_limiter_for_429
                                .record_rate_limit(status, retry_after)
                                .await;
                            Err(Error::from_status(status, retry_after))
                        }
                    })
                    .await;

                match outcome {
                    Ok(response) => break response,
                    Err(err) => {
                        circuit_breaker.record_failure();
                        let retry = retry_config.should_retry(&err, attempt);
                        metrics_for_attempt.emit(MetricEvent::RetryAttempt {
                            attempt,
                            max_attempts: retry_config.max_attempts,
                            delay_ms: retry_config.get_delay(attempt as i64).as_millis() as u64,
                            reason: err.to_string(),
                            status_code: err.status_code(),
                            timestamp_ms: 0,
                            request_id: Some(rid_for_attempt.clone()),
                        });
                        if !retry {
                            metrics_for_attempt.emit(MetricEvent::RequestFailure {
                                duration_ms: 0,
                                error_type: format!("{err:?}"),
                                error_message: err.to_string(),
                                status_code: err.status_code(),
                                total_retries: Some(attempt),
                                is_retryable: Some(err.is_retryable()),
                                timestamp_ms: 0,
                                request_id: Some(rid_for_attempt.clone()),
                            });
                            return Err(err);
                        }
                        let delay = retry_config.get_delay(attempt as i64);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            };

            self.circuit_breaker.record_success();

            let byte_stream = response.bytes_stream();
            let inactivity_timeout = self.stream_inactivity_timeout;
            let decoded = decode_sse(byte_stream);
            let watched = watch_inactivity(
                decoded,
                inactivity_timeout,
                self.metrics.clone(),
                request_id.clone(),
            );
            let tracked = track_outcome(
                watched,
                self.metrics.clone(),
                request_id,
                started_at,
                attempt,
            );

            Ok(Box::pin(tracked) as Pin<Box<dyn Stream<Item = Result<ServerEvent>> + Send>>)
        }
        .instrument(span)
        .await
    }
}

/// Decode a byte stream as Server-Sent Events, tolerantly: malformed JSON
/// in a single event surfaces as one `Err` item without ending the
/// stream; the `[DONE]` sentinel is consumed silently.
fn decode_sse<S, E>(bytes: S) -> impl Stream<Item = Result<ServerEvent>>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use eventsource_stream::Eventsource;

    bytes.eventsource().filter_map(|item| async move {
        match item {
            Ok(event) => {
                if event.data == "[DONE]" {
                    None
                } else {
                    match serde_json::from_str::<ServerEvent>(&event.data) {
                        Ok(server_event) => Some(Ok(server_event)),
                        Err(e) => Some(Err(Error::stream(format!(
                            "failed to parse server event: {e}"
                        )))),
                    }
                }
            }
            Err(e) => Some(Err(Error::stream(format!("SSE transport error: {e}")))),
        }
    })
}

/// Apply a stream-inactivity watchdog: if no item arrives within
/// `timeout` of the previous one, emit one final `StreamInactivity`
/// error and end the stream. The per-item deadline itself is tracked by
/// `tokio_stream`'s `Timeout` adapter; this just decides what happens
/// the first time it fires.
fn watch_inactivity<S>(
    inner: S,
    timeout: Duration,
    metrics: Arc<MetricsCollector>,
    request_id: String,
) -> impl Stream<Item = Result<ServerEvent>>
where
    S: Stream<Item = Result<ServerEvent>> + Send + 'static,
{
    enum State<S> {
        Active(Pin<Box<S>>),
        Done,
    }

    let timed = tokio_stream::StreamExt::timeout(inner, timeout);

    futures::stream::unfold(State::Active(Box::pin(timed)), move |state| {
        let metrics = metrics.clone();
        let request_id = request_id.clone();
        async move {
            let State::Active(mut stream) = state else {
                return None;
            };
            match stream.next().await {
                Some(Ok(item)) => Some((item, State::Active(stream))),
                None => None,
                Some(Err(_elapsed)) => {
                    metrics.emit(MetricEvent::StreamInactivity {
                        timeout_ms: timeout.as_millis() as u64,
                        last_activity_ms: 0,
                        timestamp_ms: 0,
                        request_id: Some(request_id),
                    });
                    Some((Err(Error::timeout(timeout)), State::Done))
                }
            }
        }
    })
}

/// Track one request's streamed outcome: emit `RequestSuccess` once the
/// stream ends cleanly, or `RequestFailure` the moment a terminal `Err`
/// item flows through (transport/timeout errors that end the stream;
/// recoverable mid-stream parse errors per §4.3 do not end it and so
/// never reach this combinator as a terminal event). `total_retries` is
/// the number of attempts the retry loop consumed before this stream
/// started.
fn track_outcome<S>(
    inner: S,
    metrics: Arc<MetricsCollector>,
    request_id: String,
    started_at: Instant,
    total_retries: u32,
) -> impl Stream<Item = Result<ServerEvent>>
where
    S: Stream<Item = Result<ServerEvent>> + Send + 'static,
{
    struct Tracker {
        first_token_at: Option<Instant>,
        tokens_received: u64,
        terminated: bool,
    }

    futures::stream::unfold(
        (
            Box::pin(inner),
            Tracker { first_token_at: None, tokens_received: 0, terminated: false },
        ),
        move |(mut stream, mut tracker)| {
            let metrics = metrics.clone();
            let request_id = request_id.clone();
            async move {
                match stream.next().await {
                    Some(Ok(item)) => {
                        if tracker.first_token_at.is_none() {
                            tracker.first_token_at = Some(Instant::now());
                        }
                        tracker.tokens_received += 1;
                        Some((Ok(item), (stream, tracker)))
                    }
                    Some(Err(err)) => {
                        // `Timeout` is the only terminal error produced by
                        // `watch_inactivity`; decode_sse's per-line parse
                        // errors are recoverable and the stream continues.
                        tracker.terminated = matches!(err, Error::Timeout(_));
                        metrics.emit(MetricEvent::RequestFailure {
                            duration_ms: started_at.elapsed().as_millis() as u64,
                            error_type: format!("{err:?}"),
                            error_message: err.to_string(),
                            status_code: err.status_code(),
                            total_retries: Some(total_retries),
                            is_retryable: Some(err.is_retryable()),
                            timestamp_ms: 0,
                            request_id: Some(request_id),
                        });
                        Some((Err(err), (stream, tracker)))
                    }
                    None => {
                        if !tracker.terminated {
                            metrics.emit(MetricEvent::RequestSuccess {
                                duration_ms: started_at.elapsed().as_millis() as u64,
                                total_retries: Some(total_retries),
                                first_token_ms: tracker
                                    .first_token_at
                                    .map(|t| t.duration_since(started_at).as_millis() as u64),
                                tokens_received: Some(tracker.tokens_received),
                                timestamp_ms: 0,
                                request_id: Some(request_id),
                            });
                        }
                        None
                    }
                }
            }
        },
    )
}
