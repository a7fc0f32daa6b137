//! Metrics Collector (§4.8): a broadcast event bus for observability plus
//! a rolling statistics aggregate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::circuit_breaker::CircuitState;

/// Tagged metric events, each implicitly timestamped and optionally
/// correlated to a request id by the caller.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    RequestStart {
        endpoint: String,
        model: Option<String>,
        timestamp_ms: u64,
        request_id: Option<String>,
    },
    RequestSuccess {
        duration_ms: u64,
        total_retries: Option<u32>,
        first_token_ms: Option<u64>,
        tokens_received: Option<u64>,
        timestamp_ms: u64,
        request_id: Option<String>,
    },
    RequestFailure {
        duration_ms: u64,
        error_type: String,
        error_message: String,
        status_code: Option<u16>,
        total_retries: Option<u32>,
        is_retryable: Option<bool>,
        timestamp_ms: u64,
        request_id: Option<String>,
    },
    RetryAttempt {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
        status_code: Option<u16>,
        timestamp_ms: u64,
        request_id: Option<String>,
    },
    RateLimit {
        retry_after_ms: Option<u64>,
        retry_after_header: Option<String>,
        timestamp_ms: u64,
        request_id: Option<String>,
    },
    CircuitBreakerStateChange {
        circuit_name: String,
        previous_state: CircuitState,
        new_state: CircuitState,
        failure_count: Option<u32>,
        timestamp_ms: u64,
        request_id: Option<String>,
    },
    StreamInactivity {
        timeout_ms: u64,
        last_activity_ms: u64,
        timestamp_ms: u64,
        request_id: Option<String>,
    },
    Latency {
        operation: String,
        duration_ms: u64,
        metadata: Option<serde_json::Value>,
        timestamp_ms: u64,
        request_id: Option<String>,
    },
}

/// A synchronous snapshot of the rolling aggregate (§6: "a synchronous
/// statistics snapshot").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub active: u64,
    pub success: u64,
    pub failure: u64,
    pub retries: u64,
    pub rate_limits: u64,
    pub circuit_opens: u64,
    pub stream_inactivity: u64,
    pub success_rate: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    active: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    retries: AtomicU64,
    rate_limits: AtomicU64,
    circuit_opens: AtomicU64,
    stream_inactivity: AtomicU64,
}

/// Broadcast event bus aggregating request, retry, rate-limit,
/// circuit-breaker, and latency events; maintains rolling percentiles
/// over the last `window_size` latency samples (default 1000).
pub struct MetricsCollector {
    sender: broadcast::Sender<MetricEvent>,
    counters: Counters,
    latencies: Mutex<VecDeque<u64>>,
    window_size: usize,
}

impl MetricsCollector {
    pub fn new(window_size: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        MetricsCollector {
            sender,
            counters: Counters::default(),
            latencies: Mutex::new(VecDeque::with_capacity(window_size)),
            window_size,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to the broadcast bus and fold it into the rolling
    /// aggregate. Subscribers never back-pressure the producer: a full
    /// channel silently drops the oldest unread event for slow
    /// consumers (tokio::sync::broadcast semantics), per spec.md §9.
    pub fn emit(&self, event: MetricEvent) {
        self.fold(&event);
        let _ = self.sender.send(event);
    }

    fn fold(&self, event: &MetricEvent) {
        match event {
            MetricEvent::RequestStart { .. } => {
                self.counters.total.fetch_add(1, Ordering::Relaxed);
                self.counters.active.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::RequestSuccess { duration_ms, .. } => {
                self.counters.active.fetch_sub(1, Ordering::Relaxed);
                self.counters.success.fetch_add(1, Ordering::Relaxed);
                self.push_latency(*duration_ms);
            }
            MetricEvent::RequestFailure { duration_ms, .. } => {
                self.counters.active.fetch_sub(1, Ordering::Relaxed);
                self.counters.failure.fetch_add(1, Ordering::Relaxed);
                self.push_latency(*duration_ms);
            }
            MetricEvent::RetryAttempt { .. } => {
                self.counters.retries.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::RateLimit { .. } => {
                self.counters.rate_limits.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::CircuitBreakerStateChange {
                new_state: CircuitState::Open,
                ..
            } => {
                self.counters.circuit_opens.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::StreamInactivity { .. } => {
                self.counters
                    .stream_inactivity
                    .fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn push_latency(&self, ms: u64) {
        let mut buf = self.latencies.lock().unwrap();
        if buf.len() == self.window_size {
            buf.pop_front();
        }
        buf.push_back(ms);
    }

    /// Zero all counters and clear the latency buffer.
    pub fn reset(&self) {
        self.counters.total.store(0, Ordering::Relaxed);
        self.counters.active.store(0, Ordering::Relaxed);
        self.counters.success.store(0, Ordering::Relaxed);
        self.counters.failure.store(0, Ordering::Relaxed);
        self.counters.retries.store(0, Ordering::Relaxed);
        self.counters.rate_limits.store(0, Ordering::Relaxed);
        self.counters.circuit_opens.store(0, Ordering::Relaxed);
        self.counters
            .stream_inactivity
            .store(0, Ordering::Relaxed);
        self.latencies.lock().unwrap().clear();
    }

    /// Closes the bus. Further `emit` calls are no-ops for existing
    /// subscribers (the broadcast channel reports `SendError` which we
    /// already swallow in `emit`).
    pub fn dispose(&self) {
        self.reset();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let success = self.counters.success.load(Ordering::Relaxed);
        let failure = self.counters.failure.load(Ordering::Relaxed);
        let total_outcomes = success + failure;
        let success_rate = if total_outcomes == 0 {
            0.0
        } else {
            100.0 * success as f64 / total_outcomes as f64
        };

        let mut sorted: Vec<u64> = self.latencies.lock().unwrap().iter().copied().collect();
        sorted.sort_unstable();
        let mean_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };

        MetricsSnapshot {
            total: self.counters.total.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed),
            success,
            failure,
            retries: self.counters.retries.load(Ordering::Relaxed),
            rate_limits: self.counters.rate_limits.load(Ordering::Relaxed),
            circuit_opens: self.counters.circuit_opens.load(Ordering::Relaxed),
            stream_inactivity: self.counters.stream_inactivity.load(Ordering::Relaxed),
            success_rate,
            mean_ms,
            p50_ms: percentile(&sorted, 0.50),
            p95_ms: percentile(&sorted, 0.95),
            p99_ms: percentile(&sorted, 0.99),
        }
    }
}

fn percentile(sorted: &[u64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}
