//! Rate Limiter (§4.6): a token bucket enforced locally, plus reaction to
//! server-side 429 responses via a parsed `retry-after` cooldown.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::error::{Error, Result};
use crate::metrics::{MetricEvent, MetricsCollector};

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    refill_rate_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    cooldown_until: Option<Instant>,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn wait_estimate(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let needed = 1.0 - self.tokens;
        Duration::from_secs_f64(needed / self.refill_rate_per_sec.max(f64::EPSILON))
    }
}

/// Token-bucket rate limiter with a FIFO wait queue and a 429-driven
/// cooldown window. Waiters are admitted strictly in arrival order: each
/// `execute` call takes a ticket, and only the ticket at the head of
/// `queue` is allowed to attempt the bucket; everyone else parks on
/// `notify` until the head changes.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    queue: Mutex<VecDeque<u64>>,
    next_ticket: AtomicU64,
    notify: Notify,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_rate_per_sec: f64) -> Self {
        RateLimiter {
            bucket: Mutex::new(Bucket {
                capacity,
                refill_rate_per_sec,
                tokens: capacity,
                last_refill: Instant::now(),
                cooldown_until: None,
            }),
            queue: Mutex::new(VecDeque::new()),
            next_ticket: AtomicU64::new(0),
            notify: Notify::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Acquire a token (or wait out the cooldown), joining the FIFO
    /// queue tail, then run `thunk`.
    pub async fn execute<F, Fut, T>(&self, thunk: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        {
            let mut q = self.queue.lock().await;
            q.push_back(ticket);
        }

        // Wait for our ticket to reach the head of the queue before ever
        // touching the bucket, so waiters are admitted in arrival order
        // regardless of how their individual sleeps happen to resolve.
        loop {
            let notified = self.notify.notified();
            let is_head = { self.queue.lock().await.front() == Some(&ticket) };
            if is_head {
                break;
            }
            notified.await;
        }

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                if let Some(cooldown_until) = bucket.cooldown_until {
                    if Instant::now() < cooldown_until {
                        Some(cooldown_until - Instant::now())
                    } else {
                        bucket.cooldown_until = None;
                        None
                    }
                } else if bucket.try_take() {
                    None
                } else {
                    Some(bucket.wait_estimate())
                }
            };

            match wait {
                None => break,
                Some(d) if d.is_zero() => continue,
                Some(d) => {
                    tokio::select! {
                        _ = tokio::time::sleep(d) => {},
                        _ = self.notify.notified() => {},
                    }
                }
            }
        }

        {
            let mut q = self.queue.lock().await;
            q.pop_front();
        }
        self.notify.notify_waiters();

        thunk().await
    }

    /// React to a server response: on 429, set cooldown until
    /// `retry_after` elapses; otherwise no-op.
    pub async fn record_rate_limit(&self, status_code: u16, retry_after: Option<Duration>) {
        if status_code != 429 {
            return;
        }
        let d = retry_after.unwrap_or(Duration::from_secs(1));
        {
            let mut bucket = self.bucket.lock().await;
            bucket.cooldown_until = Some(Instant::now() + d);
        }
        self.notify.notify_waiters();
        if let Some(metrics) = &self.metrics {
            metrics.emit(MetricEvent::RateLimit {
                retry_after_ms: Some(d.as_millis() as u64),
                retry_after_header: retry_after.map(|d| d.as_secs().to_string()),
                timestamp_ms: 0,
                request_id: None,
            });
        }
    }

    /// Number of requests currently waiting in the FIFO queue.
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

/// Parse a `retry-after` header value: accepts integer seconds only;
/// returns `None` for null, empty, or non-numeric input (including
/// HTTP-date form, which is unspecified and rejected per spec.md §9).
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?.trim();
    if value.is_empty() {
        return None;
    }
    value.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_runs_immediately_with_available_tokens() {
        let limiter = RateLimiter::new(5.0, 5.0);
        let result = limiter.execute(|| async { Ok::<_, Error>(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn record_rate_limit_sets_cooldown_for_429_only() {
        let limiter = RateLimiter::new(1.0, 1.0);
        limiter.record_rate_limit(200, None).await;
        assert!(limiter.bucket.lock().await.cooldown_until.is_none());

        limiter
            .record_rate_limit(429, Some(Duration::from_millis(50)))
            .await;
        assert!(limiter.bucket.lock().await.cooldown_until.is_some());
    }

    #[tokio::test]
    async fn rate_limiter_delays_at_least_retry_after() {
        let limiter = RateLimiter::new(1.0, 1000.0);
        // drain the single token
        limiter.execute(|| async { Ok::<_, Error>(()) }).await.unwrap();
        limiter
            .record_rate_limit(429, Some(Duration::from_millis(40)))
            .await;

        let start = Instant::now();
        limiter.execute(|| async { Ok::<_, Error>(()) }).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn execute_admits_waiters_in_arrival_order() {
        let limiter = Arc::new(RateLimiter::new(1.0, 2.0));
        // Drain the single token so every task below has to queue.
        limiter.execute(|| async { Ok::<_, Error>(()) }).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4u32 {
            let limiter = limiter.clone();
            let order = order.clone();
            // Stagger task spawns slightly so tickets are issued in order.
            tokio::time::sleep(Duration::from_millis(1)).await;
            handles.push(tokio::spawn(async move {
                limiter
                    .execute(|| async {
                        order.lock().await.push(i);
                        Ok::<_, Error>(())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn queue_len_reflects_waiters_before_and_after_execute() {
        let limiter = Arc::new(RateLimiter::new(1.0, 1.0));
        limiter.execute(|| async { Ok::<_, Error>(()) }).await.unwrap();
        assert_eq!(limiter.queue_len().await, 0);
    }

    #[test]
    fn parse_retry_after_accepts_integer_seconds_only() {
        assert_eq!(parse_retry_after(Some("5")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("")), None);
        assert_eq!(parse_retry_after(None), None);
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2026 07:28:00 GMT")), None);
    }
}
