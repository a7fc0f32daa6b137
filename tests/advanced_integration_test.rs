//! Advanced integration tests
//!
//! Tests that combine multiple subsystems together to verify they work
//! correctly in realistic scenarios: message parsing feeding the binding
//! engine, the resilience pipeline's retry/circuit-breaker/metrics wiring,
//! and the rate limiter's cooldown behavior under a 429 response.

use a2ui_adapter::{
    BindingDefinition, BindingEngine, BindingMode, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, DataBinding, DataModel, Error, MetricEvent, MetricsCollector, Notifier,
    PathExpr, RateLimiter, RetryConfig, TransformFn, WidgetNode,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A trivial in-memory data model, standing in for the host
/// application's reactive store (spec.md §1 out-of-scope collaborator).
struct InMemoryModel {
    cells: Mutex<HashMap<String, Arc<Notifier>>>,
}

impl InMemoryModel {
    fn new() -> Self {
        InMemoryModel {
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn seed(&self, path: &str, value: Value) {
        self.cells
            .lock()
            .unwrap()
            .insert(path.to_string(), Notifier::new(value));
    }
}

impl DataModel for InMemoryModel {
    fn subscribe(&self, path: &PathExpr) -> Arc<Notifier> {
        let key = path.to_dot_notation();
        self.cells
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Notifier::new(Value::Null))
            .clone()
    }

    fn update(&self, path: &PathExpr, value: Value) {
        let key = path.to_dot_notation();
        if let Some(cell) = self.cells.lock().unwrap().get(&key) {
            cell.set(value);
        }
    }
}

/// Test: a `surface_update` tool-call payload parses into widget nodes
/// whose `dataBinding` shorthand the binding engine resolves and
/// subscribes against a live data model, end to end.
#[test]
fn widget_tree_data_binding_resolves_against_live_model() {
    let payload = json!({
        "surfaceId": "main",
        "widgets": [{
            "type": "slider",
            "id": "age_slider",
            "dataBinding": "form.age"
        }]
    });

    let message = a2ui_adapter::A2uiMessage::SurfaceUpdate {
        surface_id: "main".to_string(),
        widgets: vec![serde_json::from_value::<WidgetNode>(
            payload["widgets"][0].clone(),
        )
        .unwrap()],
        append: false,
    };

    let widgets = match message {
        a2ui_adapter::A2uiMessage::SurfaceUpdate { widgets, .. } => widgets,
        _ => unreachable!(),
    };

    let model = InMemoryModel::new();
    model.seed("form.age", json!(30));
    let engine = BindingEngine::new();

    for widget in &widgets {
        let widget_id = widget.id.clone().unwrap_or_default();
        engine.process_widget_bindings("main", &widget_id, widget.data_binding.as_ref(), &model);
    }

    let notifier = engine.get_value_notifier("age_slider", "value").unwrap();
    assert_eq!(notifier.value(), json!(30));

    model.update(&PathExpr::from_dot_notation("form.age"), json!(31));
    assert_eq!(notifier.value(), json!(31));
}

/// Test: a two-way binding with a transform, driven through the whole
/// `DataBinding::PerProperty` parsing path rather than constructed by
/// hand, still dedups identical writes (invariant 4 / scenario E).
#[test]
fn per_property_two_way_binding_parses_and_dedups_writes() {
    let model = InMemoryModel::new();
    model.seed("form.age", json!(30));
    let engine = BindingEngine::new();

    let spec: DataBinding = serde_json::from_value(json!({
        "value": {"path": "form.age", "mode": "twoWay"}
    }))
    .unwrap();

    engine.process_widget_bindings("main", "age_input", Some(&spec), &model);

    // The parsed spec carries no transform; attach one the way a host
    // application would after resolving the binding itself.
    let to_model: TransformFn = Arc::new(|v: &Value| json!(v.as_str().unwrap().parse::<i64>().unwrap()));
    engine.register_binding(
        "main",
        "age_input",
        BindingDefinition {
            property: "value".to_string(),
            path: PathExpr::from_dot_notation("form.age"),
            mode: BindingMode::TwoWay,
            to_widget: None,
            to_model: Some(to_model),
        },
        &model,
    );

    engine.update_from_widget("age_input", "value", json!("31"), &model);
    assert_eq!(
        model.cells.lock().unwrap().get("form.age").unwrap().value(),
        json!(31)
    );

    // A second identical write is a no-op (invariant: at most one
    // `update` per distinct transformed value).
    engine.update_from_widget("age_input", "value", json!("31"), &model);
    assert_eq!(
        model.cells.lock().unwrap().get("form.age").unwrap().value(),
        json!(31)
    );
}

/// Test: circuit breaker wired to a metrics collector emits exactly one
/// `CircuitBreakerStateChange` per transition, observable on the shared
/// broadcast bus — the composition the handler relies on (scenario D).
#[tokio::test]
async fn circuit_breaker_state_changes_are_observable_on_metrics_bus() {
    let metrics = Arc::new(MetricsCollector::new(100));
    let mut rx = metrics.subscribe();

    let breaker = CircuitBreaker::new("upstream", CircuitBreakerConfig::strict())
        .with_metrics(metrics.clone());

    for _ in 0..3 {
        breaker.record_failure();
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(breaker.check_state().is_err());

    let mut saw_open_transition = false;
    while let Ok(event) = rx.try_recv() {
        if let MetricEvent::CircuitBreakerStateChange { new_state, .. } = event {
            if new_state == CircuitState::Open {
                saw_open_transition = true;
            }
        }
    }
    assert!(saw_open_transition);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.circuit_opens, 1);
}

/// Test: the retry policy's backoff schedule and the rate limiter's 429
/// cooldown compose the way the handler's retry loop uses them — a
/// rate-limited attempt waits at least as long as the server's
/// retry-after hint, and the rate-limit metric event is observable
/// (scenario C, invariant 6).
#[tokio::test]
async fn rate_limiter_cooldown_composes_with_retry_backoff() {
    let metrics = Arc::new(MetricsCollector::new(100));
    let mut rx = metrics.subscribe();
    let limiter = RateLimiter::new(1.0, 1000.0).with_metrics(metrics.clone());

    // Drain the single token, then simulate the server's 429 response.
    limiter.execute(|| async { Ok::<_, Error>(()) }).await.unwrap();
    limiter
        .record_rate_limit(429, Some(Duration::from_millis(30)))
        .await;

    let event = rx.recv().await.unwrap();
    match event {
        MetricEvent::RateLimit { retry_after_ms, .. } => {
            assert_eq!(retry_after_ms, Some(30));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let retry = RetryConfig::new().with_max_attempts(3).with_jitter_factor(0.0);
    assert!(retry.should_retry(&Error::rate_limit(Some(Duration::from_millis(30))), 0));

    let start = std::time::Instant::now();
    limiter.execute(|| async { Ok::<_, Error>(()) }).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(25));
}
