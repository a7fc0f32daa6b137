//! # a2ui-adapter
//!
//! A client-side protocol adapter that converts a streaming LLM's
//! tool-use responses into the A2UI generative-UI protocol.
//!
//! The crate is organized around four subsystems, each its own module:
//!
//! - [`schema`]: converts A2UI tool schemas into the vendor's tool-use
//!   shape and validates tool-call arguments against them.
//! - [`stream`]: an event-driven parser that turns the vendor's raw
//!   server-sent events into typed [`stream::StreamEvent`]s, including
//!   assembling partial tool-use JSON into [`message::A2uiMessage`]s.
//! - The resilience pipeline ([`retry`], [`rate_limit`],
//!   [`circuit_breaker`], [`metrics`]): exponential backoff, a token
//!   bucket rate limiter, a three-state circuit breaker, and a
//!   broadcast metrics bus, composed by [`handler`].
//! - [`binding`]: a widget-to-data-model binding engine with LRU-capped
//!   derived notifiers for one-way and two-way bindings.
//!
//! [`handler::Handler`] drives one HTTP request through the resilience
//! pipeline and decodes its body into `ServerEvent`s; [`facade::ContentGeneratorFacade`]
//! ties a handler and stream parser together behind a single
//! `send_request` call and fans the result out onto broadcast channels.

pub mod binding;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod facade;
pub mod handler;
pub mod message;
pub mod metrics;
pub mod path;
pub mod rate_limit;
pub mod retry;
pub mod schema;
pub mod stream;

pub use binding::{
    BindingDefinition, BindingEngine, BindingMode, DataModel, Notifier, ReactiveValue,
    SubscriptionHandle, TransformFn, WidgetBinding,
};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{
    AuthSource, BaseConfig, BaseConfigBuilder, BindingConfig, BindingConfigBuilder, Config,
    ConfigBuilder, ProxyConfig, ProxyConfigBuilder, TopK, TopP,
};
pub use error::{ContentGeneratorError, Error, Result};
pub use facade::{ContentGeneratorFacade, ThinkingChunk};
pub use handler::{ApiRequest, Handler};
pub use message::{A2uiMessage, BindingSpec, DataBinding, DataBindingEntry, WidgetNode};
pub use metrics::{MetricEvent, MetricsCollector, MetricsSnapshot};
pub use path::PathExpr;
pub use rate_limit::{parse_retry_after, RateLimiter};
pub use retry::RetryConfig;
pub use schema::{
    generate_tool_instructions, to_vendor_tools, to_vendor_tools_checked, validate_tool_input,
    A2uiToolSchema, ToolConversionException, ValidationError, ValidationResult, VendorTool,
};
pub use stream::{BlockHandler, ServerEvent, StreamEvent, StreamParser};

/// Re-exports the crate's full public surface for a single glob import.
pub mod prelude {
    pub use crate::binding::{BindingDefinition, BindingEngine, BindingMode, DataModel, Notifier};
    pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use crate::config::{AuthSource, BaseConfig, Config, ProxyConfig, TopK, TopP};
    pub use crate::error::{ContentGeneratorError, Error, Result};
    pub use crate::facade::{ContentGeneratorFacade, ThinkingChunk};
    pub use crate::handler::{ApiRequest, Handler};
    pub use crate::message::{A2uiMessage, WidgetNode};
    pub use crate::metrics::{MetricEvent, MetricsCollector, MetricsSnapshot};
    pub use crate::path::PathExpr;
    pub use crate::rate_limit::RateLimiter;
    pub use crate::retry::RetryConfig;
    pub use crate::schema::{A2uiToolSchema, VendorTool};
    pub use crate::stream::{ServerEvent, StreamEvent, StreamParser};
}
