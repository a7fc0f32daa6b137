//! Configuration surface (§6): validated newtypes and fallible builders
//! for every knob the resilience pipeline and handler expose.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::Error;
use crate::retry::RetryConfig;

/// A non-empty `http://` or `https://` endpoint, validated at
/// construction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseUrl(String);

impl BaseUrl {
    pub fn new(url: impl Into<String>) -> crate::Result<Self> {
        let url = url.into();
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::config("baseUrl cannot be empty"));
        }
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(Error::config("baseUrl must start with http:// or https://"));
        }
        Ok(BaseUrl(url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sampling temperature, validated to `0.0..=2.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature(f32);

impl Temperature {
    pub fn new(value: f32) -> crate::Result<Self> {
        if !(0.0..=2.0).contains(&value) {
            return Err(Error::config("temperature must be between 0.0 and 2.0"));
        }
        Ok(Temperature(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

/// Nucleus-sampling threshold, validated to `(0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopP(f32);

impl TopP {
    pub fn new(value: f32) -> crate::Result<Self> {
        if !(value > 0.0 && value <= 1.0) {
            return Err(Error::config("topP must be in (0.0, 1.0]"));
        }
        Ok(TopP(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

/// Top-k sampling cutoff, validated to `>= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopK(u32);

impl TopK {
    pub fn new(value: u32) -> crate::Result<Self> {
        if value < 1 {
            return Err(Error::config("topK must be >= 1"));
        }
        Ok(TopK(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// The base generation configuration: endpoint, credentials, model, and
/// sampling parameters. Constructed via `BaseConfig::builder()`.
#[derive(Debug, Clone)]
pub struct BaseConfig {
    pub base_url: BaseUrl,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<Temperature>,
    pub top_p: Option<TopP>,
    pub top_k: Option<TopK>,
    pub stop_sequences: Option<Vec<String>>,
    pub request_timeout: Duration,
}

impl BaseConfig {
    pub fn builder() -> BaseConfigBuilder {
        BaseConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct BaseConfigBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    stop_sequences: Option<Vec<String>>,
    request_timeout: Option<Duration>,
}

impl BaseConfigBuilder {
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
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

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> crate::Result<BaseConfig> {
        let base_url = BaseUrl::new(
            self.base_url
                .ok_or_else(|| Error::config("baseUrl is required"))?,
        )?;
        let model = self.model.ok_or_else(|| Error::config("model is required"))?;
        if model.trim().is_empty() {
            return Err(Error::config("model cannot be empty"));
        }
        let max_tokens = self.max_tokens.unwrap_or(4096);
        if max_tokens == 0 {
            return Err(Error::config("maxTokens must be > 0"));
        }
        let temperature = self.temperature.map(Temperature::new).transpose()?;
        let top_p = self.top_p.map(TopP::new).transpose()?;
        let top_k = self.top_k.map(TopK::new).transpose()?;

        Ok(BaseConfig {
            base_url,
            api_key: self.api_key,
            model,
            max_tokens,
            temperature,
            top_p,
            top_k,
            stop_sequences: self.stop_sequences,
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(30)),
        })
    }
}

/// Either a fixed bearer token or a callback resolved fresh on every
/// request, per §6's Proxy group: `authToken or tokenProvider`. A
/// provider is consulted on each attempt rather than once at
/// construction so a rotating-credential host can hand back a fresh
/// token per retry.
#[derive(Clone)]
pub enum AuthSource {
    Token(String),
    Provider(Arc<dyn Fn() -> String + Send + Sync>),
}

impl AuthSource {
    pub fn resolve(&self) -> String {
        match self {
            AuthSource::Token(token) => token.clone(),
            AuthSource::Provider(provider) => provider(),
        }
    }
}

impl std::fmt::Debug for AuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthSource::Token(_) => f.write_str("AuthSource::Token(..)"),
            AuthSource::Provider(_) => f.write_str("AuthSource::Provider(..)"),
        }
    }
}

/// The Proxy configuration group (§6): whether to run behind a proxy
/// endpoint, whether/how much conversation history to include in the
/// outbound request, and how the proxy authenticates upstream.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub url: Option<String>,
    pub include_history: bool,
    pub max_history_messages: Option<usize>,
    pub auth: Option<AuthSource>,
}

impl ProxyConfig {
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::default()
    }

    /// Direct (non-proxy) mode: no proxy url, full history included,
    /// no auth override.
    pub fn direct() -> Self {
        ProxyConfig {
            url: None,
            include_history: true,
            max_history_messages: None,
            auth: None,
        }
    }

    /// Truncate `history` to the trailing `max_history_messages`
    /// entries (if set) when `include_history` is enabled, or drop it
    /// entirely when disabled. Applied by the facade before the
    /// current turn's message is appended.
    pub fn apply_history_policy(&self, history: Vec<Value>) -> Vec<Value> {
        if !self.include_history {
            return Vec::new();
        }
        match self.max_history_messages {
            Some(max) if history.len() > max => {
                let mut history = history;
                let start = history.len() - max;
                history.split_off(start)
            }
            _ => history,
        }
    }
}

#[derive(Default)]
pub struct ProxyConfigBuilder {
    url: Option<String>,
    include_history: Option<bool>,
    max_history_messages: Option<usize>,
    auth: Option<AuthSource>,
}

impl ProxyConfigBuilder {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Whether to include prior conversation turns in the outbound
    /// request at all. Defaults to `true`.
    pub fn with_include_history(mut self, include: bool) -> Self {
        self.include_history = Some(include);
        self
    }

    /// Cap the number of trailing history messages sent upstream.
    /// `None` (the default) means no cap.
    pub fn with_max_history_messages(mut self, max: usize) -> Self {
        self.max_history_messages = Some(max);
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(AuthSource::Token(token.into()));
        self
    }

    pub fn with_token_provider(
        mut self,
        provider: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.auth = Some(AuthSource::Provider(Arc::new(provider)));
        self
    }

    pub fn build(self) -> crate::Result<ProxyConfig> {
        if let Some(url) = &self.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::config("proxy url must start with http:// or https://"));
            }
        }
        if let Some(max) = self.max_history_messages {
            if max == 0 {
                return Err(Error::config("maxHistoryMessages must be >= 1"));
            }
        }
        Ok(ProxyConfig {
            url: self.url,
            include_history: self.include_history.unwrap_or(true),
            max_history_messages: self.max_history_messages,
            auth: self.auth,
        })
    }
}

/// Configuration for the binding engine's derived-notifier LRU cache.
#[derive(Debug, Clone, Copy)]
pub struct BindingConfig {
    pub max_cache_size: usize,
}

impl BindingConfig {
    pub fn builder() -> BindingConfigBuilder {
        BindingConfigBuilder::default()
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        BindingConfig { max_cache_size: 100 }
    }
}

#[derive(Default)]
pub struct BindingConfigBuilder {
    max_cache_size: Option<usize>,
}

impl BindingConfigBuilder {
    pub fn with_max_cache_size(mut self, size: usize) -> Self {
        self.max_cache_size = Some(size);
        self
    }

    pub fn build(self) -> crate::Result<BindingConfig> {
        let max_cache_size = self.max_cache_size.unwrap_or(100);
        if max_cache_size == 0 {
            return Err(Error::config("maxCacheSize must be >= 1"));
        }
        Ok(BindingConfig { max_cache_size })
    }
}

/// The complete adapter configuration: base generation settings plus
/// every resilience-pipeline sub-configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub base: BaseConfig,
    pub retry: RetryConfig,
    pub proxy: ProxyConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub binding: BindingConfig,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    base: Option<BaseConfigBuilder>,
    retry: Option<RetryConfig>,
    proxy: Option<ProxyConfigBuilder>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    binding: Option<BindingConfigBuilder>,
}

impl ConfigBuilder {
    pub fn with_base(mut self, base: BaseConfigBuilder) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfigBuilder) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn with_binding(mut self, binding: BindingConfigBuilder) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn build(self) -> crate::Result<Config> {
        let base = self
            .base
            .ok_or_else(|| Error::config("base configuration is required"))?
            .build()?;
        let retry = self.retry.unwrap_or_default();
        retry.validate()?;
        let proxy = self.proxy.unwrap_or_default().build()?;
        let circuit_breaker = self.circuit_breaker.unwrap_or_default();
        circuit_breaker.validate()?;
        let binding = self.binding.unwrap_or_default().build()?;

        Ok(Config {
            base,
            retry,
            proxy,
            circuit_breaker,
            binding,
        })
    }
}
