// src/core/config.rs

//! Client configuration.
//!
//! A `ClientConfig` is validated once and never changes afterwards. It can be
//! assembled with [`ClientConfig::builder`] or converted from the flat
//! [`ClientOptions`] set that front ends (CLI flags, JSON files) produce.

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

// --- Defaults ---

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_FACTOR: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_REDIRECTS: usize = 30;
pub const DEFAULT_POOL_SIZE: usize = 100;
pub const DEFAULT_ACQUIRE_WAIT: Duration = Duration::from_millis(250);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

const PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// Where the outgoing User-Agent comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// Pick one browser identity at random when the client is built.
    Auto,
    /// Use this string verbatim.
    Fixed(String),
}

/// Bounds for the connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_total: usize,
    pub max_per_route: usize,
    /// How long an acquire may wait for a free slot before failing.
    pub acquire_wait: Duration,
    /// Idle connections older than this are discarded instead of reused.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: DEFAULT_POOL_SIZE,
            max_per_route: DEFAULT_POOL_SIZE,
            acquire_wait: DEFAULT_ACQUIRE_WAIT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Validated, immutable settings for one `HttpClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    timeout: Duration,
    identity: IdentitySource,
    proxy: Option<Url>,
    delay: Duration,
    max_retries: u32,
    verify_tls: bool,
    retry_post: bool,
    max_redirects: usize,
    backoff_factor: Duration,
    backoff_cap: Duration,
    pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            identity: IdentitySource::Auto,
            proxy: None,
            delay: Duration::ZERO,
            max_retries: DEFAULT_MAX_RETRIES,
            verify_tls: false,
            retry_post: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            pool: PoolConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder { config: ClientConfig::default() }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn identity(&self) -> &IdentitySource {
        &self.identity
    }

    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    /// Pacing delay slept before every request.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    pub fn retry_post(&self) -> bool {
        self.retry_post
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    pub fn backoff_factor(&self) -> Duration {
        self.backoff_factor
    }

    pub fn backoff_cap(&self) -> Duration {
        self.backoff_cap
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }
}

/// Builder for [`ClientConfig`]. Nothing is checked until [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.config.identity = IdentitySource::Fixed(identity.into());
        self
    }

    pub fn auto_identity(mut self) -> Self {
        self.config.identity = IdentitySource::Auto;
        self
    }

    pub fn proxy(mut self, proxy: Url) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.config.verify_tls = verify;
        self
    }

    /// Allow automatic retries of POST requests. Off by default because a
    /// replayed POST can repeat side effects on the target.
    pub fn retry_post(mut self, retry: bool) -> Self {
        self.config.retry_post = retry;
        self
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    pub fn backoff_factor(mut self, factor: Duration) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    pub fn backoff_cap(mut self, cap: Duration) -> Self {
        self.config.backoff_cap = cap;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.config.pool = pool;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let mut config = self.config;

        if config.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(config.timeout));
        }
        if config.pool.max_total == 0 || config.pool.max_per_route == 0 {
            return Err(ConfigError::InvalidPoolBounds {
                max_total: config.pool.max_total,
                max_per_route: config.pool.max_per_route,
            });
        }
        // A single route can never hold more than the whole pool.
        config.pool.max_per_route = config.pool.max_per_route.min(config.pool.max_total);

        if let Some(proxy) = &config.proxy {
            if !PROXY_SCHEMES.contains(&proxy.scheme()) {
                return Err(ConfigError::InvalidProxy {
                    url: proxy.to_string(),
                    reason: format!("unsupported scheme `{}`", proxy.scheme()),
                });
            }
        }
        if let IdentitySource::Fixed(identity) = &config.identity {
            if identity.trim().is_empty() {
                return Err(ConfigError::InvalidIdentity(identity.clone()));
            }
        }

        Ok(config)
    }
}

// --- Flat Options ---

/// The flat option set accepted at construction, e.g. from a JSON file:
///
/// ```json
/// { "timeout": 5, "identity": "auto", "proxy": null, "delay": 0.2,
///   "max_retries": 2, "verify_tls": false }
/// ```
///
/// Durations are seconds. `identity` is either a literal User-Agent or `"auto"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    pub timeout: f64,
    pub identity: String,
    pub proxy: Option<String>,
    pub delay: f64,
    pub max_retries: u32,
    pub verify_tls: bool,
    pub retry_post: bool,
    pub max_redirects: usize,
    pub pool_max_total: usize,
    pub pool_max_per_route: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT.as_secs_f64(),
            identity: "auto".to_string(),
            proxy: None,
            delay: 0.0,
            max_retries: DEFAULT_MAX_RETRIES,
            verify_tls: false,
            retry_post: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            pool_max_total: DEFAULT_POOL_SIZE,
            pool_max_per_route: DEFAULT_POOL_SIZE,
        }
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { field, value })
}

impl TryFrom<ClientOptions> for ClientConfig {
    type Error = ConfigError;

    fn try_from(options: ClientOptions) -> Result<Self, Self::Error> {
        let mut builder = ClientConfig::builder()
            .timeout(seconds("timeout", options.timeout)?)
            .delay(seconds("delay", options.delay)?)
            .max_retries(options.max_retries)
            .verify_tls(options.verify_tls)
            .retry_post(options.retry_post)
            .max_redirects(options.max_redirects)
            .pool(PoolConfig {
                max_total: options.pool_max_total,
                max_per_route: options.pool_max_per_route,
                ..PoolConfig::default()
            });

        if !options.identity.eq_ignore_ascii_case("auto") {
            builder = builder.identity(options.identity);
        }
        if let Some(proxy) = options.proxy.filter(|p| !p.trim().is_empty()) {
            let url = Url::parse(&proxy).map_err(|e| ConfigError::InvalidProxy {
                url: proxy.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(url);
        }

        builder.build()
    }
}
