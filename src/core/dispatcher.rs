// src/core/dispatcher.rs

//! The single entry point for outbound scan traffic.
//!
//! Every request goes through the same steps: pacing delay, header merge,
//! pooled transport under the retry policy, and finally normalization into a
//! [`RequestOutcome`]. Nothing in here returns an error to the caller; every
//! fault ends up as `RequestOutcome::Failure`.

use crate::core::config::ClientConfig;
use crate::core::error::{ClientError, ConfigError};
use crate::core::identity::select_identity;
use crate::core::models::{FailureReason, HttpMethod, HttpResponse, RequestOutcome, Route};
use crate::core::pool::{ConnectionPool, PoolError, PoolStats};
use crate::core::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::core::transport::{ConnectionStats, PreparedRequest, RawResponse, ReqwestTransport, Transport, TransportFault};
use chrono::Utc;
use rand::Rng;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};
use url::{Url, form_urlencoded};

// --- Request Description ---

/// Per-call overrides. Unset fields fall back to the client configuration.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub follow_redirects: Option<bool>,
    pub verify_tls: Option<bool>,
    pub retry_post: Option<bool>,
    /// Extra headers. They replace default headers of the same name.
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = Some(verify);
        self
    }

    pub fn retry_post(mut self, retry: bool) -> Self {
        self.retry_post = Some(retry);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    Raw { content_type: Option<String>, bytes: Vec<u8> },
}

impl RequestBody {
    pub fn form<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        RequestBody::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub options: RequestOptions,
}

impl Request {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), query: Vec::new(), body: None, options: RequestOptions::default() }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Head, url)
    }

    pub fn post(url: impl Into<String>, body: RequestBody) -> Self {
        Self { body: Some(body), ..Self::new(HttpMethod::Post, url) }
    }

    /// Appends a query parameter to the URL.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

// --- Client ---

/// Counters across the lifetime of one client.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientStats {
    /// Logical requests issued (including ones rejected before sending).
    pub requests: u64,
    /// Transport attempts, retries included.
    pub attempts: u64,
    pub retries: u64,
    /// Logical requests that ended as `Failure`.
    pub failures: u64,
    pub pool: PoolStats,
    /// Socket reuse as seen by the transport.
    pub connections: ConnectionStats,
}

struct ClientInner {
    config: ClientConfig,
    identity: String,
    default_headers: HeaderMap,
    policy: RetryPolicy,
    pool: ConnectionPool,
    transport: Arc<dyn Transport>,
    shutdown: watch::Sender<bool>,
    requests: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

/// Shared, thread-safe dispatch client. Clones share one pool and one identity.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

fn default_headers(identity: &str) -> Result<HeaderMap, ConfigError> {
    let user_agent = HeaderValue::from_str(identity).map_err(|_| ConfigError::InvalidIdentity(identity.to_string()))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, user_agent);
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    Ok(headers)
}

/// Resolves once the shutdown flag flips to `true`.
async fn closed(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            // The client is gone, so nobody can close it any more.
            std::future::pending::<()>().await;
        }
    }
}

impl HttpClient {
    /// Builds a client on the reqwest transport with a system-seeded identity draw.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport), &mut rand::rng())
    }

    /// Builds a client on any transport, drawing the identity from `rng`.
    pub fn with_transport<R: Rng + ?Sized>(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        rng: &mut R,
    ) -> Result<Self, ClientError> {
        let identity = select_identity(config.identity(), rng);
        let default_headers = default_headers(&identity)?;
        let (shutdown, _) = watch::channel(false);
        info!(
            identity = %identity,
            timeout = ?config.timeout(),
            delay = ?config.delay(),
            max_retries = config.max_retries(),
            verify_tls = config.verify_tls(),
            "HTTP client ready."
        );
        Ok(Self {
            inner: Arc::new(ClientInner {
                policy: RetryPolicy::from_config(&config),
                pool: ConnectionPool::new(config.pool().clone()),
                identity,
                default_headers,
                config,
                transport,
                shutdown,
                requests: AtomicU64::new(0),
                attempts: AtomicU64::new(0),
                retries: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        })
    }

    /// The User-Agent every request of this client carries.
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub async fn get(&self, url: &str) -> RequestOutcome {
        self.issue(Request::get(url)).await
    }

    pub async fn head(&self, url: &str) -> RequestOutcome {
        self.issue(Request::head(url)).await
    }

    pub async fn post(&self, url: &str, body: RequestBody) -> RequestOutcome {
        self.issue(Request::post(url, body)).await
    }

    /// Issues one logical request and returns its outcome after any retries.
    pub async fn issue(&self, request: Request) -> RequestOutcome {
        let inner = &self.inner;
        inner.requests.fetch_add(1, Ordering::Relaxed);

        let outcome = if self.is_closed() {
            RequestOutcome::failed(FailureReason::ClientClosed, "client is closed", 0)
        } else {
            match self.prepare(request) {
                Ok((prepared, policy)) => self.dispatch(&prepared, &policy).await,
                Err(outcome) => outcome,
            }
        };

        if let RequestOutcome::Failure(failure) = &outcome {
            inner.failures.fetch_add(1, Ordering::Relaxed);
            warn!(reason = %failure.reason, attempts = failure.attempts, message = %failure.message, "Request failed.");
        }
        outcome
    }

    /// Releases every pooled connection. In-flight requests resolve to
    /// `ClientClosed` right away and later ones never reach the network.
    pub fn close(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        self.inner.pool.close();
        self.inner.transport.close();
        info!("HTTP client closed.");
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub fn stats(&self) -> ClientStats {
        let inner = &self.inner;
        ClientStats {
            requests: inner.requests.load(Ordering::Relaxed),
            attempts: inner.attempts.load(Ordering::Relaxed),
            retries: inner.retries.load(Ordering::Relaxed),
            failures: inner.failures.load(Ordering::Relaxed),
            pool: inner.pool.stats(),
            connections: inner.transport.connections(),
        }
    }

    /// Runs `fut` unless the client gets closed first.
    async fn until_closed<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = closed(self.inner.shutdown.subscribe()) => None,
            output = fut => Some(output),
        }
    }

    fn prepare(&self, request: Request) -> Result<(PreparedRequest, RetryPolicy), RequestOutcome> {
        let inner = &self.inner;
        let invalid = |message: String| RequestOutcome::failed(FailureReason::InvalidRequest, message, 0);

        let mut url = Url::parse(&request.url).map_err(|e| invalid(format!("invalid URL `{}`: {}", request.url, e)))?;
        let route = Route::from_url(&url)
            .ok_or_else(|| invalid(format!("`{}` is not an absolute http/https URL", request.url)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }

        let mut headers = inner.default_headers.clone();
        let body = match request.body {
            None => None,
            Some(RequestBody::Form(pairs)) => {
                let encoded = form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs.iter()).finish();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));
                Some(encoded.into_bytes())
            }
            Some(RequestBody::Raw { content_type, bytes }) => {
                if let Some(content_type) = content_type {
                    let value = HeaderValue::from_str(&content_type)
                        .map_err(|_| invalid(format!("invalid content type `{}`", content_type)))?;
                    headers.insert(header::CONTENT_TYPE, value);
                }
                Some(bytes)
            }
        };

        let options = request.options;
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid(format!("invalid header name `{}`", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid(format!("invalid value for header `{}`", name)))?;
            headers.insert(name, value);
        }

        let policy = match options.retry_post {
            Some(retry_post) => inner.policy.clone().with_retry_post(retry_post),
            None => inner.policy.clone(),
        };

        let prepared = PreparedRequest {
            method: request.method,
            url,
            route,
            headers,
            body,
            timeout: options.timeout.unwrap_or(inner.config.timeout()),
            follow_redirects: options.follow_redirects.unwrap_or(true),
            verify_tls: options.verify_tls.unwrap_or(inner.config.verify_tls()),
        };
        Ok((prepared, policy))
    }

    async fn dispatch(&self, request: &PreparedRequest, policy: &RetryPolicy) -> RequestOutcome {
        let inner = &self.inner;
        let closed_outcome = |attempts: u32| {
            RequestOutcome::failed(FailureReason::ClientClosed, "client closed while the request was pending", attempts)
        };

        let delay = inner.config.delay();
        if !delay.is_zero() {
            debug!(delay = ?delay, "Pacing before request.");
            if self.until_closed(sleep(delay)).await.is_none() {
                return closed_outcome(0);
            }
        }

        let mut state = RetryState::new();
        loop {
            state.begin_attempt();
            inner.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(method = %request.method, url = %request.url, attempt = state.attempts(), "Dispatching attempt.");

            let started = Instant::now();
            let Some(result) = self.until_closed(self.attempt(request)).await else {
                return closed_outcome(state.attempts());
            };
            let elapsed = started.elapsed();

            match policy.decide(request.method, &state, &result) {
                RetryDecision::Retry { delay } => {
                    inner.retries.fetch_add(1, Ordering::Relaxed);
                    let cause = match &result {
                        Ok(response) => format!("status {}", response.status),
                        Err(fault) => fault.reason.to_string(),
                    };
                    info!(url = %request.url, attempt = state.attempts(), backoff = ?delay, cause = %cause, "Retrying request.");
                    state.record_backoff(delay);
                    if self.until_closed(sleep(delay)).await.is_none() {
                        return closed_outcome(state.attempts());
                    }
                }
                RetryDecision::Stop => return finish(result, &state, elapsed),
            }
        }
    }

    async fn attempt(&self, request: &PreparedRequest) -> Result<RawResponse, TransportFault> {
        let inner = &self.inner;
        let lease = inner.pool.acquire(&request.route).await.map_err(|e| match e {
            PoolError::Exhausted { .. } => TransportFault::new(FailureReason::PoolExhausted, e.to_string()),
            PoolError::Closed => TransportFault::new(FailureReason::ClientClosed, e.to_string()),
        })?;

        let result = timeout(request.timeout, inner.transport.send(lease.connection(), request)).await;
        match result {
            Ok(Ok(response)) => {
                lease.release();
                Ok(response)
            }
            Ok(Err(fault)) => {
                lease.discard();
                Err(fault)
            }
            Err(_) => {
                lease.discard();
                Err(TransportFault::new(
                    FailureReason::Timeout,
                    format!("no response within {:?}", request.timeout),
                ))
            }
        }
    }
}

fn finish(result: Result<RawResponse, TransportFault>, state: &RetryState, elapsed: Duration) -> RequestOutcome {
    match result {
        Ok(raw) => {
            debug!(status = raw.status, attempts = state.attempts(), elapsed = ?elapsed, "Request completed.");
            RequestOutcome::Success(HttpResponse {
                status: raw.status,
                url: raw.url,
                headers: raw.headers,
                content_length: raw.body.len(),
                body: raw.body,
                elapsed: elapsed.as_secs_f64(),
                attempts: state.attempts(),
                received_at: Utc::now(),
            })
        }
        Err(fault) => RequestOutcome::failed(fault.reason, fault.message, state.attempts()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::BROWSER_IDENTITIES;
    use crate::core::transport::mock::{ScriptedTransport, Step};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config(max_retries: u32) -> ClientConfig {
        ClientConfig::builder().max_retries(max_retries).build().unwrap()
    }

    fn client(transport: &Arc<ScriptedTransport>, config: ClientConfig) -> HttpClient {
        HttpClient::with_transport(config, transport.clone(), &mut StdRng::seed_from_u64(7)).unwrap()
    }

    /// Paused-clock timers fire on millisecond ticks.
    fn assert_about(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(5),
            "expected about {expected:?}, got {actual:?}"
        );
    }

    fn user_agent(headers: &HeaderMap) -> &str {
        headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_status_is_returned_after_exhaustion() {
        for k in 0..=4u32 {
            let transport = Arc::new(ScriptedTransport::always(Step::Status(503)));
            let client = client(&transport, config(k));

            let outcome = client.get("http://target.test/admin").await;
            assert_eq!(outcome.status(), Some(503), "max_retries={k}");
            assert_eq!(outcome.attempts(), k + 1);
            assert_eq!(transport.attempts(), (k + 1) as usize);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_a_single_attempt() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(404)));
        let client = client(&transport, config(3));

        let outcome = client.get("http://target.test/missing").await;
        assert_eq!(outcome.status(), Some(404));
        assert_eq!(transport.attempts(), 1);
        assert_eq!(client.stats().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_spaced_by_exponential_backoff() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(503)));
        let client = client(&transport, config(3));
        client.get("http://target.test/").await;

        let sent = transport.sent();
        let gaps: Vec<Duration> = sent.windows(2).map(|w| w[1].at - w[0].at).collect();
        assert_eq!(gaps.len(), 3);
        for (gap, expected) in gaps.into_iter().zip([500, 1000, 2000]) {
            assert_about(gap, Duration::from_millis(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_target_times_out_without_retry() {
        let transport = Arc::new(ScriptedTransport::always(Step::Hang));
        let config = ClientConfig::builder().timeout(Duration::from_secs(2)).build().unwrap();
        let client = client(&transport, config);

        let started = Instant::now();
        let outcome = client.get("http://target.test/slow").await;
        assert_eq!(outcome.failure().map(|f| f.reason), Some(FailureReason::Timeout));
        assert_about(started.elapsed(), Duration::from_secs(2));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_timeout_overrides_config() {
        let transport = Arc::new(ScriptedTransport::always(Step::Hang));
        let client = client(&transport, config(0));

        let started = Instant::now();
        let request = Request::get("http://target.test/").options(RequestOptions::default().timeout(Duration::from_millis(300)));
        let outcome = client.issue(request).await;
        assert_eq!(outcome.failure().map(|f| f.reason), Some(FailureReason::Timeout));
        assert_about(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_requests_reuse_the_pooled_connection() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let client = client(&transport, config(0));
        client.get("http://target.test/a").await;
        client.get("http://target.test/b").await;

        let sent = transport.sent();
        assert_eq!(sent[0].connection_id, sent[1].connection_id);
        let stats = client.stats();
        assert_eq!(stats.pool.slots_created, 1);
        assert_eq!(stats.pool.slots_reused, 1);
        assert_eq!(stats.connections, ConnectionStats { opened: 1, reused: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn faulted_connection_is_not_reused() {
        let transport = Arc::new(ScriptedTransport::sequence([Step::Fault(FailureReason::ConnectionReset)], Step::Status(200)));
        let client = client(&transport, config(1));

        let outcome = client.get("http://target.test/").await;
        assert_eq!(outcome.status(), Some(200));
        let sent = transport.sent();
        assert_ne!(sent[0].connection_id, sent[1].connection_id);
        assert_eq!(client.stats().pool.slots_discarded, 1);
        assert_eq!(client.stats().connections, ConnectionStats { opened: 2, reused: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn closed_client_fails_without_network_io() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let client = client(&transport, config(3));
        client.close();
        client.close();

        let outcome = client.get("http://target.test/").await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::ClientClosed);
        assert_eq!(failure.attempts, 0);
        assert_eq!(transport.attempts(), 0);
        assert!(client.is_closed());
        assert!(transport.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn close_interrupts_in_flight_requests() {
        let transport = Arc::new(ScriptedTransport::always(Step::Hang));
        let config = ClientConfig::builder().timeout(Duration::from_secs(60)).build().unwrap();
        let client = client(&transport, config);

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.get("http://target.test/").await })
        };
        sleep(Duration::from_millis(10)).await;
        let started = Instant::now();
        client.close();

        let outcome = pending.await.unwrap();
        assert_eq!(outcome.failure().map(|f| f.reason), Some(FailureReason::ClientClosed));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn close_interrupts_backoff_sleep() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(503)));
        let config = ClientConfig::builder().max_retries(5).backoff_factor(Duration::from_secs(30)).build().unwrap();
        let client = client(&transport, config);

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.get("http://target.test/").await })
        };
        sleep(Duration::from_secs(1)).await;
        client.close();

        let outcome = pending.await.unwrap();
        assert_eq!(outcome.failure().map(|f| f.reason), Some(FailureReason::ClientClosed));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn identity_is_stable_across_requests() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let client = client(&transport, config(0));
        for path in ["/a", "/b", "/c", "/d", "/e"] {
            client.get(&format!("http://target.test{path}")).await;
        }

        assert!(BROWSER_IDENTITIES.contains(&client.identity()));
        for sent in transport.sent() {
            assert_eq!(user_agent(&sent.headers), client.identity());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_identity_is_sent_verbatim() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let config = ClientConfig::builder().identity("AuditBot/3.1").build().unwrap();
        let client = client(&transport, config);
        client.get("http://target.test/").await;
        assert_eq!(user_agent(&transport.sent()[0].headers), "AuditBot/3.1");
    }

    #[tokio::test(start_paused = true)]
    async fn caller_headers_override_defaults() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let client = client(&transport, config(0));
        let options = RequestOptions::default().header("User-Agent", "Override/1.0").header("X-Probe", "1");
        client.issue(Request::get("http://target.test/").options(options)).await;

        let headers = &transport.sent()[0].headers;
        assert_eq!(user_agent(headers), "Override/1.0");
        assert_eq!(headers.get("x-probe").unwrap(), "1");
        assert_eq!(headers.get(header::ACCEPT_LANGUAGE).unwrap(), "en-US,en;q=0.9");
        assert_eq!(headers.get(header::CONNECTION).unwrap(), "keep-alive");
    }

    #[tokio::test(start_paused = true)]
    async fn post_is_not_retried_unless_opted_in() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(503)));
        let client = client(&transport, config(2));
        let body = RequestBody::form([("q", "1")]);

        let outcome = client.post("http://target.test/search", body.clone()).await;
        assert_eq!(outcome.attempts(), 1);

        let request = Request::post("http://target.test/search", body).options(RequestOptions::default().retry_post(true));
        let outcome = client.issue(request).await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(transport.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_faults_are_retried_until_success() {
        let refused = Step::Fault(FailureReason::ConnectionRefused);
        let transport = Arc::new(ScriptedTransport::sequence([refused.clone(), refused], Step::Status(200)));
        let client = client(&transport, config(3));

        let outcome = client.get("http://target.test/").await;
        assert_eq!(outcome.status(), Some(200));
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(client.stats().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_faults_surface_the_last_failure() {
        let transport = Arc::new(ScriptedTransport::always(Step::Fault(FailureReason::ConnectionReset)));
        let client = client(&transport, config(2));

        let outcome = client.get("http://target.test/").await;
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::ConnectionReset);
        assert_eq!(failure.attempts, 3);
        assert_eq!(client.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn form_bodies_and_query_pairs_are_encoded() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let client = client(&transport, config(0));

        client.post("http://target.test/login", RequestBody::form([("user", "<script>"), ("pass", "1 OR 1=1")])).await;
        client.issue(Request::get("http://target.test/search").query("q", "a&b")).await;

        let sent = transport.sent();
        assert_eq!(sent[0].body.as_deref(), Some(b"user=%3Cscript%3E&pass=1+OR+1%3D1".as_slice()));
        assert_eq!(sent[0].headers.get(header::CONTENT_TYPE).unwrap(), "application/x-www-form-urlencoded");
        assert_eq!(sent[1].url, "http://target.test/search?q=a%26b");
        assert!(sent[1].body.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_urls_never_reach_the_transport() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let client = client(&transport, config(3));

        for url in ["not a url", "/relative/path", "ftp://target.test/file"] {
            let outcome = client.get(url).await;
            assert_eq!(outcome.failure().map(|f| f.reason), Some(FailureReason::InvalidRequest), "{url}");
        }
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_delay_precedes_each_request() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let config = ClientConfig::builder().delay(Duration::from_secs(1)).build().unwrap();
        let client = client(&transport, config);

        let started = Instant::now();
        client.get("http://target.test/a").await;
        client.get("http://target.test/b").await;

        let sent = transport.sent();
        assert_about(sent[0].at - started, Duration::from_secs(1));
        assert_about(sent[1].at - sent[0].at, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_does_not_serialize_concurrent_callers() {
        let transport = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let config = ClientConfig::builder().delay(Duration::from_secs(1)).build().unwrap();
        let client = client(&transport, config);

        let started = Instant::now();
        let callers: Vec<_> = (0..4)
            .map(|n| {
                let client = client.clone();
                tokio::spawn(async move { client.get(&format!("http://target.test/{n}")).await })
            })
            .collect();
        for caller in callers {
            assert!(caller.await.unwrap().is_success());
        }

        let sent = transport.sent();
        assert_eq!(sent.len(), 4);
        for request in &sent {
            assert_about(request.at - started, Duration::from_secs(1));
        }
        assert_about(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn success_reports_elapsed_seconds() {
        let response = RawResponse {
            status: 302,
            url: "http://target.test/login".into(),
            headers: vec![("Location".into(), "/home".into())],
            body: b"moved".to_vec(),
        };
        let transport = Arc::new(ScriptedTransport::always(Step::Response(response)));
        let client = client(&transport, config(0));

        let outcome = client.get("http://target.test/old").await;
        let response = outcome.response().unwrap();
        assert_eq!(response.status, 302);
        assert_eq!(response.header("location"), Some("/home"));
        assert_eq!(response.content_length, 5);
        assert!(response.elapsed >= 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_identity_is_rejected_at_construction() {
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::always(Step::Status(200)));
        let config = ClientConfig::builder().identity("bad\nagent").build().unwrap();
        let result = HttpClient::with_transport(config, transport, &mut StdRng::seed_from_u64(1));
        assert!(matches!(result, Err(ClientError::Config(ConfigError::InvalidIdentity(_)))));
    }
}
