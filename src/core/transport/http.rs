// src/core/transport/http.rs

use super::{ConnectionStats, PreparedRequest, RawResponse, Transport, TransportFault};
use crate::core::config::{ClientConfig, PoolConfig};
use crate::core::models::{FailureReason, HttpMethod};
use crate::core::pool::Connection;
use async_trait::async_trait;
use hyper_util::client::legacy::connect::HttpInfo;
use reqwest::{Method, redirect};
use std::collections::{HashMap, HashSet};
use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Redirect and TLS handling are fixed per `reqwest::Client`, so each
/// combination requested by a call gets its own client (and its own socket pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ClientVariant {
    verify_tls: bool,
    follow_redirects: bool,
}

/// Sockets seen so far, keyed by their (local, remote) address pair.
#[derive(Default)]
struct SocketLedger {
    seen: HashSet<(SocketAddr, SocketAddr)>,
    stats: ConnectionStats,
}

impl SocketLedger {
    fn record(&mut self, local: SocketAddr, remote: SocketAddr) {
        if self.seen.insert((local, remote)) {
            self.stats.opened += 1;
        } else {
            self.stats.reused += 1;
        }
    }
}

/// Transport backed by `reqwest`.
///
/// The slots leased from the dispatcher's pool are served by the keep-alive
/// sockets reqwest holds per host; its idle bound and idle timeout are set
/// from the same `PoolConfig` so both agree on their limits. Socket reuse is
/// read from the connection info hyper attaches to every response.
pub struct ReqwestTransport {
    timeout: Duration,
    proxy: Option<Url>,
    max_redirects: usize,
    pool: PoolConfig,
    clients: Mutex<HashMap<ClientVariant, reqwest::Client>>,
    sockets: Mutex<SocketLedger>,
    closed: AtomicBool,
}

impl ReqwestTransport {
    /// Builds the transport and its default client. Errors here are local
    /// configuration problems (bad proxy, TLS backend) and surface at construction.
    pub fn new(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        let transport = Self {
            timeout: config.timeout(),
            proxy: config.proxy().cloned(),
            max_redirects: config.max_redirects(),
            pool: config.pool().clone(),
            clients: Mutex::new(HashMap::new()),
            sockets: Mutex::new(SocketLedger::default()),
            closed: AtomicBool::new(false),
        };
        let variant = ClientVariant { verify_tls: config.verify_tls(), follow_redirects: true };
        let client = transport.build_client(variant)?;
        transport.clients().insert(variant, client);
        Ok(transport)
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ClientVariant, reqwest::Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sockets(&self) -> MutexGuard<'_, SocketLedger> {
        self.sockets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_client(&self, variant: ClientVariant) -> Result<reqwest::Client, reqwest::Error> {
        debug!(verify_tls = variant.verify_tls, follow_redirects = variant.follow_redirects, "Building HTTP client.");
        let policy = if variant.follow_redirects {
            redirect::Policy::limited(self.max_redirects)
        } else {
            redirect::Policy::none()
        };
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .pool_max_idle_per_host(self.pool.max_per_route)
            .pool_idle_timeout(self.pool.idle_timeout)
            .danger_accept_invalid_certs(!variant.verify_tls)
            .redirect(policy);
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        builder.build()
    }

    fn client_for(&self, variant: ClientVariant) -> Result<reqwest::Client, TransportFault> {
        let mut clients = self.clients();
        // Checked under the lock so a racing `close` cannot leave a fresh client behind.
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportFault::new(FailureReason::ClientClosed, "transport is closed"));
        }
        if let Some(client) = clients.get(&variant) {
            return Ok(client.clone());
        }
        let client = self.build_client(variant).map_err(|e| {
            error!(error = %e, "Failed to build HTTP client variant.");
            TransportFault::new(FailureReason::InvalidRequest, format!("HTTP client error: {}", e))
        })?;
        clients.insert(variant, client.clone());
        Ok(client)
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Post => Method::POST,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, connection: &Connection, request: &PreparedRequest) -> Result<RawResponse, TransportFault> {
        let client = self.client_for(ClientVariant {
            verify_tls: request.verify_tls,
            follow_redirects: request.follow_redirects,
        })?;

        debug!(connection = connection.id(), method = %request.method, url = %request.url, "Sending request.");
        let mut builder = client
            .request(method(request.method), request.url.clone())
            .headers(request.headers.clone())
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify)?;
        if let Some(info) = response.extensions().get::<HttpInfo>() {
            self.sockets().record(info.local_addr(), info.remote_addr());
        }
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();
        let body = response.bytes().await.map_err(classify)?.to_vec();

        Ok(RawResponse { status, url, headers, body })
    }

    fn close(&self) {
        let mut clients = self.clients();
        self.closed.store(true, Ordering::Release);
        // Dropping the clients drops their idle keep-alive sockets.
        let dropped = clients.len();
        clients.clear();
        debug!(clients = dropped, "HTTP transport closed.");
    }

    fn connections(&self) -> ConnectionStats {
        self.sockets().stats
    }
}

// --- Error Classification ---

fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn io_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = cause.source();
    }
    None
}

fn is_dns_failure(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("name or service not known")
        || message.contains("no such host")
}

/// Maps a reqwest error onto the failure taxonomy.
pub(crate) fn classify(err: reqwest::Error) -> TransportFault {
    let message = error_chain(&err);
    let reason = if err.is_timeout() {
        FailureReason::Timeout
    } else if err.is_redirect() {
        FailureReason::TooManyRedirects
    } else if err.is_builder() {
        FailureReason::InvalidRequest
    } else if is_dns_failure(&message) {
        FailureReason::DnsFailure
    } else {
        match io_kind(&err) {
            Some(io::ErrorKind::ConnectionRefused) => FailureReason::ConnectionRefused,
            Some(
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof,
            ) => FailureReason::ConnectionReset,
            Some(io::ErrorKind::TimedOut) => FailureReason::Timeout,
            _ if err.is_connect() => FailureReason::Connection,
            _ if message.contains("connection closed") || message.contains("connection reset") => {
                FailureReason::ConnectionReset
            }
            _ => FailureReason::Other,
        }
    };
    TransportFault { reason, message }
}
