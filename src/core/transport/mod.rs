// src/core/transport/mod.rs

// The seam between the dispatcher and the network. The dispatcher only talks to
// `dyn Transport`, so retry and pooling rules can be exercised against the
// scripted transport in `mock` without any real I/O.
pub mod http;
pub mod mock;

use crate::core::models::{FailureReason, HttpMethod, Route};
use crate::core::pool::Connection;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub use self::http::ReqwestTransport;

/// A request with defaults, caller overrides and payload already applied.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub route: Route,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub verify_tls: bool,
}

/// What the transport read off the wire, before the dispatcher stamps
/// timing and attempt information onto it.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A transport-level fault, already classified into the failure taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}: {message}")]
pub struct TransportFault {
    pub reason: FailureReason,
    pub message: String,
}

impl TransportFault {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self { reason, message: message.into() }
    }
}

/// Counters for the transport's own sockets, as opposed to pool slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    /// Exchanges answered over a connection not seen before.
    pub opened: u64,
    /// Exchanges answered over an already open connection.
    pub reused: u64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one exchange over `connection` and fully buffers the body.
    async fn send(&self, connection: &Connection, request: &PreparedRequest) -> Result<RawResponse, TransportFault>;

    /// Drops every open connection. Later sends fail with `ClientClosed`.
    fn close(&self) {}

    fn connections(&self) -> ConnectionStats {
        ConnectionStats::default()
    }
}
