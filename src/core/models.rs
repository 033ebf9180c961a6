// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use url::Url;

// --- Request Models ---

/// The verbs the dispatch layer knows how to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
}

impl HttpMethod {
    /// GET and HEAD can be replayed without side effects on the target.
    pub fn is_idempotent(self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

/// A (scheme, host, port) triple. Connections are pooled per route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Route {
    /// Builds the route for an absolute http/https URL.
    /// Returns `None` for anything else (relative, other schemes, no host).
    pub fn from_url(url: &Url) -> Option<Self> {
        match url.scheme() {
            "http" | "https" => {}
            _ => return None,
        }
        let host = url.host_str()?.to_ascii_lowercase();
        let port = url.port_or_known_default()?;
        Some(Self { scheme: url.scheme().to_string(), host, port })
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

// --- Outcome Models ---

/// Why a logical request produced no usable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No response within the configured timeout.
    Timeout,
    /// The target actively refused the connection.
    ConnectionRefused,
    /// The connection was reset or aborted mid-exchange.
    ConnectionReset,
    /// The host name could not be resolved.
    DnsFailure,
    /// A connection-level failure that fits none of the above.
    Connection,
    /// The redirect chain went past the configured bound.
    TooManyRedirects,
    /// No pool slot became free within the acquire wait.
    PoolExhausted,
    /// The client was closed before or during the request.
    ClientClosed,
    /// The request could not be built (bad URL, scheme or header).
    InvalidRequest,
    /// Any other transport fault.
    Other,
}

/// A fully buffered response as seen by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct HttpResponse {
    pub status: u16,
    /// URL of the final hop after redirects.
    pub url: String,
    pub headers: Vec<(String, String)>,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub content_length: usize,
    /// Seconds spent on the final attempt, from send to fully read body.
    pub elapsed: f64,
    /// Transport attempts made for this logical request.
    pub attempts: u32,
    pub received_at: DateTime<Utc>,
}

impl HttpResponse {
    /// Case-insensitive lookup of the first header with this name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub reason: FailureReason,
    pub message: String,
    pub attempts: u32,
}

/// The result of one logical request after any internal retries.
/// Exactly one of the two variants is ever produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    Success(HttpResponse),
    Failure(Failure),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success(_))
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            RequestOutcome::Success(response) => Some(response),
            RequestOutcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RequestOutcome::Failure(failure) => Some(failure),
            RequestOutcome::Success(_) => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RequestOutcome::Success(response) => response.attempts,
            RequestOutcome::Failure(failure) => failure.attempts,
        }
    }

    pub(crate) fn failed(reason: FailureReason, message: impl Into<String>, attempts: u32) -> Self {
        RequestOutcome::Failure(Failure { reason, message: message.into(), attempts })
    }
}
