// src/core/transport/mock.rs

//! Scripted transport for tests.
//!
//! Plays back a queue of canned steps, then repeats a fallback step forever.
//! Every call is recorded, so tests can count attempts, check which pooled
//! connection was used, inspect headers and measure the spacing between sends.
//!
//! ```rust
//! use vanguard_dispatch::core::transport::mock::{ScriptedTransport, Step};
//! use vanguard_dispatch::core::models::FailureReason;
//!
//! // Two refused connections, then a 200 for every later attempt.
//! let transport = ScriptedTransport::sequence(
//!     [Step::Fault(FailureReason::ConnectionRefused), Step::Fault(FailureReason::ConnectionRefused)],
//!     Step::Status(200),
//! );
//! assert_eq!(transport.attempts(), 0);
//! ```

use super::{ConnectionStats, PreparedRequest, RawResponse, Transport, TransportFault};
use crate::core::models::{FailureReason, HttpMethod};
use crate::core::pool::Connection;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// One canned reaction of the scripted transport.
#[derive(Debug, Clone)]
pub enum Step {
    /// Answer with this status and an empty body.
    Status(u16),
    /// Answer with this exact response.
    Response(RawResponse),
    /// Fail with this classified fault.
    Fault(FailureReason),
    /// Never answer.
    Hang,
}

/// A request as the transport saw it.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub connection_id: u64,
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub at: Instant,
}

pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    sent: Mutex<Vec<SentRequest>>,
    closed: AtomicBool,
}

impl ScriptedTransport {
    /// Reacts with `step` to every request.
    pub fn always(step: Step) -> Self {
        Self::sequence([], step)
    }

    /// Plays `steps` in order, then `then` for every later request.
    pub fn sequence(steps: impl IntoIterator<Item = Step>, then: Step) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            fallback: then,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn log(&self) -> MutexGuard<'_, Vec<SentRequest>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of transport attempts made so far.
    pub fn attempts(&self) -> usize {
        self.log().len()
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.log().clone()
    }

    /// Whether the owning client has closed this transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, connection: &Connection, request: &PreparedRequest) -> Result<RawResponse, TransportFault> {
        self.log().push(SentRequest {
            connection_id: connection.id(),
            method: request.method,
            url: request.url.to_string(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            at: Instant::now(),
        });

        let step = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Status(status) => Ok(RawResponse {
                status,
                url: request.url.to_string(),
                ..RawResponse::default()
            }),
            Step::Response(response) => Ok(response),
            Step::Fault(reason) => Err(TransportFault::new(reason, "scripted fault")),
            Step::Hang => std::future::pending().await,
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Each pool slot stands in for one socket.
    fn connections(&self) -> ConnectionStats {
        let mut seen = HashSet::new();
        let mut stats = ConnectionStats::default();
        for sent in self.log().iter() {
            if seen.insert(sent.connection_id) {
                stats.opened += 1;
            } else {
                stats.reused += 1;
            }
        }
        stats
    }
}
