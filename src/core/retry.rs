// src/core/retry.rs

//! Retry eligibility and backoff.
//!
//! The policy is a pure decision function over (method, attempt count, last
//! result). It never sleeps or touches the network itself, which keeps every
//! timing rule testable in isolation.

use crate::core::config::ClientConfig;
use crate::core::models::{FailureReason, HttpMethod};
use crate::core::transport::{RawResponse, TransportFault};
use std::time::Duration;

/// Status codes that mean "try again later" rather than a final answer.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Statuses for which a `Retry-After` header is honored.
const RETRY_AFTER_STATUSES: [u16; 2] = [429, 503];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay`, then make another attempt.
    Retry { delay: Duration },
    /// The last result is final.
    Stop,
}

/// Per-request bookkeeping. Lives only as long as one logical request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    total_backoff: Duration,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn record_backoff(&mut self, delay: Duration) {
        self.total_backoff += delay;
    }

    /// Transport attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn total_backoff(&self) -> Duration {
        self.total_backoff
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_factor: Duration,
    backoff_cap: Duration,
    retry_post: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: Duration, backoff_cap: Duration) -> Self {
        Self { max_retries, backoff_factor, backoff_cap, retry_post: false }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.max_retries(), config.backoff_factor(), config.backoff_cap())
            .with_retry_post(config.retry_post())
    }

    /// Opts POST in or out of automatic retries.
    pub fn with_retry_post(mut self, retry_post: bool) -> Self {
        self.retry_post = retry_post;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry `n` (1-indexed): `factor * 2^(n-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
        self.backoff_factor
            .checked_mul(multiplier)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }

    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }

    /// Connection-level faults and pool exhaustion are transient.
    /// Timeouts, redirect loops and local errors are final.
    pub fn is_retryable_fault(reason: FailureReason) -> bool {
        matches!(
            reason,
            FailureReason::ConnectionRefused
                | FailureReason::ConnectionReset
                | FailureReason::DnsFailure
                | FailureReason::Connection
                | FailureReason::PoolExhausted
        )
    }

    pub fn allows_method(&self, method: HttpMethod) -> bool {
        method.is_idempotent() || (method == HttpMethod::Post && self.retry_post)
    }

    /// Decides what to do after the attempt recorded in `state` produced `result`.
    pub fn decide(
        &self,
        method: HttpMethod,
        state: &RetryState,
        result: &Result<RawResponse, TransportFault>,
    ) -> RetryDecision {
        if state.attempts() >= self.max_attempts() || !self.allows_method(method) {
            return RetryDecision::Stop;
        }
        let backoff = self.backoff(state.attempts());
        match result {
            Ok(response) if Self::is_retryable_status(response.status) => {
                let delay = match retry_after(response) {
                    Some(wait) => wait.max(backoff).min(self.backoff_cap),
                    None => backoff,
                };
                RetryDecision::Retry { delay }
            }
            Err(fault) if Self::is_retryable_fault(fault.reason) => RetryDecision::Retry { delay: backoff },
            _ => RetryDecision::Stop,
        }
    }
}

/// Numeric `Retry-After` value on a 429/503. HTTP-date values are ignored.
fn retry_after(response: &RawResponse) -> Option<Duration> {
    if !RETRY_AFTER_STATUSES.contains(&response.status) {
        return None;
    }
    response
        .header("retry-after")
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
