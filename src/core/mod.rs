// src/core/mod.rs

// The dispatch layer every scan activity funnels its requests through.
// `dispatcher` is the entry point; the other modules are its building blocks.

/// Validated client settings and the flat option set front ends produce.
pub mod config;

/// The `HttpClient` entry point: pacing, header merge, retries, outcome normalization.
pub mod dispatcher;

/// Construction-time error types.
pub mod error;

/// Picks the User-Agent a client presents for its whole lifetime.
pub mod identity;

/// Requests, routes, outcomes and the failure taxonomy.
pub mod models;

/// Bounded, per-route connection pool.
pub mod pool;

/// Retry eligibility and exponential backoff.
pub mod retry;

/// The network seam: the `Transport` trait, the reqwest implementation and a scripted test double.
pub mod transport;
