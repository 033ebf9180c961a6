// src/lib.rs

//! Resilient HTTP dispatch for web scans.
//!
//! Directory walkers and injection probes hand their requests to an
//! [`HttpClient`]; it paces them, reuses pooled connections, retries transient
//! failures with exponential backoff and always answers with a
//! [`RequestOutcome`] instead of an error.
//!
//! ```no_run
//! use vanguard_dispatch::{ClientConfig, HttpClient, RequestOutcome};
//!
//! # async fn probe() -> Result<(), vanguard_dispatch::ClientError> {
//! let client = HttpClient::new(ClientConfig::builder().max_retries(2).build()?)?;
//! match client.get("https://target.example/admin/").await {
//!     RequestOutcome::Success(response) => println!("{} in {:.3}s", response.status, response.elapsed),
//!     RequestOutcome::Failure(failure) => println!("skipped: {}", failure.reason),
//! }
//! client.close();
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod core;
pub mod logging;

pub use crate::core::config::{ClientConfig, ClientOptions, IdentitySource, PoolConfig};
pub use crate::core::dispatcher::{ClientStats, HttpClient, Request, RequestBody, RequestOptions};
pub use crate::core::error::{ClientError, ConfigError};
pub use crate::core::models::{Failure, FailureReason, HttpMethod, HttpResponse, RequestOutcome};
pub use crate::core::transport::ConnectionStats;
