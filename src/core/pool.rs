// src/core/pool.rs

//! Bounded connection pool keyed by route.
//!
//! The pool hands out leases on logical connection slots. It enforces the
//! total and per-route bounds and decides when a slot may be reused; the
//! sockets behind a slot belong to the transport, which counts them itself
//! (see [`ConnectionStats`](crate::core::transport::ConnectionStats)).
//!
//! A lease A lease holds one slot of
//! the global bound and one slot of its route's bound; both are released when
//! the lease is dropped. Only a lease that was explicitly [`released`]
//! (the exchange completed cleanly) goes back to the idle list. Anything else
//! (transport fault, cancelled exchange) is discarded and a fresh connection
//! is created on next use.
//!
//! [`released`]: PooledConnection::release

use crate::core::config::PoolConfig;
use crate::core::models::Route;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no connection slot for {route} within {waited:?}")]
    Exhausted { route: Route, waited: Duration },

    #[error("connection pool is closed")]
    Closed,
}

/// A reusable logical connection to one route.
#[derive(Debug, Clone)]
pub struct Connection {
    id: u64,
    route: Route,
    created_at: Instant,
    last_used: Instant,
    uses: u64,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Number of exchanges this connection has been leased for, including the current one.
    pub fn uses(&self) -> u64 {
        self.uses
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Point-in-time slot counters. These track leases, not sockets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Slots opened because no idle one was available.
    pub slots_created: u64,
    /// Acquisitions served from the idle list.
    pub slots_reused: u64,
    /// Slots dropped (broken, expired or dropped on close).
    pub slots_discarded: u64,
    /// Acquisitions that gave up waiting for a slot.
    pub exhausted: u64,
    /// Slots currently idle.
    pub idle: usize,
}

struct RouteSlot {
    permits: Arc<Semaphore>,
    idle: Vec<Connection>,
}

struct PoolInner {
    config: PoolConfig,
    total: Arc<Semaphore>,
    routes: Mutex<HashMap<Route, RouteSlot>>,
    next_id: AtomicU64,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    exhausted: AtomicU64,
    closed: AtomicBool,
}

impl PoolInner {
    fn routes(&self) -> MutexGuard<'_, HashMap<Route, RouteSlot>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checkin(&self, mut connection: Connection) {
        if self.closed.load(Ordering::Acquire) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        connection.last_used = Instant::now();
        let mut routes = self.routes();
        match routes.get_mut(&connection.route) {
            Some(slot) if slot.idle.len() < self.config.max_per_route => {
                debug!(route = %connection.route, id = connection.id, "Connection returned to pool.");
                slot.idle.push(connection);
            }
            _ => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Shared, thread-safe pool. Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                total: Arc::new(Semaphore::new(config.max_total)),
                config,
                routes: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                exhausted: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Leases a connection for `route`, reusing an idle one when possible.
    ///
    /// Waits at most `acquire_wait` for a slot under both the per-route and
    /// the global bound, then fails with [`PoolError::Exhausted`].
    pub async fn acquire(&self, route: &Route) -> Result<PooledConnection, PoolError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let route_permits = {
            let mut routes = inner.routes();
            let slot = routes.entry(route.clone()).or_insert_with(|| RouteSlot {
                permits: Arc::new(Semaphore::new(inner.config.max_per_route)),
                idle: Vec::new(),
            });
            slot.permits.clone()
        };

        let deadline = Instant::now() + inner.config.acquire_wait;
        let route_permit = self.wait_for(route_permits, deadline, route).await?;
        let total_permit = self.wait_for(inner.total.clone(), deadline, route).await?;

        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let connection = {
            let mut routes = inner.routes();
            let mut reusable = None;
            if let Some(slot) = routes.get_mut(route) {
                while let Some(candidate) = slot.idle.pop() {
                    if candidate.last_used.elapsed() < inner.config.idle_timeout {
                        reusable = Some(candidate);
                        break;
                    }
                    debug!(route = %route, id = candidate.id, "Discarding expired idle connection.");
                    inner.discarded.fetch_add(1, Ordering::Relaxed);
                }
            }
            match reusable {
                Some(mut connection) => {
                    connection.uses += 1;
                    inner.reused.fetch_add(1, Ordering::Relaxed);
                    debug!(route = %route, id = connection.id, uses = connection.uses, "Reusing pooled connection.");
                    connection
                }
                None => {
                    let now = Instant::now();
                    let connection = Connection {
                        id: inner.next_id.fetch_add(1, Ordering::Relaxed),
                        route: route.clone(),
                        created_at: now,
                        last_used: now,
                        uses: 1,
                    };
                    inner.created.fetch_add(1, Ordering::Relaxed);
                    debug!(route = %route, id = connection.id, "Opened new pooled connection.");
                    connection
                }
            }
        };

        Ok(PooledConnection {
            connection: Some(connection),
            reusable: false,
            pool: inner.clone(),
            _route_permit: route_permit,
            _total_permit: total_permit,
        })
    }

    async fn wait_for(
        &self,
        semaphore: Arc<Semaphore>,
        deadline: Instant,
        route: &Route,
    ) -> Result<OwnedSemaphorePermit, PoolError> {
        match timeout_at(deadline, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => {
                self.inner.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(route = %route, "Connection pool exhausted.");
                Err(PoolError::Exhausted { route: route.clone(), waited: self.inner.config.acquire_wait })
            }
        }
    }

    /// Drops every idle connection and refuses all further acquisitions.
    /// Waiters blocked in [`acquire`](Self::acquire) fail immediately.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.total.close();
        let mut routes = inner.routes();
        let mut dropped = 0;
        for slot in routes.values_mut() {
            slot.permits.close();
            dropped += slot.idle.len();
            slot.idle.clear();
        }
        inner.discarded.fetch_add(dropped as u64, Ordering::Relaxed);
        debug!(dropped, "Connection pool closed.");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let idle = inner.routes().values().map(|slot| slot.idle.len()).sum();
        PoolStats {
            slots_created: inner.created.load(Ordering::Relaxed),
            slots_reused: inner.reused.load(Ordering::Relaxed),
            slots_discarded: inner.discarded.load(Ordering::Relaxed),
            exhausted: inner.exhausted.load(Ordering::Relaxed),
            idle,
        }
    }
}

/// A leased connection. Dropping it without calling [`release`](Self::release)
/// discards the connection.
pub struct PooledConnection {
    connection: Option<Connection>,
    reusable: bool,
    pool: Arc<PoolInner>,
    _route_permit: OwnedSemaphorePermit,
    _total_permit: OwnedSemaphorePermit,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .field("reusable", &self.reusable)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    pub fn connection(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.connection.as_ref().unwrap_or_else(|| unreachable!("lease used after drop"))
    }

    /// Returns the connection to its route's idle list.
    pub fn release(mut self) {
        self.reusable = true;
    }

    /// Tears the connection down; the next lease for this route opens a new one.
    pub fn discard(mut self) {
        self.reusable = false;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if self.reusable {
                self.pool.checkin(connection);
            } else {
                debug!(route = %connection.route, id = connection.id, "Discarding connection.");
                self.pool.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
