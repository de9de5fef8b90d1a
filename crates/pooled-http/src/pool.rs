//! Bounded per-destination connection pool
//!
//! Capacity is enforced with two semaphores per lease: one for the
//! destination and one for the whole pool. The bookkeeping mutex only
//! guards idle lists and counters and is never held across an await.
//!
//! A [`Lease`] owns its connection and both permits. Dropping it returns
//! the connection to the idle list when it was marked reusable, otherwise
//! the connection is closed. Either way the permits are released.
//!
//! Idle connections count against the total and route caps. Opening a new
//! connection on a full pool first closes the least recently used idle
//! connections, on any route.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::{
    config::PoolConfig,
    connector::{bounded, Connector, Sender},
    error::{HttpError, Result},
    request::Timeouts,
    route::Destination,
};

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently checked out
    pub leased: usize,
    /// Open connections waiting for reuse
    pub idle: usize,
    /// Capacity (total or per-route, depending on the query)
    pub max: usize,
}

struct PooledConnection {
    id: u64,
    sender: Sender,
}

struct IdleConnection {
    conn: PooledConnection,
    idle_since: Instant,
    expires_at: Option<Instant>,
}

impl IdleConnection {
    fn is_expired(&self, now: Instant) -> bool {
        self.conn.sender.is_closed() || self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Route {
    max: usize,
    permits: Arc<Semaphore>,
    idle: VecDeque<IdleConnection>,
    leased: usize,
}

impl Route {
    fn new(max: usize) -> Self {
        let max = clamp_permits(max);
        Self {
            max,
            permits: Arc::new(Semaphore::new(max)),
            idle: VecDeque::new(),
            leased: 0,
        }
    }
}

/// Semaphores panic above `MAX_PERMITS`
fn clamp_permits(size: usize) -> usize {
    size.min(Semaphore::MAX_PERMITS)
}

struct PoolInner {
    max_total: usize,
    default_max_per_route: usize,
    total: Arc<Semaphore>,
    routes: Mutex<HashMap<Destination, Route>>,
    connector: Connector,
    closed: AtomicBool,
    next_id: AtomicU64,
}

/// Shared handle to one pool
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Build a pool and raise the route cap of `seed` to `max_route_pool_size`
    pub fn new(config: &PoolConfig, seed: &Destination) -> Result<Self> {
        let max_total = clamp_permits(config.max_pool_size);
        let pool = Self {
            inner: Arc::new(PoolInner {
                max_total,
                default_max_per_route: clamp_permits(config.route_default()),
                total: Arc::new(Semaphore::new(max_total)),
                routes: Mutex::new(HashMap::new()),
                connector: Connector::new()?,
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
        };
        pool.set_max_per_route(seed, config.max_route_pool_size);
        Ok(pool)
    }

    /// Set the concurrent connection cap of one destination
    ///
    /// Growing takes effect immediately. Shrinking only reclaims slots that
    /// are currently free; the shortfall is logged.
    pub fn set_max_per_route(&self, destination: &Destination, max: usize) {
        let max = clamp_permits(max);
        let mut routes = self.inner.routes.lock();
        if !routes.contains_key(destination) {
            routes.insert(destination.clone(), Route::new(max));
            debug!(destination = %destination, max, "Route cap set");
            return;
        }
        let Some(route) = routes.get_mut(destination) else {
            return;
        };

        if max >= route.max {
            route.permits.add_permits(max - route.max);
            route.max = max;
        } else {
            let wanted = route.max - max;
            let reclaimed = route.permits.forget_permits(wanted);
            route.max -= reclaimed;
            if reclaimed < wanted {
                warn!(
                    destination = %destination,
                    current = route.max,
                    requested = max,
                    "Route cap only partially lowered while connections are leased"
                );
            }
        }
        debug!(destination = %destination, max = route.max, "Route cap set");
    }

    /// Borrow a connection to `destination`
    ///
    /// Waits up to `timeouts.connection_request` for capacity, prefers the
    /// most recently returned idle connection, and otherwise connects a new
    /// one within `timeouts.connect`.
    pub async fn lease(&self, destination: &Destination, timeouts: &Timeouts) -> Result<Lease> {
        self.ensure_open()?;

        let route_permits = {
            let mut routes = self.inner.routes.lock();
            routes
                .entry(destination.clone())
                .or_insert_with(|| Route::new(self.inner.default_max_per_route))
                .permits
                .clone()
        };
        let total_permits = self.inner.total.clone();

        let acquire = async {
            let route = route_permits.acquire_owned().await.map_err(|_| HttpError::Closed)?;
            let total = total_permits.acquire_owned().await.map_err(|_| HttpError::Closed)?;
            Ok((route, total))
        };
        let (route_permit, total_permit) =
            bounded(timeouts.connection_request, "connection request", acquire)
                .await
                .map_err(|e| match e {
                    HttpError::Timeout { after, .. } => HttpError::PoolTimeout(after),
                    other => other,
                })?;
        self.ensure_open()?;

        let mut lease = Lease {
            pool: self.inner.clone(),
            destination: destination.clone(),
            conn: None,
            reusable: false,
            expires_at: None,
            _route_permit: route_permit,
            _total_permit: total_permit,
        };
        {
            let mut routes = self.inner.routes.lock();
            if let Some(route) = routes.get_mut(destination) {
                route.leased += 1;
            }
        }

        while let Some(idle) = self.pop_idle(destination) {
            let mut conn = idle.conn;
            if conn.sender.ready().await.is_ok() {
                debug!(destination = %destination, id = conn.id, "Reusing pooled connection");
                lease.conn = Some(conn);
                return Ok(lease);
            }
            debug!(destination = %destination, id = conn.id, "Discarding stale pooled connection");
        }

        self.make_room(destination);
        let sender = self.inner.connector.connect(destination, timeouts.connect).await?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(destination = %destination, id, "Opened new connection");
        lease.conn = Some(PooledConnection { id, sender });
        Ok(lease)
    }

    fn pop_idle(&self, destination: &Destination) -> Option<IdleConnection> {
        let now = Instant::now();
        let mut routes = self.inner.routes.lock();
        let route = routes.get_mut(destination)?;
        while let Some(idle) = route.idle.pop_back() {
            if !idle.is_expired(now) {
                return Some(idle);
            }
        }
        None
    }

    /// Close least recently used idle connections until one more
    /// connection to `destination` fits the route and total caps
    ///
    /// The caller's lease is already counted in `leased`.
    fn make_room(&self, destination: &Destination) -> usize {
        let mut evicted = Vec::new();
        {
            let mut routes = self.inner.routes.lock();
            if let Some(route) = routes.get_mut(destination) {
                while route.leased + route.idle.len() > route.max {
                    let Some(idle) = route.idle.pop_front() else { break };
                    evicted.push(idle);
                }
            }

            let mut open: usize = routes
                .values()
                .map(|route| route.leased + route.idle.len())
                .sum();
            while open > self.inner.max_total {
                let oldest = routes
                    .iter()
                    .filter_map(|(key, route)| route.idle.front().map(|idle| (idle.idle_since, key)))
                    .min_by_key(|(since, _)| *since)
                    .map(|(_, key)| key.clone());
                let Some(idle) = oldest
                    .and_then(|key| routes.get_mut(&key))
                    .and_then(|route| route.idle.pop_front())
                else {
                    break;
                };
                evicted.push(idle);
                open -= 1;
            }
        }

        if !evicted.is_empty() {
            debug!(
                destination = %destination,
                closed = evicted.len(),
                "Closed idle connections to stay within pool caps"
            );
        }
        evicted.len()
    }

    /// Close idle connections whose keep-alive lifetime ran out or whose
    /// peer already hung up
    pub fn close_expired(&self) -> usize {
        let now = Instant::now();
        self.retain_idle(|idle| !idle.is_expired(now))
    }

    /// Close connections idle for longer than `idle_timeout`
    pub fn close_idle(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        self.retain_idle(|idle| now.saturating_duration_since(idle.idle_since) <= idle_timeout)
    }

    fn retain_idle<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&IdleConnection) -> bool,
    {
        // Dropped senders close their connections once the lock is released
        let mut evicted = Vec::new();
        {
            let mut routes = self.inner.routes.lock();
            for route in routes.values_mut() {
                let (kept, gone): (VecDeque<_>, VecDeque<_>) =
                    route.idle.drain(..).partition(|idle| keep(idle));
                route.idle = kept;
                evicted.extend(gone);
            }
        }
        evicted.len()
    }

    /// Drop every idle connection and refuse further leases
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.total.close();
        let drained: Vec<IdleConnection> = {
            let mut routes = self.inner.routes.lock();
            routes
                .values_mut()
                .flat_map(|route| {
                    route.permits.close();
                    route.idle.drain(..).collect::<Vec<_>>()
                })
                .collect()
        };
        debug!(closed = drained.len(), "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(HttpError::Closed)
        } else {
            Ok(())
        }
    }

    /// Occupancy across all destinations
    pub fn stats(&self) -> PoolStats {
        let routes = self.inner.routes.lock();
        routes.values().fold(
            PoolStats {
                max: self.inner.max_total,
                ..Default::default()
            },
            |acc, route| PoolStats {
                leased: acc.leased + route.leased,
                idle: acc.idle + route.idle.len(),
                max: acc.max,
            },
        )
    }

    /// Occupancy of one destination
    pub fn route_stats(&self, destination: &Destination) -> PoolStats {
        let routes = self.inner.routes.lock();
        match routes.get(destination) {
            Some(route) => PoolStats {
                leased: route.leased,
                idle: route.idle.len(),
                max: route.max,
            },
            None => PoolStats {
                max: self.inner.default_max_per_route,
                ..Default::default()
            },
        }
    }
}

/// A checked-out connection
pub struct Lease {
    pool: Arc<PoolInner>,
    destination: Destination,
    conn: Option<PooledConnection>,
    reusable: bool,
    expires_at: Option<Instant>,
    // Released after `Drop::drop` has put the connection back
    _route_permit: OwnedSemaphorePermit,
    _total_permit: OwnedSemaphorePermit,
}

impl Lease {
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Send one request over the leased connection
    pub(crate) async fn send(
        &mut self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<Incoming>> {
        let conn = self.conn.as_mut().ok_or(HttpError::Closed)?;
        Ok(conn.sender.send_request(request).await?)
    }

    /// Return the connection to the pool on drop
    ///
    /// `keep_alive` bounds how long it may sit idle before it counts as
    /// expired.
    pub fn mark_reusable(&mut self, keep_alive: Option<Duration>) {
        self.reusable = true;
        self.expires_at = keep_alive.map(|ttl| Instant::now() + ttl);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let conn = self.conn.take();
        let closed = self.pool.closed.load(Ordering::Acquire);

        let mut routes = self.pool.routes.lock();
        let Some(route) = routes.get_mut(&self.destination) else {
            return;
        };
        route.leased = route.leased.saturating_sub(1);

        match conn {
            Some(conn) if self.reusable && !closed && !conn.sender.is_closed() => {
                route.idle.push_back(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                    expires_at: self.expires_at,
                });
            }
            Some(conn) => {
                debug!(destination = %self.destination, id = conn.id, "Closing released connection");
            }
            None => {}
        }
    }
}
