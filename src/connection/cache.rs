//! Connection cache keyed by endpoint.
//!
//! At most one live connection exists per endpoint. Concurrent acquirers for
//! the same endpoint serialize on a per-endpoint creation lock; acquirers for
//! different endpoints never block each other.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use giop_dispatch_types::EndpointDescriptor;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;
use tracing::info;

use super::metrics::ConnectionCacheMetrics;

/// What the cache needs from the connections it holds.
pub trait PooledConnection: Send + Sync + 'static {
    /// Whether the connection can carry new requests. Dead entries are
    /// treated as absent and replaced on the next acquire.
    fn is_live(&self) -> bool;

    /// Called exactly once, after the connection is published in the cache.
    /// Starts event delivery for the connection.
    fn on_established(this: &Arc<Self>);

    /// Record use, for idle tracking.
    fn touch(&self);

    /// Requests awaiting a reply on this connection.
    fn outstanding_requests(&self) -> usize {
        0
    }

    /// Close the connection.
    fn close(&self) {}
}

/// Endpoint to connection map with per-endpoint creation locking.
///
/// Tiger Style: Creation locks are only taken on the slow path; the fast path
/// is a single shard read.
pub struct ConnectionCache<C: PooledConnection> {
    /// Published connections.
    connections: DashMap<EndpointDescriptor, Arc<C>>,
    /// One creation lock per endpoint ever acquired.
    ///
    /// Entries are kept so a later creator never races one holding an evicted
    /// lock; the map is bounded by the number of distinct endpoints.
    creation_locks: DashMap<EndpointDescriptor, Arc<AsyncMutex<()>>>,
    /// Connections created over the cache's lifetime.
    created: AtomicU64,
}

impl<C: PooledConnection> ConnectionCache<C> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            creation_locks: DashMap::new(),
            created: AtomicU64::new(0),
        }
    }

    /// Return the live connection for `endpoint`, creating it with `create`
    /// if there is none.
    ///
    /// `create` runs at most once per call, and only while holding the
    /// endpoint's creation lock, so concurrent callers observe exactly one
    /// creation. A failed creation leaves no entry behind and its error is
    /// returned to this caller only; waiters behind the lock try again.
    pub async fn acquire<F, Fut, E>(&self, endpoint: &EndpointDescriptor, create: F) -> Result<Arc<C>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, E>>,
    {
        // Fast path: existing live connection
        if let Some(conn) = self.lookup_live(endpoint) {
            conn.touch();
            return Ok(conn);
        }

        // Slow path: serialize creation for this endpoint
        let lock = Arc::clone(
            self.creation_locks
                .entry(endpoint.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .value(),
        );
        let _guard = lock.lock().await;

        // Another caller may have created it while we waited.
        if let Some(conn) = self.lookup_live(endpoint) {
            conn.touch();
            debug!(%endpoint, "connection created by concurrent acquirer");
            return Ok(conn);
        }

        let conn = Arc::new(create().await?);
        if let Some(stale) = self.connections.insert(endpoint.clone(), Arc::clone(&conn)) {
            debug!(%endpoint, "replacing dead connection");
            stale.close();
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        C::on_established(&conn);
        info!(%endpoint, "connection established");
        Ok(conn)
    }

    /// The live connection for `endpoint`, if any.
    pub fn get(&self, endpoint: &EndpointDescriptor) -> Option<Arc<C>> {
        self.lookup_live(endpoint)
    }

    /// Record use of `conn`.
    pub fn touch(&self, conn: &C) {
        conn.touch();
    }

    /// Evict and close the connection for `endpoint`.
    pub fn remove(&self, endpoint: &EndpointDescriptor) -> Option<Arc<C>> {
        let (_, conn) = self.connections.remove(endpoint)?;
        conn.close();
        Some(conn)
    }

    /// Drop every dead entry. Returns how many were removed.
    pub fn purge_dead(&self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|_, conn| conn.is_live());
        before.saturating_sub(self.connections.len())
    }

    /// Close and evict everything.
    pub fn close_all(&self) {
        let endpoints: Vec<EndpointDescriptor> = self.connections.iter().map(|e| e.key().clone()).collect();
        for endpoint in endpoints {
            self.remove(&endpoint);
        }
    }

    /// Number of entries, live or not.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the cache holds no entry.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of cache metrics.
    pub fn metrics(&self) -> ConnectionCacheMetrics {
        let mut metrics = ConnectionCacheMetrics {
            connections_created: self.created.load(Ordering::Relaxed),
            ..ConnectionCacheMetrics::default()
        };
        for entry in self.connections.iter() {
            metrics.total_connections += 1;
            if entry.is_live() {
                metrics.live_connections += 1;
            }
            metrics.outstanding_requests += entry.outstanding_requests() as u64;
        }
        metrics
    }

    fn lookup_live(&self, endpoint: &EndpointDescriptor) -> Option<Arc<C>> {
        let entry = self.connections.get(endpoint)?;
        if entry.is_live() {
            Some(Arc::clone(entry.value()))
        } else {
            None
        }
    }
}

impl<C: PooledConnection> Default for ConnectionCache<C> {
    fn default() -> Self {
        Self::new()
    }
}
