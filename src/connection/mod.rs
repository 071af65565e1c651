//! Connections to servers and their cache.
//!
//! # Architecture
//!
//! - [`Connection`]: one open transport connection, multiplexing requests by
//!   request id, plus the per-connection protocol state (negotiated code sets,
//!   whether initial service contexts were already sent, what the peer told us)
//! - [`WaiterRegistry`]: outstanding requests awaiting replies
//! - [`ConnectionCache`]: endpoint to connection map, at most one live
//!   connection per endpoint
//!
//! A reader task per connection drains the transport's inbound frames and
//! wakes waiters. When the inbound stream ends or the server announces an
//! orderly close, every outstanding waiter is failed and the connection is
//! marked dead, so the cache replaces it on the next acquire.
//!
//! # Tiger Style
//!
//! - Bounded waiters per connection (MAX_OUTSTANDING_REQUESTS_PER_CONNECTION)
//! - A dead connection is never handed out again

mod cache;
mod metrics;
mod waiters;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
pub use cache::ConnectionCache;
pub use cache::PooledConnection;
use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::OrbVersion;
use giop_dispatch_types::RequestId;
pub use metrics::ConnectionCacheMetrics;
use parking_lot::Mutex;
use parking_lot::MutexGuard;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;
pub use waiters::RequestIdGenerator;
pub use waiters::WaiterEvent;
pub use waiters::WaiterRegistry;

use crate::codeset::NegotiatedCodeSets;
use crate::error::TransportError;
use crate::transport::InboundFrame;
use crate::transport::TransportChannel;
use crate::transport::TransportHandle;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// An open connection to one endpoint.
pub struct Connection {
    /// Process-unique id, for logs.
    id: u64,
    /// Endpoint this connection was opened for.
    endpoint: EndpointDescriptor,
    /// Outbound half of the transport.
    handle: Arc<dyn TransportHandle>,
    /// Inbound frames, taken by the reader task when it starts.
    inbound: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    /// Outstanding two-way requests.
    waiters: WaiterRegistry,
    /// Request ids for this connection.
    request_ids: RequestIdGenerator,
    /// Code sets, written once by the negotiator.
    codesets: RwLock<Option<NegotiatedCodeSets>>,
    /// Serializes negotiation on this connection.
    negotiation: Mutex<()>,
    /// Set once the server has seen our initial service contexts.
    post_initial_contexts: AtomicBool,
    /// ORB version the peer advertised in its replies.
    peer_orb_version: RwLock<Option<OrbVersion>>,
    /// Codebase the peer advertised in its replies.
    peer_codebase: RwLock<Option<String>>,
    /// True once the connection can no longer carry requests.
    closed: AtomicBool,
    /// Last time the connection carried a request.
    last_used: Mutex<Instant>,
}

impl Connection {
    /// Wrap an opened transport channel.
    ///
    /// The connection does not read replies until [`Connection::start_reader`]
    /// runs; the cache does that once the connection is published.
    pub fn new(endpoint: EndpointDescriptor, channel: TransportChannel) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            handle: channel.handle,
            inbound: Mutex::new(Some(channel.inbound)),
            waiters: WaiterRegistry::new(),
            request_ids: RequestIdGenerator::new(),
            codesets: RwLock::new(None),
            negotiation: Mutex::new(()),
            post_initial_contexts: AtomicBool::new(false),
            peer_orb_version: RwLock::new(None),
            peer_codebase: RwLock::new(None),
            closed: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
        }
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint this connection was opened for.
    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    // ========================================================================
    // Event delivery
    // ========================================================================

    /// Spawn the task that routes inbound frames to waiters.
    ///
    /// Idempotent: only the first call finds the inbound receiver. The task
    /// holds a weak reference, so it stops once the connection is dropped.
    pub fn start_reader(this: &Arc<Self>) {
        let Some(mut inbound) = this.inbound.lock().take() else {
            return;
        };
        let weak = Arc::downgrade(this);
        let id = this.id;

        tokio::spawn(async move {
            let reason = loop {
                let Some(frame) = inbound.recv().await else {
                    break WaiterEvent::ConnectionLost;
                };
                let Some(conn) = weak.upgrade() else {
                    return;
                };
                match frame {
                    InboundFrame::Reply { request_id, frame } => {
                        if !conn.waiters.deliver(request_id, WaiterEvent::Reply(frame)) {
                            debug!(connection = id, %request_id, "discarding reply nobody is waiting for");
                        }
                    }
                    InboundFrame::CloseConnection => break WaiterEvent::ServerClosed,
                }
            };
            if let Some(conn) = weak.upgrade() {
                conn.shutdown(reason);
            }
        });
    }

    /// Mark the connection dead and wake every waiter with `event`.
    fn shutdown(&self, event: WaiterEvent) {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        self.handle.close();
        let failed = self.waiters.fail_all(event.clone());
        if first {
            match event {
                WaiterEvent::ServerClosed => {
                    info!(connection = self.id, endpoint = %self.endpoint, failed, "server closed connection")
                }
                _ => warn!(connection = self.id, endpoint = %self.endpoint, failed, "connection lost"),
            }
        }
    }

    /// Close the connection, failing outstanding requests as lost.
    pub fn close(&self) {
        self.shutdown(WaiterEvent::ConnectionLost);
    }

    /// Whether the connection was closed by either side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Allocate a fresh request id.
    pub fn next_request_id(&self) -> RequestId {
        self.request_ids.next_id()
    }

    /// Register a reply waiter. `None` when the connection is saturated.
    pub fn register_waiter(&self, request_id: RequestId) -> Option<oneshot::Receiver<WaiterEvent>> {
        self.waiters.register(request_id)
    }

    /// Remove a waiter. False if it was already resolved.
    pub fn unregister_waiter(&self, request_id: RequestId) -> bool {
        self.waiters.unregister(request_id)
    }

    /// Whether a waiter for `request_id` is outstanding.
    pub fn has_waiter(&self, request_id: RequestId) -> bool {
        self.waiters.contains(request_id)
    }

    /// Number of outstanding waiters.
    pub fn outstanding_requests(&self) -> usize {
        self.waiters.len()
    }

    /// Write a request frame. A write failure closes the connection.
    pub async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed {
                address: self.endpoint.address().clone(),
            });
        }
        match self.handle.send(frame).await {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(err) => {
                warn!(connection = self.id, endpoint = %self.endpoint, error = %err, "send failed, closing connection");
                self.close();
                Err(err)
            }
        }
    }

    /// Ask the server to abandon `request_id`.
    pub async fn send_cancel(&self, request_id: RequestId) -> Result<(), TransportError> {
        self.handle.send_cancel(request_id).await
    }

    // ========================================================================
    // Protocol state
    // ========================================================================

    /// Negotiated code sets, if negotiation already ran.
    pub fn codesets(&self) -> Option<NegotiatedCodeSets> {
        *self.codesets.read()
    }

    pub(crate) fn set_codesets(&self, codesets: NegotiatedCodeSets) {
        *self.codesets.write() = Some(codesets);
    }

    pub(crate) fn negotiation_lock(&self) -> MutexGuard<'_, ()> {
        self.negotiation.lock()
    }

    /// Whether initial service contexts were already delivered.
    pub fn post_initial_contexts(&self) -> bool {
        self.post_initial_contexts.load(Ordering::Acquire)
    }

    /// Record that the server has seen the initial service contexts.
    pub fn mark_post_initial_contexts(&self) {
        self.post_initial_contexts.store(true, Ordering::Release);
    }

    /// ORB version the peer advertised, if any reply arrived yet.
    pub fn peer_orb_version(&self) -> Option<OrbVersion> {
        *self.peer_orb_version.read()
    }

    pub(crate) fn set_peer_orb_version(&self, version: OrbVersion) {
        *self.peer_orb_version.write() = Some(version);
    }

    /// Codebase the peer advertised, if any.
    pub fn peer_codebase(&self) -> Option<String> {
        self.peer_codebase.read().clone()
    }

    pub(crate) fn set_peer_codebase(&self, codebase: String) {
        *self.peer_codebase.write() = Some(codebase);
    }

    // ========================================================================
    // Idle tracking
    // ========================================================================

    /// Record use now.
    pub fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    /// Whether the connection has carried nothing for `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.waiters.is_empty() && self.last_used.lock().elapsed() >= timeout
    }
}

impl PooledConnection for Connection {
    fn is_live(&self) -> bool {
        !self.is_closed()
    }

    fn on_established(this: &Arc<Self>) {
        Connection::start_reader(this);
    }

    fn touch(&self) {
        Connection::touch(self);
    }

    fn outstanding_requests(&self) -> usize {
        Connection::outstanding_requests(self)
    }

    fn close(&self) {
        Connection::close(self);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.handle.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .field("outstanding", &self.waiters.len())
            .finish()
    }
}
