//! Reply waiters for multiplexed connections.
//!
//! Each two-way request registers a oneshot sender keyed by its request id.
//! The connection reader delivers the reply by removing the entry, so a
//! waiter is resolved at most once, whichever of delivery, cancellation or
//! connection shutdown gets to the entry first.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use giop_dispatch_types::RequestId;
use tokio::sync::oneshot;

use crate::constants::MAX_OUTSTANDING_REQUESTS_PER_CONNECTION;

/// What an outstanding request is woken with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaiterEvent {
    /// The encoded reply frame.
    Reply(Bytes),
    /// The server closed the connection in an orderly way; the request was
    /// not processed.
    ServerClosed,
    /// The connection broke; the request may or may not have executed.
    ConnectionLost,
}

/// Request ids for one connection.
///
/// Starts at 1 and never hands out 0. Ids are never reused for a retry; each
/// attempt draws a fresh one.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU32,
}

impl RequestIdGenerator {
    /// Create a generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> RequestId {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            // 0 is skipped after wrap-around.
            if id != 0 {
                return RequestId(id);
            }
        }
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding requests of one connection.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    waiters: DashMap<RequestId, oneshot::Sender<WaiterEvent>>,
    /// Slots reserved or occupied; never exceeds the per-connection bound.
    outstanding: AtomicUsize,
}

impl WaiterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `request_id`.
    ///
    /// Returns `None` when the connection already has
    /// [`MAX_OUTSTANDING_REQUESTS_PER_CONNECTION`] requests outstanding, or
    /// when `request_id` is still waiting (a wrapped id whose earlier request
    /// never completed).
    pub fn register(&self, request_id: RequestId) -> Option<oneshot::Receiver<WaiterEvent>> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_OUTSTANDING_REQUESTS_PER_CONNECTION).then_some(n + 1)
            })
            .ok()?;
        match self.waiters.entry(request_id) {
            Entry::Occupied(_) => {
                self.outstanding.fetch_sub(1, Ordering::AcqRel);
                None
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Some(rx)
            }
        }
    }

    /// Remove the waiter for `request_id` without waking it.
    ///
    /// Returns false if the waiter was already resolved or never registered.
    pub fn unregister(&self, request_id: RequestId) -> bool {
        self.take(request_id).is_some()
    }

    /// Resolve the waiter for `request_id`.
    ///
    /// Returns false when nobody is waiting: a late reply to an abandoned
    /// request.
    pub fn deliver(&self, request_id: RequestId, event: WaiterEvent) -> bool {
        match self.take(request_id) {
            // The receiver may have been dropped by a cancelled caller.
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn take(&self, request_id: RequestId) -> Option<oneshot::Sender<WaiterEvent>> {
        let (_, tx) = self.waiters.remove(&request_id)?;
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        Some(tx)
    }

    /// Resolve every outstanding waiter with `event`. Returns how many were
    /// woken.
    pub fn fail_all(&self, event: WaiterEvent) -> usize {
        let ids: Vec<RequestId> = self.waiters.iter().map(|entry| *entry.key()).collect();
        let mut woken = 0;
        for id in ids {
            if self.deliver(id, event.clone()) {
                woken += 1;
            }
        }
        woken
    }

    /// Whether `request_id` is still waiting.
    pub fn contains(&self, request_id: RequestId) -> bool {
        self.waiters.contains_key(&request_id)
    }

    /// Number of outstanding waiters.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether no waiter is outstanding.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
