//! Unit tests for connections, waiters and the connection cache.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use giop_dispatch_types::AddressingDisposition;
use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::GiopVersion;
use giop_dispatch_types::ObjectReference;
use giop_dispatch_types::ReplyBody;
use giop_dispatch_types::RequestHeader;
use giop_dispatch_types::RequestId;
use giop_dispatch_types::ServiceContexts;
use giop_dispatch_types::TargetAddress;

use super::*;
use crate::constants::MAX_OUTSTANDING_REQUESTS_PER_CONNECTION;
use crate::error::TransportError;
use crate::marshal::Marshaler;
use crate::marshal::PostcardMarshaler;
use crate::testing::InMemoryTransport;
use crate::testing::ServerAction;
use crate::transport::Transport;

fn endpoint(host: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(host, 2809, GiopVersion::V1_2)
}

// =========================================================================
// Test Connection
// =========================================================================

#[derive(Debug)]
struct FakeConnection {
    live: AtomicBool,
    established: AtomicU32,
    closed: AtomicBool,
}

impl FakeConnection {
    fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            established: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }
}

impl PooledConnection for FakeConnection {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn on_established(this: &Arc<Self>) {
        this.established.fetch_add(1, Ordering::SeqCst);
    }

    fn touch(&self) {}

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
    }
}

// =========================================================================
// ConnectionCache Tests
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_creates_one_connection() {
    let cache = Arc::new(ConnectionCache::<FakeConnection>::new());
    let creations = Arc::new(AtomicU32::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        let creations = Arc::clone(&creations);
        tasks.push(tokio::spawn(async move {
            cache
                .acquire(&endpoint("alpha"), || async move {
                    creations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok::<_, TransportError>(FakeConnection::new())
                })
                .await
                .unwrap()
        }));
    }

    let mut connections = Vec::new();
    for task in tasks {
        connections.push(task.await.unwrap());
    }

    assert_eq!(creations.load(Ordering::SeqCst), 1);
    assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
    assert_eq!(connections[0].established.load(Ordering::SeqCst), 1);
    assert_eq!(cache.metrics().connections_created, 1);
}

#[tokio::test]
async fn test_failed_creation_leaves_no_entry() {
    let cache = ConnectionCache::<FakeConnection>::new();
    let address = endpoint("alpha").address().clone();

    let result = cache
        .acquire(&endpoint("alpha"), move || async move {
            Err::<FakeConnection, _>(TransportError::Connect {
                address,
                reason: "refused".into(),
            })
        })
        .await;
    assert!(result.is_err());
    assert!(cache.is_empty());

    let conn = cache
        .acquire(&endpoint("alpha"), || async { Ok::<_, TransportError>(FakeConnection::new()) })
        .await
        .unwrap();
    assert!(conn.is_live());
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_dead_connection_is_replaced() {
    let cache = ConnectionCache::<FakeConnection>::new();
    let first = cache
        .acquire(&endpoint("alpha"), || async { Ok::<_, TransportError>(FakeConnection::new()) })
        .await
        .unwrap();
    first.live.store(false, Ordering::SeqCst);
    assert!(cache.get(&endpoint("alpha")).is_none());

    let second = cache
        .acquire(&endpoint("alpha"), || async { Ok::<_, TransportError>(FakeConnection::new()) })
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(first.closed.load(Ordering::SeqCst));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_addressing_variants_share_a_connection() {
    let cache = ConnectionCache::<FakeConnection>::new();
    let plain = endpoint("alpha");
    let by_reference = plain.with_addressing(AddressingDisposition::Reference);

    let a = cache.acquire(&plain, || async { Ok::<_, TransportError>(FakeConnection::new()) }).await.unwrap();
    let address = plain.address().clone();
    let b = cache
        .acquire(&by_reference, move || async move { Err::<FakeConnection, _>(TransportError::Closed { address }) })
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn test_distinct_endpoints_get_distinct_connections() {
    let cache = ConnectionCache::<FakeConnection>::new();
    let a = cache.acquire(&endpoint("alpha"), || async { Ok::<_, TransportError>(FakeConnection::new()) }).await.unwrap();
    let b = cache.acquire(&endpoint("beta"), || async { Ok::<_, TransportError>(FakeConnection::new()) }).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &b));

    let metrics = cache.metrics();
    assert_eq!(metrics.total_connections, 2);
    assert_eq!(metrics.live_connections, 2);
}

#[tokio::test]
async fn test_purge_and_close_all() {
    let cache = ConnectionCache::<FakeConnection>::new();
    let a = cache.acquire(&endpoint("alpha"), || async { Ok::<_, TransportError>(FakeConnection::new()) }).await.unwrap();
    let b = cache.acquire(&endpoint("beta"), || async { Ok::<_, TransportError>(FakeConnection::new()) }).await.unwrap();

    a.live.store(false, Ordering::SeqCst);
    assert_eq!(cache.purge_dead(), 1);
    assert_eq!(cache.len(), 1);

    cache.close_all();
    assert!(cache.is_empty());
    assert!(b.closed.load(Ordering::SeqCst));
}

// =========================================================================
// WaiterRegistry Tests
// =========================================================================

#[test]
fn test_request_ids_start_at_one_and_increase() {
    let ids = RequestIdGenerator::new();
    assert_eq!(ids.next_id(), RequestId(1));
    assert_eq!(ids.next_id(), RequestId(2));
}

#[test]
fn test_waiter_resolved_once() {
    let registry = WaiterRegistry::new();
    let mut rx = registry.register(RequestId(1)).unwrap();

    assert!(registry.deliver(RequestId(1), WaiterEvent::ServerClosed));
    assert!(!registry.deliver(RequestId(1), WaiterEvent::ConnectionLost));
    assert!(!registry.unregister(RequestId(1)));
    assert_eq!(rx.try_recv().unwrap(), WaiterEvent::ServerClosed);
}

#[test]
fn test_unregistered_waiter_ignores_late_reply() {
    let registry = WaiterRegistry::new();
    let _rx = registry.register(RequestId(9)).unwrap();
    assert!(registry.unregister(RequestId(9)));
    assert!(!registry.deliver(RequestId(9), WaiterEvent::Reply(Bytes::new())));
    assert!(registry.is_empty());
}

#[test]
fn test_fail_all_wakes_everyone() {
    let registry = WaiterRegistry::new();
    let mut receivers: Vec<_> = (1..=3).map(|id| registry.register(RequestId(id)).unwrap()).collect();

    assert_eq!(registry.fail_all(WaiterEvent::ConnectionLost), 3);
    assert!(registry.is_empty());
    for rx in &mut receivers {
        assert_eq!(rx.try_recv().unwrap(), WaiterEvent::ConnectionLost);
    }
}

#[test]
fn test_registry_is_bounded() {
    let registry = WaiterRegistry::new();
    let mut receivers = Vec::new();
    for id in 1..=MAX_OUTSTANDING_REQUESTS_PER_CONNECTION as u32 {
        receivers.push(registry.register(RequestId(id)).unwrap());
    }
    assert!(registry.register(RequestId(u32::MAX)).is_none());

    assert!(registry.unregister(RequestId(1)));
    assert!(registry.register(RequestId(u32::MAX)).is_some());
    assert_eq!(registry.len(), MAX_OUTSTANDING_REQUESTS_PER_CONNECTION);
}

#[test]
fn test_concurrent_registration_respects_bound() {
    let registry = WaiterRegistry::new();
    let accepted = AtomicUsize::new(0);
    let per_thread = (MAX_OUTSTANDING_REQUESTS_PER_CONNECTION / 2 + 8) as u32;

    std::thread::scope(|scope| {
        for thread in 0..4u32 {
            let registry = &registry;
            let accepted = &accepted;
            scope.spawn(move || {
                for i in 0..per_thread {
                    if registry.register(RequestId(thread * 1_000_000 + i + 1)).is_some() {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(accepted.load(Ordering::SeqCst), MAX_OUTSTANDING_REQUESTS_PER_CONNECTION);
    assert_eq!(registry.len(), MAX_OUTSTANDING_REQUESTS_PER_CONNECTION);
}

#[test]
fn test_occupied_request_id_is_refused() {
    let registry = WaiterRegistry::new();
    let mut first = registry.register(RequestId(7)).unwrap();

    assert!(registry.register(RequestId(7)).is_none());
    assert_eq!(registry.len(), 1);

    assert!(registry.deliver(RequestId(7), WaiterEvent::ServerClosed));
    assert_eq!(first.try_recv().unwrap(), WaiterEvent::ServerClosed);
    assert!(registry.register(RequestId(7)).is_some());
}

// =========================================================================
// Connection Tests
// =========================================================================

fn request_frame(request_id: RequestId) -> Bytes {
    let endpoint = endpoint("alpha");
    let reference = ObjectReference::new("IDL:Echo:1.0", &b"key"[..]).with_profile(endpoint.clone());
    let header = RequestHeader {
        request_id,
        operation: "echo".to_owned(),
        response_expected: true,
        target: TargetAddress::for_endpoint(&endpoint, &reference),
        version: GiopVersion::V1_2,
        service_contexts: ServiceContexts::new(),
    };
    PostcardMarshaler.encode_request(&header, &Bytes::new(), None).unwrap()
}

async fn open_connection(network: &InMemoryTransport) -> Arc<Connection> {
    let endpoint = endpoint("alpha");
    let channel = network.open(&endpoint).await.unwrap();
    let conn = Arc::new(Connection::new(endpoint, channel));
    Connection::start_reader(&conn);
    conn
}

#[tokio::test]
async fn test_reply_reaches_its_waiter() {
    let network = InMemoryTransport::new();
    network.serve(endpoint("alpha").address().clone(), |_| {
        ServerAction::Reply(ReplyBody::NoException(Bytes::from_static(b"pong")))
    });
    let conn = open_connection(&network).await;

    let id = conn.next_request_id();
    let rx = conn.register_waiter(id).unwrap();
    conn.send(request_frame(id)).await.unwrap();

    let WaiterEvent::Reply(frame) = rx.await.unwrap() else {
        panic!("expected a reply");
    };
    let reply = PostcardMarshaler.decode_reply(&frame).unwrap();
    assert_eq!(reply.request_id, id);
    assert_eq!(reply.body, ReplyBody::NoException(Bytes::from_static(b"pong")));
    assert_eq!(conn.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_orderly_close_fails_waiters_as_server_closed() {
    let network = InMemoryTransport::new();
    network.serve(endpoint("alpha").address().clone(), |_| ServerAction::CloseConnection);
    let conn = open_connection(&network).await;

    let id = conn.next_request_id();
    let rx = conn.register_waiter(id).unwrap();
    conn.send(request_frame(id)).await.unwrap();

    assert_eq!(rx.await.unwrap(), WaiterEvent::ServerClosed);
    assert!(conn.is_closed());
    assert!(!conn.is_live());
}

#[tokio::test]
async fn test_dropped_connection_fails_waiters_as_lost() {
    let network = InMemoryTransport::new();
    network.serve(endpoint("alpha").address().clone(), |_| ServerAction::Drop);
    let conn = open_connection(&network).await;

    let id = conn.next_request_id();
    let rx = conn.register_waiter(id).unwrap();
    conn.send(request_frame(id)).await.unwrap();

    assert_eq!(rx.await.unwrap(), WaiterEvent::ConnectionLost);
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_send_on_closed_connection_fails() {
    let network = InMemoryTransport::new();
    network.serve(endpoint("alpha").address().clone(), |_| ServerAction::NoReply);
    let conn = open_connection(&network).await;

    conn.close();
    let err = conn.send(request_frame(RequestId(1))).await.unwrap_err();
    assert!(matches!(err, TransportError::Closed { .. }));
}

#[tokio::test]
async fn test_failed_write_closes_connection() {
    let network = InMemoryTransport::new();
    network.serve(endpoint("alpha").address().clone(), |_| ServerAction::FailSend);
    let conn = open_connection(&network).await;

    let err = conn.send(request_frame(RequestId(1))).await.unwrap_err();
    assert!(matches!(err, TransportError::Io { .. }));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_post_initial_flag_starts_clear() {
    let network = InMemoryTransport::new();
    network.serve(endpoint("alpha").address().clone(), |_| ServerAction::NoReply);
    let conn = open_connection(&network).await;

    assert!(!conn.post_initial_contexts());
    conn.mark_post_initial_contexts();
    assert!(conn.post_initial_contexts());
    assert!(conn.codesets().is_none());
    assert!(conn.peer_orb_version().is_none());
}
