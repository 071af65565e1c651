//! Integration tests for protocol-driven retry, redirects and addressing
//! mode retries.

mod support;

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use giop_dispatch::DispatchConfig;
use giop_dispatch::DispatchError;
use giop_dispatch::Dispatcher;
use giop_dispatch::DispatcherRegistry;
use giop_dispatch::Invocation;
use giop_dispatch::InvocationFailure;
use giop_dispatch::ObjectStub;
use giop_dispatch::PostcardMarshaler;
use giop_dispatch::testing::ServerAction;
use giop_dispatch::types::AddressingDisposition;
use giop_dispatch::types::CompletionStatus;
use giop_dispatch::types::ReplyBody;
use giop_dispatch::types::SystemExceptionKind;
use giop_dispatch::types::TargetAddress;
use giop_dispatch::types::UserException;
use proptest::prelude::*;
use support::address;
use support::dispatcher;
use support::dispatcher_with;
use support::forward;
use support::network;
use support::reference;
use support::reply;
use support::system;
use support::transient;

// ============================================================================
// Endpoint failover
// ============================================================================

#[tokio::test]
async fn test_refused_endpoint_fails_over_to_next() {
    support::init_tracing();
    let network = network();
    network.serve(address("beta"), |_| reply(b"from beta"));
    let dispatcher = dispatcher(&network);

    let reply = dispatcher.dispatch(&reference(&["alpha", "beta"]), Invocation::new("ping", Bytes::new())).await.unwrap();

    assert_eq!(&reply.result[..], b"from beta");
    assert_eq!(reply.attempts, 2);
    assert_eq!(network.stats(&address("alpha")).refused, 1);
    assert_eq!(network.stats(&address("beta")).requests, 1);
}

#[tokio::test]
async fn test_transient_failure_moves_to_next_endpoint() {
    let network = network();
    network.serve(address("alpha"), |_| transient());
    network.serve(address("beta"), |_| reply(b"ok"));
    let dispatcher = dispatcher(&network);

    let reply = dispatcher.dispatch(&reference(&["alpha", "beta"]), Invocation::new("ping", Bytes::new())).await.unwrap();

    assert_eq!(reply.attempts, 2);
    assert_eq!(network.stats(&address("alpha")).requests, 1);
    assert_eq!(network.stats(&address("beta")).requests, 1);
}

fn all_endpoints_transient(k: usize) -> (u32, Vec<u64>, DispatchError) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(async {
        let network = network();
        let hosts: Vec<String> = (0..k).map(|i| format!("host-{i}")).collect();
        for host in &hosts {
            network.serve(address(host), |_| transient());
        }
        let dispatcher = dispatcher(&network);
        let hosts: Vec<&str> = hosts.iter().map(String::as_str).collect();

        let err = dispatcher.dispatch(&reference(&hosts), Invocation::new("ping", Bytes::new())).await.unwrap_err();
        let attempts = match &err {
            DispatchError::NowhereToGo { attempts, .. } => *attempts,
            other => panic!("expected NowhereToGo, got {other:?}"),
        };
        let requests = hosts.iter().map(|h| network.stats(&address(h)).requests).collect();
        (attempts, requests, err)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// With K endpoints that all fail retryably, exactly K attempts are made,
    /// one per endpoint, and the last failure is reported.
    #[test]
    fn test_retry_terminates_after_every_endpoint(k in 1usize..=8) {
        let (attempts, requests, err) = all_endpoints_transient(k);
        prop_assert_eq!(attempts as usize, k);
        prop_assert!(requests.iter().all(|&r| r == 1));
        let exception = err.to_system_exception().unwrap();
        prop_assert_eq!(exception.kind, SystemExceptionKind::Transient);
    }
}

#[tokio::test]
async fn test_attempt_cap_below_endpoint_count() {
    let network = network();
    for host in ["a", "b", "c", "d", "e"] {
        network.serve(address(host), |_| transient());
    }
    let config = DispatchConfig {
        max_attempts: 2,
        max_location_forwards: 1,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher_with(&network, config);

    let err = dispatcher.dispatch(&reference(&["a", "b", "c"]), Invocation::new("ping", Bytes::new())).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::AttemptLimitExceeded {
            max: 2,
            last_failure: Some(_),
            ..
        }
    ));
    assert_eq!(network.stats(&address("c")).opens, 0);

    // Exhausting the list on the capped attempt reports the exhaustion.
    let err = dispatcher.dispatch(&reference(&["d", "e"]), Invocation::new("ping", Bytes::new())).await.unwrap_err();
    assert!(matches!(err, DispatchError::NowhereToGo { attempts: 2, .. }));
}

#[tokio::test]
async fn test_maybe_completed_exception_is_not_retried() {
    let network = network();
    network.serve(address("alpha"), |_| system(SystemExceptionKind::CommFailure, CompletionStatus::Maybe));
    network.serve(address("beta"), |_| reply(b"ok"));
    let dispatcher = dispatcher(&network);

    let err = dispatcher.dispatch(&reference(&["alpha", "beta"]), Invocation::new("ping", Bytes::new())).await.unwrap_err();

    assert!(matches!(err, DispatchError::Failed { .. }));
    assert_eq!(network.stats(&address("beta")).requests, 0);
}

#[tokio::test]
async fn test_lost_connection_is_not_retried() {
    let network = network();
    network.serve(address("alpha"), |_| ServerAction::Drop);
    network.serve(address("beta"), |_| reply(b"ok"));
    let dispatcher = dispatcher(&network);

    let err = dispatcher.dispatch(&reference(&["alpha", "beta"]), Invocation::new("ping", Bytes::new())).await.unwrap_err();

    let DispatchError::Failed { source, .. } = err else {
        panic!("expected a fatal failure, got {err:?}");
    };
    assert!(matches!(*source, InvocationFailure::ConnectionLost { .. }));
    assert_eq!(source.completion_status(), CompletionStatus::Maybe);
    assert_eq!(network.stats(&address("beta")).requests, 0);
}

#[tokio::test]
async fn test_failed_write_moves_to_next_endpoint() {
    let network = network();
    network.serve(address("alpha"), |_| ServerAction::FailSend);
    network.serve(address("beta"), |_| reply(b"ok"));
    let dispatcher = dispatcher(&network);

    let reply = dispatcher.dispatch(&reference(&["alpha", "beta"]), Invocation::new("ping", Bytes::new())).await.unwrap();
    assert_eq!(reply.attempts, 2);
}

#[tokio::test]
async fn test_orderly_close_retries_same_endpoint_on_new_connection() {
    let network = network();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    network.serve(address("alpha"), move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            ServerAction::CloseConnection
        } else {
            reply(b"second time")
        }
    });
    let dispatcher = dispatcher(&network);

    let reply = dispatcher.dispatch(&reference(&["alpha"]), Invocation::new("ping", Bytes::new())).await.unwrap();

    assert_eq!(&reply.result[..], b"second time");
    assert_eq!(reply.attempts, 2);
    assert_eq!(network.stats(&address("alpha")).opens, 2);
}

// ============================================================================
// User exceptions
// ============================================================================

#[tokio::test]
async fn test_user_exception_is_returned_unchanged_and_never_retried() {
    let network = network();
    let exception = UserException {
        repository_id: "IDL:NotFound:1.0".into(),
        payload: Bytes::from_static(b"\x00\x2a"),
    };
    let body = PostcardMarshaler.encode_user_exception(&exception).unwrap();
    network.serve(address("alpha"), move |_| ServerAction::Reply(ReplyBody::UserException(body.clone())));
    network.serve(address("beta"), |_| reply(b"ok"));
    let dispatcher = dispatcher(&network);

    let err = dispatcher.dispatch(&reference(&["alpha", "beta"]), Invocation::new("find", Bytes::new())).await.unwrap_err();

    let DispatchError::UserException { exception: raised, .. } = err else {
        panic!("expected a user exception, got {err:?}");
    };
    assert_eq!(raised, exception);
    assert_eq!(network.stats(&address("alpha")).requests, 1);
    assert_eq!(network.stats(&address("beta")).requests, 0);
}

// ============================================================================
// Location forwards
// ============================================================================

#[tokio::test]
async fn test_redirect_replaces_remaining_endpoints() {
    let network = network();
    network.serve(address("alpha"), |_| forward(reference(&["gamma"]), false));
    network.serve(address("beta"), |_| reply(b"from beta"));
    network.serve(address("gamma"), |_| reply(b"from gamma"));
    let dispatcher = dispatcher(&network);

    let reply = dispatcher.dispatch(&reference(&["alpha", "beta"]), Invocation::new("ping", Bytes::new())).await.unwrap();

    assert_eq!(&reply.result[..], b"from gamma");
    assert!(reply.permanent_forward.is_none());
    assert_eq!(network.stats(&address("beta")).requests, 0);
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let network = network();
    network.serve(address("alpha"), |_| forward(reference(&["alpha"]), false));
    let config = DispatchConfig {
        max_location_forwards: 4,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher_with(&network, config);

    let err = dispatcher.dispatch(&reference(&["alpha"]), Invocation::new("ping", Bytes::new())).await.unwrap_err();

    assert!(matches!(err, DispatchError::ForwardLimitExceeded { max: 4 }));
    assert_eq!(network.stats(&address("alpha")).requests, 5);
}

#[tokio::test]
async fn test_permanent_forward_updates_stub() {
    let network = network();
    network.serve(address("alpha"), |_| forward(reference(&["gamma"]), true));
    network.serve(address("gamma"), |_| reply(b"moved"));
    let registry = Arc::new(DispatcherRegistry::new(Arc::new(dispatcher(&network))));
    let stub = ObjectStub::new(reference(&["alpha"]), registry);

    let result = stub.invoke(Invocation::new("ping", Bytes::new())).await.unwrap();
    assert_eq!(&result[..], b"moved");
    assert_eq!(stub.reference(), reference(&["gamma"]));

    stub.invoke(Invocation::new("ping", Bytes::new())).await.unwrap();
    assert_eq!(network.stats(&address("alpha")).requests, 1);
    assert_eq!(network.stats(&address("gamma")).requests, 2);
}

// ============================================================================
// Addressing mode
// ============================================================================

#[tokio::test]
async fn test_addressing_mode_retry_reuses_connection() {
    let network = network();
    network.serve(address("alpha"), |request| match request.header.target {
        TargetAddress::Profile { .. } => reply(b"ok"),
        _ => ServerAction::Reply(ReplyBody::NeedsAddressingMode(AddressingDisposition::Profile)),
    });
    let dispatcher = dispatcher(&network);

    let reply = dispatcher.dispatch(&reference(&["alpha"]), Invocation::new("ping", Bytes::new())).await.unwrap();

    assert_eq!(reply.attempts, 2);
    let stats = network.stats(&address("alpha"));
    assert_eq!(stats.opens, 1);
    assert_eq!(stats.requests, 2);

    let received = network.received(&address("alpha"));
    assert_eq!(received[0].header.target.disposition(), AddressingDisposition::ObjectKey);
    assert_eq!(received[1].header.target.disposition(), AddressingDisposition::Profile);
    assert_ne!(received[0].header.request_id, received[1].header.request_id);
}

#[tokio::test]
async fn test_addressing_mode_retries_are_bounded() {
    let network = network();
    network.serve(address("alpha"), |_| {
        ServerAction::Reply(ReplyBody::NeedsAddressingMode(AddressingDisposition::Profile))
    });
    let dispatcher = dispatcher(&network);

    let err = dispatcher.dispatch(&reference(&["alpha"]), Invocation::new("ping", Bytes::new())).await.unwrap_err();

    assert!(matches!(err, DispatchError::AddressingLimitExceeded { max: 3, .. }));
    assert_eq!(network.stats(&address("alpha")).requests, 4);
}
