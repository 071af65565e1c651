//! Test support utilities for dispatch integration tests.
//!
//! Builds references, simulated servers and dispatchers over the in-memory
//! network so each test only states what its servers do.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use giop_dispatch::DispatchConfig;
use giop_dispatch::PostcardMarshaler;
use giop_dispatch::RemoteDispatcher;
use giop_dispatch::testing::InMemoryTransport;
use giop_dispatch::testing::ServerAction;
use giop_dispatch::types::CompletionStatus;
use giop_dispatch::types::EndpointDescriptor;
use giop_dispatch::types::GiopVersion;
use giop_dispatch::types::ObjectReference;
use giop_dispatch::types::ReplyBody;
use giop_dispatch::types::ServerAddress;
use giop_dispatch::types::SystemException;
use giop_dispatch::types::SystemExceptionKind;

pub const PORT: u16 = 2809;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("giop_dispatch=debug").with_test_writer().try_init();
}

pub fn endpoint(host: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(host, PORT, GiopVersion::V1_2)
}

pub fn address(host: &str) -> ServerAddress {
    ServerAddress::new(host, PORT)
}

/// A reference reachable through `hosts`, in order.
pub fn reference(hosts: &[&str]) -> ObjectReference {
    hosts
        .iter()
        .fold(ObjectReference::new("IDL:Echo:1.0", &b"echo"[..]), |r, host| r.with_profile(endpoint(host)))
}

pub fn reply(body: &'static [u8]) -> ServerAction {
    ServerAction::Reply(ReplyBody::NoException(Bytes::from_static(body)))
}

pub fn system(kind: SystemExceptionKind, completed: CompletionStatus) -> ServerAction {
    ServerAction::Reply(ReplyBody::SystemException(SystemException::new(kind, 0, completed)))
}

pub fn transient() -> ServerAction {
    system(SystemExceptionKind::Transient, CompletionStatus::No)
}

pub fn forward(target: ObjectReference, permanent: bool) -> ServerAction {
    ServerAction::Reply(ReplyBody::LocationForward { target, permanent })
}

pub fn network() -> Arc<InMemoryTransport> {
    Arc::new(InMemoryTransport::new())
}

pub fn dispatcher(network: &Arc<InMemoryTransport>) -> RemoteDispatcher {
    dispatcher_with(network, DispatchConfig::default())
}

pub fn dispatcher_with(network: &Arc<InMemoryTransport>, config: DispatchConfig) -> RemoteDispatcher {
    RemoteDispatcher::builder(network.clone(), Arc::new(PostcardMarshaler))
        .config(config)
        .build()
        .expect("test configuration is valid")
}
