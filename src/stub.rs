//! Caller-side handle to a remote object.

use std::sync::Arc;

use bytes::Bytes;
use giop_dispatch_types::ObjectReference;
use parking_lot::RwLock;
use tracing::info;

use crate::dispatcher::DispatcherRegistry;
use crate::dispatcher::Invocation;
use crate::error::DispatchError;

/// A reference plus the registry that knows how to invoke it.
///
/// When a server permanently forwards the reference, the stub adopts the new
/// reference for all later invocations.
#[derive(Debug)]
pub struct ObjectStub {
    reference: RwLock<ObjectReference>,
    registry: Arc<DispatcherRegistry>,
}

impl ObjectStub {
    /// Create a stub for `reference`.
    pub fn new(reference: ObjectReference, registry: Arc<DispatcherRegistry>) -> Self {
        Self {
            reference: RwLock::new(reference),
            registry,
        }
    }

    /// The reference invocations currently go to.
    pub fn reference(&self) -> ObjectReference {
        self.reference.read().clone()
    }

    /// Invoke through the dispatcher registered for the reference's
    /// subcontract and return the decoded result.
    pub async fn invoke(&self, invocation: Invocation) -> Result<Bytes, DispatchError> {
        let reference = self.reference();
        let dispatcher = Arc::clone(self.registry.for_reference(&reference));
        let reply = dispatcher.dispatch(&reference, invocation).await?;
        if let Some(forward) = reply.permanent_forward {
            info!(from = %reference, to = %forward, "adopting permanently forwarded reference");
            *self.reference.write() = forward;
        }
        Ok(reply.result)
    }
}
