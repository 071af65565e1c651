//! Invocation dispatchers.
//!
//! A [`Dispatcher`] carries one invocation to an object reference and back.
//! Two implementations exist:
//!
//! - [`RemoteDispatcher`]: the full protocol path with connection reuse,
//!   code-set negotiation, service contexts and protocol-driven retry
//! - [`LocalDispatcher`]: colocated servants, called directly
//!
//! A [`DispatcherRegistry`] maps each reference's subcontract id to the
//! dispatcher handling it, falling back to the default id.

mod local;
mod registry;
mod remote;


use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use giop_dispatch_types::ObjectReference;
pub use local::LocalDispatcher;
pub use local::LocalServant;
pub use local::ServantError;
pub use registry::DispatcherRegistry;
pub use remote::RemoteDispatcher;
pub use remote::RemoteDispatcherBuilder;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;

/// One call to make.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Operation name.
    pub operation: String,
    /// Pre-encoded arguments.
    pub args: Bytes,
    /// No reply expected.
    pub one_way: bool,
    /// Overrides the configured reply timeout.
    pub timeout: Option<Duration>,
    /// Cancels the invocation when triggered.
    pub cancel: Option<CancellationToken>,
    /// The arguments carry wide-character data. Refused on connections whose
    /// code-set negotiation produced no wide code set.
    pub uses_wide_chars: bool,
}

impl Invocation {
    /// A two-way call.
    pub fn new(operation: impl Into<String>, args: impl Into<Bytes>) -> Self {
        Self {
            operation: operation.into(),
            args: args.into(),
            one_way: false,
            timeout: None,
            cancel: None,
            uses_wide_chars: false,
        }
    }

    /// A one-way call.
    pub fn one_way(operation: impl Into<String>, args: impl Into<Bytes>) -> Self {
        Self {
            one_way: true,
            ..Self::new(operation, args)
        }
    }

    /// Use `timeout` instead of the configured reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cancel the invocation when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Mark the arguments as carrying wide-character data.
    pub fn with_wide_chars(mut self) -> Self {
        self.uses_wide_chars = true;
        self
    }
}

/// Outcome of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReply {
    /// Decoded result; empty for one-way calls.
    pub result: Bytes,
    /// Set when a server permanently forwarded the reference. Callers holding
    /// the original reference should replace it.
    pub permanent_forward: Option<ObjectReference>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Carries invocations to object references.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Invoke `invocation` on `target`.
    async fn dispatch(&self, target: &ObjectReference, invocation: Invocation) -> Result<DispatchReply, DispatchError>;
}
