//! Per-attempt request state.
//!
//! A [`MessageMediator`] lives for exactly one attempt. It owns the attempt's
//! request id and waiter registration, so dropping it (on any path, including
//! a cancelled future) removes the waiter from the connection.

use std::sync::Arc;

use bytes::Bytes;
use giop_dispatch_types::AddressingDisposition;
use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::ObjectReference;
use giop_dispatch_types::ReplyBody;
use giop_dispatch_types::ReplyMessage;
use giop_dispatch_types::RequestHeader;
use giop_dispatch_types::RequestId;
use giop_dispatch_types::ServiceContext;
use giop_dispatch_types::ServiceContextError;
use giop_dispatch_types::ServiceContexts;
use giop_dispatch_types::SystemException;
use giop_dispatch_types::TargetAddress;
use giop_dispatch_types::UserException;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use crate::connection::Connection;
use crate::connection::WaiterEvent;
use crate::error::DispatchError;
use crate::error::InvocationFailure;
use crate::interceptor::ClientReplyInfo;
use crate::interceptor::ClientRequestInfo;

/// Classified outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    /// Normal reply with the still-encoded result.
    NoException(Bytes),
    /// Application-declared exception.
    UserException(UserException),
    /// Protocol-level exception, with detail text if the server sent any.
    SystemException(SystemException),
    /// Resend to another reference.
    LocationForward {
        /// The reference to resend to.
        target: ObjectReference,
        /// Whether the caller's reference should be replaced.
        permanent: bool,
    },
    /// Resend to the same endpoint with another addressing disposition.
    NeedsAddressingMode(AddressingDisposition),
}

impl ReplyStatus {
    /// Short name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoException(_) => "NO_EXCEPTION",
            Self::UserException(_) => "USER_EXCEPTION",
            Self::SystemException(_) => "SYSTEM_EXCEPTION",
            Self::LocationForward { permanent: false, .. } => "LOCATION_FORWARD",
            Self::LocationForward { permanent: true, .. } => "LOCATION_FORWARD_PERM",
            Self::NeedsAddressingMode(_) => "NEEDS_ADDRESSING_MODE",
        }
    }
}

/// A redirect to follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// The new target.
    pub target: ObjectReference,
    /// Whether the redirect outlives this invocation.
    pub permanent: bool,
}

/// What the dispatch loop does after an attempt.
#[derive(Debug)]
pub enum RetryDecision {
    /// Return the decoded result.
    Succeed(Bytes),
    /// Return the error.
    FailFatal(DispatchError),
    /// Try the same endpoint again.
    RetrySameTarget {
        /// Failure that caused the retry, if any.
        cause: Option<InvocationFailure>,
    },
    /// Move on: follow `redirect` if present, otherwise advance to the next
    /// candidate endpoint.
    RetryNextTarget {
        /// Redirect to follow.
        redirect: Option<Redirect>,
        /// Failure that caused the move, if any.
        cause: Option<InvocationFailure>,
    },
}

/// State of one attempt.
pub struct MessageMediator {
    operation: String,
    one_way: bool,
    attempt: u32,
    endpoint: EndpointDescriptor,
    connection: Arc<Connection>,
    request_id: RequestId,
    request_contexts: ServiceContexts,
    reply_contexts: ServiceContexts,
    reply_status_code: Option<u32>,
    exception_detail: Option<String>,
    waiter_registered: bool,
    sent: bool,
    cancel_sent: bool,
}

impl MessageMediator {
    /// Start an attempt on `connection`, drawing a fresh request id.
    pub fn new(
        operation: impl Into<String>,
        one_way: bool,
        attempt: u32,
        endpoint: EndpointDescriptor,
        connection: Arc<Connection>,
    ) -> Self {
        let request_id = connection.next_request_id();
        Self {
            operation: operation.into(),
            one_way,
            attempt,
            endpoint,
            connection,
            request_id,
            request_contexts: ServiceContexts::new(),
            reply_contexts: ServiceContexts::new(),
            reply_status_code: None,
            exception_detail: None,
            waiter_registered: false,
            sent: false,
            cancel_sent: false,
        }
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Whether the caller expects no reply.
    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    /// Attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Endpoint of this attempt, with its current addressing disposition.
    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.endpoint
    }

    /// Connection carrying this attempt.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Request id of this attempt.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    // ========================================================================
    // Service contexts
    // ========================================================================

    /// Attach a context to the outgoing request.
    pub fn add_request_context(&mut self, context: ServiceContext) -> Result<(), ServiceContextError> {
        self.request_contexts.put(context)
    }

    /// Contexts attached to the outgoing request.
    pub fn request_contexts(&self) -> &ServiceContexts {
        &self.request_contexts
    }

    /// Contexts the server attached to its reply.
    pub fn reply_contexts(&self) -> &ServiceContexts {
        &self.reply_contexts
    }

    /// Diagnostic text from the reply's exception detail context.
    pub fn exception_detail(&self) -> Option<&str> {
        self.exception_detail.as_deref()
    }

    pub(crate) fn set_exception_detail(&mut self, detail: String) {
        self.exception_detail = Some(detail);
    }

    /// Wire status code of the reply, once one arrived.
    pub fn reply_status_code(&self) -> Option<u32> {
        self.reply_status_code
    }

    // ========================================================================
    // Request and reply
    // ========================================================================

    /// Build the request header for `target`.
    pub fn request_header(&self, target: &ObjectReference) -> RequestHeader {
        RequestHeader {
            request_id: self.request_id,
            operation: self.operation.clone(),
            response_expected: !self.one_way,
            target: TargetAddress::for_endpoint(&self.endpoint, target),
            version: self.endpoint.version(),
            service_contexts: self.request_contexts.clone(),
        }
    }

    /// Take in a decoded reply, keeping its contexts, and return its body.
    pub(crate) fn accept_reply(&mut self, reply: ReplyMessage) -> ReplyBody {
        self.reply_status_code = Some(reply.body.status_code());
        self.reply_contexts = reply.service_contexts;
        reply.body
    }

    pub(crate) fn request_info(&mut self) -> ClientRequestInfo<'_> {
        ClientRequestInfo {
            operation: &self.operation,
            endpoint: &self.endpoint,
            request_id: self.request_id,
            one_way: self.one_way,
            attempt: self.attempt,
            contexts: &mut self.request_contexts,
        }
    }

    pub(crate) fn reply_info<'a>(&'a self, status: &'a ReplyStatus) -> ClientReplyInfo<'a> {
        ClientReplyInfo {
            operation: &self.operation,
            endpoint: &self.endpoint,
            request_id: self.request_id,
            status,
            reply_contexts: &self.reply_contexts,
        }
    }

    // ========================================================================
    // Waiter lifecycle
    // ========================================================================

    /// Register this attempt's reply waiter. `None` when the connection has
    /// too many requests outstanding.
    pub(crate) fn register_waiter(&mut self) -> Option<oneshot::Receiver<WaiterEvent>> {
        let rx = self.connection.register_waiter(self.request_id)?;
        self.waiter_registered = true;
        Some(rx)
    }

    /// Remove the waiter. Returns false when a reply or connection event
    /// already claimed it.
    pub(crate) fn unregister_waiter(&mut self) -> bool {
        if !self.waiter_registered {
            return false;
        }
        self.waiter_registered = false;
        self.connection.unregister_waiter(self.request_id)
    }

    /// A waiter that was woken is no longer registered.
    pub(crate) fn waiter_resolved(&mut self) {
        self.waiter_registered = false;
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }

    /// Whether the request reached the transport.
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Tell the server the request was abandoned. Sends at most once, and
    /// only if the request was actually sent.
    pub(crate) async fn send_cancel_once(&mut self) {
        if !self.sent || self.cancel_sent {
            return;
        }
        self.cancel_sent = true;
        if let Err(err) = self.connection.send_cancel(self.request_id).await {
            warn!(request_id = %self.request_id, error = %err, "failed to send cancel request");
        } else {
            debug!(request_id = %self.request_id, "cancel request sent");
        }
    }

    /// Release everything the attempt holds on its connection.
    pub fn end_attempt(&mut self) {
        if self.unregister_waiter() {
            debug!(request_id = %self.request_id, "unregistered abandoned waiter");
        }
    }
}

impl Drop for MessageMediator {
    fn drop(&mut self) {
        self.end_attempt();
    }
}
