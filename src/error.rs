//! Error types for the dispatch engine.
//!
//! Three layers:
//!
//! - [`TransportError`] and [`MarshalError`] are raised by collaborators.
//! - [`InvocationFailure`] is a failure observed on one attempt. The retry
//!   policy classifies it into retry-same, retry-next or fatal.
//! - [`DispatchError`] is what a caller of an invocation sees.

use std::time::Duration;

use giop_dispatch_types::CompletionStatus;
use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::RequestId;
use giop_dispatch_types::ServerAddress;
use giop_dispatch_types::ServiceContextError;
use giop_dispatch_types::SystemException;
use giop_dispatch_types::SystemExceptionKind;
use giop_dispatch_types::UserException;
use snafu::Snafu;

// ============================================================================
// Collaborator Errors
// ============================================================================

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    /// The connection could not be established.
    #[snafu(display("failed to connect to {address}: {reason}"))]
    Connect {
        /// Server that refused or could not be reached.
        address: ServerAddress,
        /// Transport specific description.
        reason: String,
    },

    /// Writing to an established connection failed.
    #[snafu(display("I/O error on connection to {address}: {reason}"))]
    Io {
        /// Server at the other end of the connection.
        address: ServerAddress,
        /// Transport specific description.
        reason: String,
    },

    /// The connection was already closed.
    #[snafu(display("connection to {address} is closed"))]
    Closed {
        /// Server at the other end of the connection.
        address: ServerAddress,
    },
}

/// Errors raised by a marshaler.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum MarshalError {
    /// A request could not be encoded.
    #[snafu(display("failed to encode request for '{operation}': {reason}"))]
    Encode {
        /// Operation being encoded.
        operation: String,
        /// What went wrong.
        reason: String,
    },

    /// A reply, result or exception could not be decoded.
    #[snafu(display("failed to decode reply: {reason}"))]
    Decode {
        /// What went wrong.
        reason: String,
    },

    /// Wide characters were used on a connection whose code-set negotiation
    /// did not produce a wide character code set.
    #[snafu(display("wide character data is not allowed on this connection"))]
    WideCharNotAllowed,
}

// ============================================================================
// Per-attempt Failures
// ============================================================================

/// A failure observed on a single attempt.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InvocationFailure {
    /// The connection to the endpoint could not be created.
    #[snafu(display("connection to {endpoint} could not be established: {source}"))]
    ConnectFailed {
        /// Endpoint of the attempt.
        endpoint: EndpointDescriptor,
        /// Underlying transport error.
        source: TransportError,
    },

    /// The request could not be written.
    #[snafu(display("sending to {endpoint} failed: {source}"))]
    SendFailed {
        /// Endpoint of the attempt.
        endpoint: EndpointDescriptor,
        /// Underlying transport error.
        source: TransportError,
    },

    /// The connection broke while the request was outstanding.
    #[snafu(display("connection to {endpoint} lost while awaiting request {request_id}"))]
    ConnectionLost {
        /// Endpoint of the attempt.
        endpoint: EndpointDescriptor,
        /// The outstanding request.
        request_id: RequestId,
    },

    /// The server closed the connection in an orderly way without processing
    /// the request.
    #[snafu(display("{endpoint} closed the connection before processing request {request_id}"))]
    ServerClosed {
        /// Endpoint of the attempt.
        endpoint: EndpointDescriptor,
        /// The unprocessed request.
        request_id: RequestId,
    },

    /// The server, or an interceptor, raised a system exception.
    #[snafu(display("system exception from {endpoint}: {exception}"))]
    System {
        /// Endpoint of the attempt.
        endpoint: EndpointDescriptor,
        /// The exception raised.
        exception: SystemException,
    },
}

impl InvocationFailure {
    /// Endpoint the failing attempt targeted.
    pub fn endpoint(&self) -> &EndpointDescriptor {
        match self {
            Self::ConnectFailed { endpoint, .. }
            | Self::SendFailed { endpoint, .. }
            | Self::ConnectionLost { endpoint, .. }
            | Self::ServerClosed { endpoint, .. }
            | Self::System { endpoint, .. } => endpoint,
        }
    }

    /// Whether the server may have executed the operation.
    pub fn completion_status(&self) -> CompletionStatus {
        match self {
            Self::ConnectFailed { .. } | Self::SendFailed { .. } | Self::ServerClosed { .. } => CompletionStatus::No,
            Self::ConnectionLost { .. } => CompletionStatus::Maybe,
            Self::System { exception, .. } => exception.completed,
        }
    }

    /// The system exception a caller would see for this failure.
    pub fn to_system_exception(&self) -> SystemException {
        match self {
            Self::ConnectFailed { source, .. } => {
                SystemException::new(SystemExceptionKind::Transient, 0, CompletionStatus::No)
                    .with_detail(source.to_string())
            }
            Self::SendFailed { source, .. } => {
                SystemException::new(SystemExceptionKind::CommFailure, 0, CompletionStatus::No)
                    .with_detail(source.to_string())
            }
            Self::ConnectionLost { .. } => {
                SystemException::new(SystemExceptionKind::CommFailure, 0, CompletionStatus::Maybe)
            }
            Self::ServerClosed { .. } => SystemException::new(SystemExceptionKind::Transient, 0, CompletionStatus::No),
            Self::System { exception, .. } => exception.clone(),
        }
    }
}

// ============================================================================
// Invocation Errors
// ============================================================================

/// Errors returned to the caller of an invocation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DispatchError {
    /// The reference (or a forward target) resolved to no endpoint.
    #[snafu(display("object reference {repository_id} has no usable endpoint"))]
    EmptyTarget {
        /// Repository id of the reference.
        repository_id: String,
    },

    /// Every candidate endpoint failed with a retryable failure.
    #[snafu(display("no endpoint left to try after {attempts} attempts: {source}"))]
    NowhereToGo {
        /// Attempts made.
        attempts: u32,
        /// The last failure observed.
        source: Box<InvocationFailure>,
    },

    /// The invocation failed with a non-retryable failure.
    #[snafu(display("invocation of '{operation}' failed: {source}"))]
    Failed {
        /// Operation invoked.
        operation: String,
        /// The fatal failure.
        source: Box<InvocationFailure>,
    },

    /// The server raised an application-declared exception.
    #[snafu(display("'{operation}' raised {exception}"))]
    UserException {
        /// Operation invoked.
        operation: String,
        /// The exception, returned unchanged.
        exception: UserException,
    },

    /// A colocated servant raised a system exception.
    #[snafu(display("colocated invocation of '{operation}' failed: {exception}"))]
    Local {
        /// Operation invoked.
        operation: String,
        /// The exception raised.
        exception: SystemException,
    },

    /// Encoding the request or decoding the reply failed.
    #[snafu(display("marshaling '{operation}' failed: {source}"))]
    Marshal {
        /// Operation invoked.
        operation: String,
        /// Underlying marshal error.
        source: MarshalError,
    },

    /// A service context could not be attached to the request.
    #[snafu(display("service context rejected: {source}"))]
    ServiceContext {
        /// Underlying error.
        source: ServiceContextError,
    },

    /// The caller cancelled the invocation.
    #[snafu(display("invocation of '{operation}' cancelled"))]
    Cancelled {
        /// Operation invoked.
        operation: String,
        /// The request outstanding when the cancellation arrived. `None` when
        /// nothing was on the wire yet.
        request_id: Option<RequestId>,
    },

    /// No reply arrived in time.
    #[snafu(display("invocation of '{operation}' timed out after {timeout:?}"))]
    Timeout {
        /// Operation invoked.
        operation: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// Too many location forwards.
    #[snafu(display("location forward limit exceeded (max: {max})"))]
    ForwardLimitExceeded {
        /// Configured limit.
        max: u32,
    },

    /// Too many attempts.
    #[snafu(display("attempt limit exceeded for '{operation}' (max: {max})"))]
    AttemptLimitExceeded {
        /// Operation invoked.
        operation: String,
        /// Configured limit.
        max: u32,
        /// The last failure observed, if any.
        last_failure: Option<Box<InvocationFailure>>,
    },

    /// The server kept asking for another addressing disposition.
    #[snafu(display("addressing mode retry limit exceeded for {endpoint} (max: {max})"))]
    AddressingLimitExceeded {
        /// Endpoint that kept asking.
        endpoint: EndpointDescriptor,
        /// Configured limit.
        max: u32,
    },

    /// The operation name is unusable.
    #[snafu(display("invalid operation name: {reason}"))]
    InvalidOperation {
        /// What is wrong with it.
        reason: String,
    },
}

impl DispatchError {
    /// The system exception equivalent of this error, for callers that
    /// report failures in protocol terms.
    pub fn to_system_exception(&self) -> Option<SystemException> {
        match self {
            Self::NowhereToGo { source, .. } | Self::Failed { source, .. } => Some(source.to_system_exception()),
            Self::Local { exception, .. } => Some(exception.clone()),
            Self::Timeout { .. } => Some(SystemException::new(
                SystemExceptionKind::Timeout,
                0,
                CompletionStatus::Maybe,
            )),
            Self::Marshal { .. } => Some(SystemException::new(SystemExceptionKind::Marshal, 0, CompletionStatus::No)),
            // User exceptions are application results, not protocol failures.
            _ => None,
        }
    }
}
