//! Request and reply message structures handed to and returned by the
//! marshal collaborator.
//!
//! The byte-level encoding of these structures is the marshaler's business;
//! the dispatch engine only builds headers and classifies reply bodies.

use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::REPLY_LOCATION_FORWARD;
use crate::constants::REPLY_LOCATION_FORWARD_PERM;
use crate::constants::REPLY_NEEDS_ADDRESSING_MODE;
use crate::constants::REPLY_NO_EXCEPTION;
use crate::constants::REPLY_SYSTEM_EXCEPTION;
use crate::constants::REPLY_USER_EXCEPTION;
use crate::endpoint::AddressingDisposition;
use crate::endpoint::EndpointDescriptor;
use crate::endpoint::GiopVersion;
use crate::endpoint::ObjectReference;
use crate::exception::SystemException;
use crate::service_context::ServiceContexts;

/// Per-connection request identifier correlating a reply with its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the target object is identified inside a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetAddress {
    /// By object key.
    ObjectKey(Bytes),
    /// By the profile the request is sent through.
    Profile {
        /// Profile the request travels over.
        endpoint: EndpointDescriptor,
        /// Object key within that profile.
        object_key: Bytes,
    },
    /// By the full object reference.
    Reference(ObjectReference),
}

impl TargetAddress {
    /// Build the target address the endpoint's addressing disposition calls for.
    pub fn for_endpoint(endpoint: &EndpointDescriptor, reference: &ObjectReference) -> Self {
        let disposition = if endpoint.version().supports_addressing_disposition() {
            endpoint.addressing()
        } else {
            AddressingDisposition::ObjectKey
        };
        match disposition {
            AddressingDisposition::ObjectKey => Self::ObjectKey(reference.object_key.clone()),
            AddressingDisposition::Profile => Self::Profile {
                endpoint: endpoint.clone(),
                object_key: reference.object_key.clone(),
            },
            AddressingDisposition::Reference => Self::Reference(reference.clone()),
        }
    }

    /// Disposition this address is encoded with.
    pub fn disposition(&self) -> AddressingDisposition {
        match self {
            Self::ObjectKey(_) => AddressingDisposition::ObjectKey,
            Self::Profile { .. } => AddressingDisposition::Profile,
            Self::Reference(_) => AddressingDisposition::Reference,
        }
    }
}

/// Header of an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Request id, unique per connection and per attempt.
    pub request_id: RequestId,
    /// Operation name.
    pub operation: String,
    /// False for one-way calls.
    pub response_expected: bool,
    /// Target object.
    pub target: TargetAddress,
    /// Protocol version of the request.
    pub version: GiopVersion,
    /// Attached service contexts.
    pub service_contexts: ServiceContexts,
}

/// Classified body of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyBody {
    /// Normal completion with the encoded result.
    NoException(Bytes),
    /// Application-declared exception, still encoded.
    UserException(Bytes),
    /// Protocol-level exception.
    SystemException(SystemException),
    /// Resend the request to another reference.
    LocationForward {
        /// The reference to resend to.
        target: ObjectReference,
        /// Whether the forward replaces the caller's reference for future calls.
        permanent: bool,
    },
    /// Resend to the same endpoint using another addressing disposition.
    NeedsAddressingMode(AddressingDisposition),
}

impl ReplyBody {
    /// Wire reply status code of this body.
    pub fn status_code(&self) -> u32 {
        match self {
            Self::NoException(_) => REPLY_NO_EXCEPTION,
            Self::UserException(_) => REPLY_USER_EXCEPTION,
            Self::SystemException(_) => REPLY_SYSTEM_EXCEPTION,
            Self::LocationForward { permanent: false, .. } => REPLY_LOCATION_FORWARD,
            Self::LocationForward { permanent: true, .. } => REPLY_LOCATION_FORWARD_PERM,
            Self::NeedsAddressingMode(_) => REPLY_NEEDS_ADDRESSING_MODE,
        }
    }
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMessage {
    /// Id of the request this reply answers.
    pub request_id: RequestId,
    /// Service contexts attached by the server.
    pub service_contexts: ServiceContexts,
    /// Reply body.
    pub body: ReplyBody,
}
