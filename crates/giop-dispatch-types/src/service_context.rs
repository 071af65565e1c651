//! Service contexts: protocol metadata attached to requests and replies,
//! independent of the application payload.

use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

use crate::codeset::CodeSetContext;
use crate::constants::CODE_SETS_CONTEXT_ID;
use crate::constants::EXCEPTION_DETAIL_MESSAGE_ID;
use crate::constants::MAX_SERVICE_CONTEXTS;
use crate::constants::ORB_VERSION_CONTEXT_ID;
use crate::constants::SENDING_CONTEXT_RUN_TIME_ID;

/// Numeric service context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceContextId(pub u32);

impl ServiceContextId {
    /// Negotiated code sets.
    pub const CODE_SETS: ServiceContextId = ServiceContextId(CODE_SETS_CONTEXT_ID);
    /// Sending context (client codebase).
    pub const SENDING_CONTEXT_RUN_TIME: ServiceContextId = ServiceContextId(SENDING_CONTEXT_RUN_TIME_ID);
    /// Diagnostic text for exception replies.
    pub const EXCEPTION_DETAIL_MESSAGE: ServiceContextId = ServiceContextId(EXCEPTION_DETAIL_MESSAGE_ID);
    /// ORB version capability descriptor.
    pub const ORB_VERSION: ServiceContextId = ServiceContextId(ORB_VERSION_CONTEXT_ID);
}

impl fmt::Display for ServiceContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// ORB implementation version advertised through the capability descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrbVersion(pub u8);

impl OrbVersion {
    /// A peer that did not advertise a version.
    pub const FOREIGN: OrbVersion = OrbVersion(0);
    /// The version this implementation advertises.
    pub const CURRENT: OrbVersion = OrbVersion(10);
}

/// A single service context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceContext {
    /// Negotiated transmission code sets.
    CodeSets(CodeSetContext),
    /// ORB version capability descriptor.
    OrbVersion(OrbVersion),
    /// Codebase of the sending side, sent once per connection.
    SendingContextRunTime {
        /// Codebase location.
        codebase: String,
    },
    /// Out-of-band diagnostic text for an exception reply.
    ExceptionDetailMessage(String),
    /// Any context this engine does not interpret.
    Opaque {
        /// Context id.
        id: ServiceContextId,
        /// Encoded context data.
        data: Bytes,
    },
}

impl ServiceContext {
    /// Identifier of this context.
    pub fn id(&self) -> ServiceContextId {
        match self {
            Self::CodeSets(_) => ServiceContextId::CODE_SETS,
            Self::OrbVersion(_) => ServiceContextId::ORB_VERSION,
            Self::SendingContextRunTime { .. } => ServiceContextId::SENDING_CONTEXT_RUN_TIME,
            Self::ExceptionDetailMessage(_) => ServiceContextId::EXCEPTION_DETAIL_MESSAGE,
            Self::Opaque { id, .. } => *id,
        }
    }
}

/// Errors adding a service context to a message.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ServiceContextError {
    /// A context with the same id is already present.
    #[snafu(display("duplicate service context {id}"))]
    Duplicate {
        /// The duplicated id.
        id: ServiceContextId,
    },

    /// The message already carries the maximum number of contexts.
    #[snafu(display("too many service contexts (max: {max})"))]
    TooMany {
        /// Configured limit.
        max: usize,
    },
}

/// Ordered collection of service contexts with unique ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContexts {
    entries: Vec<ServiceContext>,
}

impl ServiceContexts {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a context.
    ///
    /// Tiger Style: Fails instead of overwriting on duplicate ids, and refuses
    /// to grow past [`MAX_SERVICE_CONTEXTS`].
    pub fn put(&mut self, context: ServiceContext) -> Result<(), ServiceContextError> {
        let id = context.id();
        if self.contains(id) {
            return Err(ServiceContextError::Duplicate { id });
        }
        if self.entries.len() >= MAX_SERVICE_CONTEXTS {
            return Err(ServiceContextError::TooMany {
                max: MAX_SERVICE_CONTEXTS,
            });
        }
        self.entries.push(context);
        Ok(())
    }

    /// Look up a context by id.
    pub fn get(&self, id: ServiceContextId) -> Option<&ServiceContext> {
        self.entries.iter().find(|c| c.id() == id)
    }

    /// Whether a context with `id` is present.
    pub fn contains(&self, id: ServiceContextId) -> bool {
        self.get(id).is_some()
    }

    /// Number of contexts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no context is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceContext> {
        self.entries.iter()
    }
}

impl FromIterator<ServiceContext> for ServiceContexts {
    /// Collects contexts, keeping the first occurrence of each id.
    fn from_iter<I: IntoIterator<Item = ServiceContext>>(iter: I) -> Self {
        let mut contexts = ServiceContexts::new();
        for context in iter {
            let _ = contexts.put(context);
        }
        contexts
    }
}
