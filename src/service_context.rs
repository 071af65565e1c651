//! Engine-owned service contexts.
//!
//! Outgoing requests get the ORB version on every request, the code-set
//! context per [`CodeSetPolicy`], and the sending context (our codebase) only
//! until the connection has completed its first exchange. Incoming replies
//! update what the connection knows about its peer and surface exception
//! detail text.

use giop_dispatch_types::OrbVersion;
use giop_dispatch_types::ServiceContext;
use giop_dispatch_types::ServiceContextError;
use giop_dispatch_types::ServiceContextId;
use tracing::debug;
use tracing::trace;

use crate::config::CodeSetPolicy;
use crate::config::DispatchConfig;
use crate::mediator::MessageMediator;

/// Attaches and consumes service contexts.
#[derive(Debug, Clone)]
pub struct ServiceContextManager {
    codeset_policy: CodeSetPolicy,
    codebase: Option<String>,
    orb_version: OrbVersion,
}

impl ServiceContextManager {
    /// Create a manager.
    pub fn new(codeset_policy: CodeSetPolicy, codebase: Option<String>) -> Self {
        Self {
            codeset_policy,
            codebase,
            orb_version: OrbVersion::CURRENT,
        }
    }

    /// Create a manager from configuration.
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.codeset_policy, config.codebase.clone())
    }

    /// Attach the engine's contexts to the request of `mediator`.
    ///
    /// Does not mark the connection as past its initial contexts: that only
    /// happens once the server has actually received them.
    pub fn decorate_request(&self, mediator: &mut MessageMediator) -> Result<(), ServiceContextError> {
        let post_initial = mediator.connection().post_initial_contexts();
        let codesets = mediator.connection().codesets();

        if let Some(codesets) = codesets {
            if self.codeset_policy == CodeSetPolicy::Every || !post_initial {
                mediator.add_request_context(ServiceContext::CodeSets(*codesets.context()))?;
            }
        }

        mediator.add_request_context(ServiceContext::OrbVersion(self.orb_version))?;

        if !post_initial {
            if let Some(codebase) = &self.codebase {
                mediator.add_request_context(ServiceContext::SendingContextRunTime {
                    codebase: codebase.clone(),
                })?;
            }
        }

        trace!(
            request_id = %mediator.request_id(),
            contexts = mediator.request_contexts().len(),
            post_initial,
            "request contexts attached"
        );
        Ok(())
    }

    /// Read the contexts of a received reply.
    ///
    /// A reply without an ORB version context comes from a foreign ORB.
    pub fn consume_reply(&self, mediator: &mut MessageMediator) {
        let peer_version = match mediator.reply_contexts().get(ServiceContextId::ORB_VERSION) {
            Some(ServiceContext::OrbVersion(version)) => *version,
            _ => OrbVersion::FOREIGN,
        };
        let connection = mediator.connection();
        if connection.peer_orb_version() != Some(peer_version) {
            debug!(connection = connection.id(), version = peer_version.0, "peer ORB version");
            connection.set_peer_orb_version(peer_version);
        }

        if let Some(ServiceContext::SendingContextRunTime { codebase }) =
            mediator.reply_contexts().get(ServiceContextId::SENDING_CONTEXT_RUN_TIME)
        {
            connection.set_peer_codebase(codebase.clone());
        }

        let detail = match mediator.reply_contexts().get(ServiceContextId::EXCEPTION_DETAIL_MESSAGE) {
            Some(ServiceContext::ExceptionDetailMessage(detail)) => Some(detail.clone()),
            _ => None,
        };
        if let Some(detail) = detail {
            mediator.set_exception_detail(detail);
        }
    }
}

impl Default for ServiceContextManager {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}
