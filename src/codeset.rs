//! Per-connection code-set negotiation.
//!
//! Negotiation runs at most once per connection, lazily, before the first
//! request that needs it. Concurrent first requests on a fresh connection
//! serialize on the connection's negotiation lock; everybody else takes the
//! lock-free read path.

use std::sync::Arc;

use giop_dispatch_types::CodeSetComponentInfo;
use giop_dispatch_types::CodeSetContext;
use tracing::debug;
use tracing::warn;

use crate::connection::Connection;
use crate::verified::CodeSetNegotiation;
use crate::verified::negotiate_codesets;

/// Outcome of negotiation as stored on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedCodeSets {
    context: CodeSetContext,
    degraded: bool,
}

impl NegotiatedCodeSets {
    /// Transmission code sets, as sent in the code-set service context.
    pub fn context(&self) -> &CodeSetContext {
        &self.context
    }

    /// Whether wide characters may be sent on this connection.
    pub fn wchar_allowed(&self) -> bool {
        self.context.wchar_data.is_some()
    }

    /// Whether negotiation fell back to defaults.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

impl From<CodeSetNegotiation> for NegotiatedCodeSets {
    fn from(negotiation: CodeSetNegotiation) -> Self {
        Self {
            context: negotiation.context,
            degraded: negotiation.degraded,
        }
    }
}

/// Chooses code sets from client and server capabilities.
pub trait CodeSetSelector: Send + Sync {
    /// Pick transmission code sets. `server` is `None` when the reference
    /// advertised no code-set component.
    fn select(&self, client: &CodeSetComponentInfo, server: Option<&CodeSetComponentInfo>) -> CodeSetNegotiation;
}

/// The standard native/conversion selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCodeSetSelector;

impl CodeSetSelector for StandardCodeSetSelector {
    fn select(&self, client: &CodeSetComponentInfo, server: Option<&CodeSetComponentInfo>) -> CodeSetNegotiation {
        negotiate_codesets(client, server)
    }
}

/// Negotiates code sets for connections on first use.
pub struct CodeSetNegotiator {
    client: CodeSetComponentInfo,
    selector: Arc<dyn CodeSetSelector>,
}

impl CodeSetNegotiator {
    /// Create a negotiator advertising `client` code sets.
    pub fn new(client: CodeSetComponentInfo) -> Self {
        Self::with_selector(client, Arc::new(StandardCodeSetSelector))
    }

    /// Create a negotiator with a custom selection strategy.
    pub fn with_selector(client: CodeSetComponentInfo, selector: Arc<dyn CodeSetSelector>) -> Self {
        Self { client, selector }
    }

    /// Code sets this client advertises.
    pub fn client_codesets(&self) -> &CodeSetComponentInfo {
        &self.client
    }

    /// Make sure `conn` has negotiated code sets and return them.
    ///
    /// The selector runs at most once per connection no matter how many
    /// callers race here. A failed negotiation is not an error: the
    /// connection falls back to the default char code set and forbids wide
    /// characters from then on.
    pub fn ensure_negotiated(&self, conn: &Connection, server: Option<&CodeSetComponentInfo>) -> NegotiatedCodeSets {
        if let Some(existing) = conn.codesets() {
            return existing;
        }

        let _guard = conn.negotiation_lock();
        if let Some(existing) = conn.codesets() {
            return existing;
        }

        let negotiated = NegotiatedCodeSets::from(self.selector.select(&self.client, server));
        if negotiated.is_degraded() {
            warn!(
                connection = conn.id(),
                endpoint = %conn.endpoint(),
                codesets = %negotiated.context(),
                "code set negotiation fell back to defaults"
            );
        } else {
            debug!(connection = conn.id(), codesets = %negotiated.context(), "code sets negotiated");
        }
        conn.set_codesets(negotiated);
        negotiated
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use giop_dispatch_types::CodeSetComponent;
    use giop_dispatch_types::CodeSetId;
    use giop_dispatch_types::EndpointDescriptor;
    use giop_dispatch_types::GiopVersion;

    use super::*;
    use crate::testing::InMemoryTransport;
    use crate::testing::ServerAction;
    use crate::transport::Transport;
    use crate::verified::FALLBACK_CHAR_CODESET;

    #[derive(Default)]
    struct CountingSelector {
        calls: AtomicU32,
    }

    impl CodeSetSelector for CountingSelector {
        fn select(&self, client: &CodeSetComponentInfo, server: Option<&CodeSetComponentInfo>) -> CodeSetNegotiation {
            self.calls.fetch_add(1, Ordering::SeqCst);
            negotiate_codesets(client, server)
        }
    }

    async fn connection() -> Connection {
        let endpoint = EndpointDescriptor::new("alpha", 2809, GiopVersion::V1_2);
        let network = InMemoryTransport::new();
        network.serve(endpoint.address().clone(), |_| ServerAction::NoReply);
        let channel = network.open(&endpoint).await.unwrap();
        Connection::new(endpoint, channel)
    }

    fn utf8_server() -> CodeSetComponentInfo {
        CodeSetComponentInfo {
            char_component: CodeSetComponent::native(CodeSetId::UTF_8),
            wchar_component: CodeSetComponent::native(CodeSetId::UTF_16),
        }
    }

    #[tokio::test]
    async fn test_negotiates_once_under_contention() {
        let conn = connection().await;
        let selector = Arc::new(CountingSelector::default());
        let negotiator = CodeSetNegotiator::with_selector(CodeSetComponentInfo::default(), selector.clone());
        let server = utf8_server();

        let results: Vec<NegotiatedCodeSets> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| negotiator.ensure_negotiated(&conn, Some(&server))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(selector.calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == results[0]));
        assert_eq!(results[0].context().char_data, CodeSetId::UTF_8);
        assert_eq!(results[0].context().wchar_data, Some(CodeSetId::UTF_16));
        assert!(results[0].wchar_allowed());
        assert!(!results[0].is_degraded());
    }

    #[tokio::test]
    async fn test_missing_server_codesets_degrade_the_connection() {
        let conn = connection().await;
        let negotiator = CodeSetNegotiator::new(CodeSetComponentInfo::default());

        let negotiated = negotiator.ensure_negotiated(&conn, None);
        assert!(negotiated.is_degraded());
        assert!(!negotiated.wchar_allowed());
        assert_eq!(negotiated.context().char_data, FALLBACK_CHAR_CODESET);
        assert_eq!(conn.codesets(), Some(negotiated));
    }

    #[tokio::test]
    async fn test_later_server_info_does_not_renegotiate() {
        let conn = connection().await;
        let negotiator = CodeSetNegotiator::new(CodeSetComponentInfo::default());

        let first = negotiator.ensure_negotiated(&conn, None);
        let second = negotiator.ensure_negotiated(&conn, Some(&utf8_server()));
        assert_eq!(first, second);
    }
}
