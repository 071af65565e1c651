//! Connection cache metrics for monitoring.

/// Metrics for connection cache monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionCacheMetrics {
    /// Entries currently in the cache.
    pub total_connections: u32,
    /// Entries able to carry new requests.
    pub live_connections: u32,
    /// Requests awaiting replies across all connections.
    pub outstanding_requests: u64,
    /// Connections created since the cache was built.
    pub connections_created: u64,
}
