//! Testing infrastructure for the dispatch engine.
//!
//! Provides an in-process transport whose "servers" are plain closures, so
//! dispatch behavior can be exercised deterministically without sockets.
//!
//! ## Key Components
//!
//! - [`InMemoryTransport`]: routes connections to registered server handlers
//! - [`ServerAction`]: what a simulated server does with one request
//! - [`ServerStats`]: per-server counters for asserting on retries and reuse
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let network = Arc::new(InMemoryTransport::new());
//! network.serve(ServerAddress::new("alpha", 2809), |_request| {
//!     ServerAction::Reply(ReplyBody::NoException(Bytes::from_static(b"pong")))
//! });
//!
//! let dispatcher = RemoteDispatcher::builder(network.clone(), Arc::new(PostcardMarshaler)).build()?;
//! let reply = dispatcher.dispatch(&reference, Invocation::new("ping", Bytes::new())).await?;
//! assert_eq!(network.stats(&address).opens, 1);
//! ```

pub mod network;

pub use network::InMemoryTransport;
pub use network::ServerAction;
pub use network::ServerStats;
