//! In-memory transport for deterministic dispatch tests.
//!
//! Each server address maps to a handler closure. Requests are decoded with
//! [`PostcardMarshaler`], handed to the handler, and whatever it decides is
//! fed back through the connection's inbound channel exactly like a real
//! transport would.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::ReplyBody;
use giop_dispatch_types::ReplyMessage;
use giop_dispatch_types::RequestId;
use giop_dispatch_types::ServerAddress;
use giop_dispatch_types::ServiceContexts;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::constants::INBOUND_CHANNEL_CAPACITY;
use crate::error::TransportError;
use crate::marshal::PostcardMarshaler;
use crate::marshal::WireRequest;
use crate::transport::InboundFrame;
use crate::transport::Transport;
use crate::transport::TransportChannel;
use crate::transport::TransportHandle;

/// What a simulated server does with one request.
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Reply with `body` and no service contexts.
    Reply(ReplyBody),
    /// Reply with `body` and the given service contexts.
    ReplyWithContexts(ReplyBody, ServiceContexts),
    /// Accept the request and never answer.
    NoReply,
    /// Announce an orderly close without processing the request.
    CloseConnection,
    /// Drop the connection after accepting the request.
    Drop,
    /// Fail the write itself.
    FailSend,
}

type Handler = Arc<dyn Fn(&WireRequest) -> ServerAction + Send + Sync>;

/// Counters for one simulated server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections opened.
    pub opens: u64,
    /// Connection attempts refused because nothing was serving.
    pub refused: u64,
    /// Requests received.
    pub requests: u64,
    /// Cancel messages received.
    pub cancels: u64,
}

#[derive(Default)]
struct ServerState {
    handler: RwLock<Option<Handler>>,
    opens: AtomicU64,
    refused: AtomicU64,
    requests: AtomicU64,
    cancels: AtomicU64,
    received: Mutex<Vec<WireRequest>>,
}

/// Transport connecting to in-process servers.
#[derive(Default)]
pub struct InMemoryTransport {
    servers: DashMap<ServerAddress, Arc<ServerState>>,
    open_delay: RwLock<Option<Duration>>,
}

impl InMemoryTransport {
    /// Create a network with no servers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `address` with `handler`, replacing any previous handler.
    pub fn serve<F>(&self, address: ServerAddress, handler: F)
    where F: Fn(&WireRequest) -> ServerAction + Send + Sync + 'static {
        *self.server(&address).handler.write() = Some(Arc::new(handler));
    }

    /// Stop serving `address`. New connections are refused; established
    /// ones fail their next write.
    pub fn stop(&self, address: &ServerAddress) {
        *self.server(address).handler.write() = None;
    }

    /// Delay every connection open by `delay`.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        *self.open_delay.write() = delay;
    }

    /// Counters for `address`.
    pub fn stats(&self, address: &ServerAddress) -> ServerStats {
        let Some(server) = self.servers.get(address) else {
            return ServerStats::default();
        };
        ServerStats {
            opens: server.opens.load(Ordering::Relaxed),
            refused: server.refused.load(Ordering::Relaxed),
            requests: server.requests.load(Ordering::Relaxed),
            cancels: server.cancels.load(Ordering::Relaxed),
        }
    }

    /// Every request `address` received, in arrival order.
    pub fn received(&self, address: &ServerAddress) -> Vec<WireRequest> {
        match self.servers.get(address) {
            Some(server) => server.received.lock().clone(),
            None => Vec::new(),
        }
    }

    fn server(&self, address: &ServerAddress) -> Arc<ServerState> {
        Arc::clone(self.servers.entry(address.clone()).or_default().value())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open(&self, endpoint: &EndpointDescriptor) -> Result<TransportChannel, TransportError> {
        let delay = *self.open_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let address = endpoint.address().clone();
        let server = self.server(&address);
        if server.handler.read().is_none() {
            server.refused.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Connect {
                address,
                reason: "connection refused".to_owned(),
            });
        }
        server.opens.fetch_add(1, Ordering::Relaxed);

        let (replies, inbound) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let handle = InMemoryHandle {
            address,
            server,
            replies: Mutex::new(Some(replies)),
        };
        Ok(TransportChannel {
            handle: Arc::new(handle),
            inbound,
        })
    }
}

/// Client side of one in-memory connection.
struct InMemoryHandle {
    address: ServerAddress,
    server: Arc<ServerState>,
    /// Taken on close, which ends the client's inbound stream.
    replies: Mutex<Option<mpsc::Sender<InboundFrame>>>,
}

impl InMemoryHandle {
    fn io_error(&self, reason: impl Into<String>) -> TransportError {
        TransportError::Io {
            address: self.address.clone(),
            reason: reason.into(),
        }
    }

    async fn reply(
        &self,
        replies: &mpsc::Sender<InboundFrame>,
        request_id: RequestId,
        service_contexts: ServiceContexts,
        body: ReplyBody,
    ) -> Result<(), TransportError> {
        let reply = ReplyMessage {
            request_id,
            service_contexts,
            body,
        };
        let frame = PostcardMarshaler.encode_reply(&reply).map_err(|e| self.io_error(e.to_string()))?;
        // A client that already went away loses the reply, as on a real wire.
        let _ = replies.send(InboundFrame::Reply { request_id, frame }).await;
        Ok(())
    }
}

#[async_trait]
impl TransportHandle for InMemoryHandle {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        let Some(replies) = self.replies.lock().clone() else {
            return Err(TransportError::Closed {
                address: self.address.clone(),
            });
        };
        let request = PostcardMarshaler.decode_request(&frame).map_err(|e| self.io_error(e.to_string()))?;

        let handler = self.server.handler.read().clone();
        let Some(handler) = handler else {
            self.close();
            return Err(self.io_error("server stopped"));
        };
        self.server.requests.fetch_add(1, Ordering::Relaxed);
        self.server.received.lock().push(request.clone());

        let request_id = request.header.request_id;
        let action = handler(&request);
        trace!(address = %self.address, %request_id, operation = %request.header.operation, ?action, "server handled request");
        match action {
            ServerAction::Reply(body) => self.reply(&replies, request_id, ServiceContexts::new(), body).await,
            ServerAction::ReplyWithContexts(body, contexts) => self.reply(&replies, request_id, contexts, body).await,
            ServerAction::NoReply => Ok(()),
            ServerAction::CloseConnection => {
                let _ = replies.send(InboundFrame::CloseConnection).await;
                self.close();
                Ok(())
            }
            ServerAction::Drop => {
                self.close();
                Ok(())
            }
            ServerAction::FailSend => {
                self.close();
                Err(self.io_error("connection reset"))
            }
        }
    }

    async fn send_cancel(&self, request_id: RequestId) -> Result<(), TransportError> {
        trace!(address = %self.address, %request_id, "server received cancel");
        self.server.cancels.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) {
        self.replies.lock().take();
    }
}

impl fmt::Debug for InMemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryHandle")
            .field("address", &self.address)
            .field("open", &self.replies.lock().is_some())
            .finish()
    }
}
