//! Transport abstraction.
//!
//! A [`Transport`] opens byte-stream connections to endpoints. Each open
//! connection is a [`TransportChannel`]: a [`TransportHandle`] for outbound
//! frames plus an inbound receiver the connection's reader task drains.
//! Framing and reply-header parsing are the transport's job; the engine only
//! needs the request id a reply belongs to.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use giop_dispatch_types::EndpointDescriptor;
use giop_dispatch_types::RequestId;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// A frame delivered by a transport to the connection reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A reply to the request with `request_id`.
    Reply {
        /// Request the reply answers.
        request_id: RequestId,
        /// The complete encoded reply.
        frame: Bytes,
    },
    /// The server announced an orderly close. Outstanding requests were not
    /// processed.
    CloseConnection,
}

/// Outbound half of an open connection.
#[async_trait]
pub trait TransportHandle: Send + Sync + fmt::Debug {
    /// Write one complete request frame.
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;

    /// Tell the server the caller abandoned `request_id`.
    ///
    /// Best effort; transports without a cancel message keep the default.
    async fn send_cancel(&self, _request_id: RequestId) -> Result<(), TransportError> {
        Ok(())
    }

    /// Close the connection. The inbound receiver ends afterwards.
    ///
    /// May be called more than once.
    fn close(&self);
}

/// An open connection as handed out by a [`Transport`].
#[derive(Debug)]
pub struct TransportChannel {
    /// Outbound half.
    pub handle: Arc<dyn TransportHandle>,
    /// Inbound frames, ending when the connection closes.
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// Connection factory.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `endpoint`.
    async fn open(&self, endpoint: &EndpointDescriptor) -> Result<TransportChannel, TransportError>;
}
