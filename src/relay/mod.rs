//! Server-to-worker request relay.
//!
//! Some requests on a running job can only be finished by the worker the
//! job executes on. The server hands a copy of the request to a
//! [`WorkerRelay`], which submits it synchronously and returns a
//! [`RelayHandle`] that resolves once the worker answers.
//!
//! # Components
//!
//! - [`WorkerRelay`]: transport contract (submit, disconnect)
//! - [`ChannelRelay`]: in-process transport to [`crate::worker::WorkerNode`]s
//!
//! A handle whose worker goes away without answering resolves to a
//! protocol error reply, so every submitted relay completes exactly once.

pub mod channel;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{code, Result};
use crate::request::{BatchRequest, ConnectionId, WorkerReply};

pub use channel::ChannelRelay;

/// A request copy in flight to a worker.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Correlates the worker's reply with the pending request
    pub id: Uuid,
    pub node: String,
    pub conn: ConnectionId,
    pub request: BatchRequest,
}

/// Outstanding reply for a submitted relay.
#[derive(Debug)]
pub struct RelayHandle {
    pub id: Uuid,
    /// Connection opened to the worker for this relay
    pub conn: ConnectionId,
    reply_rx: oneshot::Receiver<WorkerReply>,
}

impl RelayHandle {
    pub fn new(id: Uuid, conn: ConnectionId, reply_rx: oneshot::Receiver<WorkerReply>) -> Self {
        Self { id, conn, reply_rx }
    }

    /// Wait for the worker's reply. A lost worker yields a protocol error.
    pub async fn reply(self) -> WorkerReply {
        match self.reply_rx.await {
            Ok(reply) => reply,
            Err(_) => {
                tracing::warn!(relay_id = %self.id, conn = %self.conn, "Worker connection lost before reply");
                WorkerReply::error(code::PROTOCOL)
            }
        }
    }
}

/// Transport used to reach worker nodes.
pub trait WorkerRelay: Send + Sync {
    /// Submit `request` to `node`. Fails fast if the request cannot be
    /// handed off; the worker's answer arrives through the handle.
    fn relay(&self, node: &str, request: BatchRequest) -> Result<RelayHandle>;

    /// Close the connection used by a finished relay.
    fn disconnect(&self, conn: ConnectionId);
}
