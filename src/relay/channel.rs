use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{code, BatchError, Result};
use crate::hierarchy::{HierarchyDocument, HierarchySender, NodeAddr};
use crate::relay::{RelayHandle, RelayRequest, WorkerRelay};
use crate::request::{BatchRequest, ConnectionId};
use crate::worker::WorkerMessage;

/// Connection ids handed out for worker connections start here, clear of
/// client connection ids.
const FIRST_WORKER_CONN: u64 = 1 << 32;

/// Relay to worker nodes running in this process, one channel per node.
#[derive(Debug)]
pub struct ChannelRelay {
    nodes: RwLock<HashMap<String, mpsc::Sender<WorkerMessage>>>,
    next_conn: AtomicU64,
    open: Mutex<HashSet<ConnectionId>>,
}

impl Default for ChannelRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRelay {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            next_conn: AtomicU64::new(FIRST_WORKER_CONN),
            open: Mutex::new(HashSet::new()),
        }
    }

    pub fn register(&self, node: impl Into<String>, tx: mpsc::Sender<WorkerMessage>) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(node.into(), tx);
        }
    }

    pub fn unregister(&self, node: &str) {
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.remove(node);
        }
    }

    /// Connections opened for relays and not yet torn down.
    pub fn open_connections(&self) -> usize {
        self.open.lock().map(|open| open.len()).unwrap_or(0)
    }

    fn sender_for(&self, node: &str) -> Option<mpsc::Sender<WorkerMessage>> {
        self.nodes.read().ok()?.get(node).cloned()
    }

    fn open_connection(&self) -> ConnectionId {
        let conn = ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut open) = self.open.lock() {
            open.insert(conn);
        }
        conn
    }
}

impl WorkerRelay for ChannelRelay {
    fn relay(&self, node: &str, mut request: BatchRequest) -> Result<RelayHandle> {
        let tx = self.sender_for(node).ok_or_else(|| BatchError::RelaySubmission {
            code: code::NO_RELAY_NODE,
            reason: format!("no connection to worker {}", node),
        })?;

        let id = Uuid::new_v4();
        let conn = self.open_connection();
        request.orig_conn = Some(request.conn);
        request.conn = conn;

        let (reply_tx, reply_rx) = oneshot::channel();
        let message = WorkerMessage::Relay {
            request: RelayRequest {
                id,
                node: node.to_string(),
                conn,
                request,
            },
            reply_tx,
        };

        if let Err(e) = tx.try_send(message) {
            self.disconnect(conn);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    BatchError::Allocation(format!("relay queue to {} is full", node))
                }
                mpsc::error::TrySendError::Closed(_) => BatchError::RelaySubmission {
                    code: code::PROTOCOL,
                    reason: format!("worker {} is not accepting requests", node),
                },
            });
        }

        tracing::debug!(relay_id = %id, node, conn = %conn, "Request relayed to worker");
        Ok(RelayHandle::new(id, conn, reply_rx))
    }

    fn disconnect(&self, conn: ConnectionId) {
        if let Ok(mut open) = self.open.lock() {
            open.remove(&conn);
        }
    }
}

#[async_trait]
impl HierarchySender for ChannelRelay {
    async fn send_hierarchy(&self, node: &NodeAddr, document: Arc<HierarchyDocument>) -> Result<()> {
        let tx = self.sender_for(&node.name).ok_or_else(|| {
            BatchError::Hierarchy(format!("no connection to worker {}", node.name))
        })?;

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(WorkerMessage::Hierarchy { document, ack_tx })
            .await
            .map_err(|_| BatchError::Hierarchy(format!("worker {} is gone", node.name)))?;

        ack_rx
            .await
            .map_err(|_| BatchError::Hierarchy(format!("worker {} dropped hierarchy", node.name)))?
    }
}
