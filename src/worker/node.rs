use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{code, Result};
use crate::hierarchy::HierarchyDocument;
use crate::relay::RelayRequest;
use crate::request::{RequestKind, WorkerReply};

/// Messages delivered to a worker node.
#[derive(Debug)]
pub enum WorkerMessage {
    Relay {
        request: RelayRequest,
        reply_tx: oneshot::Sender<WorkerReply>,
    },
    Hierarchy {
        document: Arc<HierarchyDocument>,
        ack_tx: oneshot::Sender<Result<()>>,
    },
}

/// How a worker answers checkpoint requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointSupport {
    /// Checkpoints are taken, the image stays on the node
    Supported,
    /// Checkpoints are taken and can be restarted elsewhere
    Migratable,
    /// The worker has no checkpoint facility
    Unsupported,
    /// Checkpointing fails with the given code
    Fails(i32),
}

impl CheckpointSupport {
    fn reply(self) -> WorkerReply {
        match self {
            CheckpointSupport::Supported => WorkerReply::ok(),
            CheckpointSupport::Migratable => WorkerReply { code: code::NONE, aux: 1 },
            CheckpointSupport::Unsupported => WorkerReply::error(code::NO_SUPPORT),
            CheckpointSupport::Fails(code) => WorkerReply::error(code),
        }
    }
}

/// Observable state of a worker node.
#[derive(Debug, Clone, Default)]
pub struct WorkerHandle {
    hierarchy: Arc<RwLock<Option<Arc<HierarchyDocument>>>>,
    relays_handled: Arc<AtomicUsize>,
    hierarchies_received: Arc<AtomicUsize>,
}

impl WorkerHandle {
    /// Most recent hierarchy pushed to this node.
    pub async fn hierarchy(&self) -> Option<Arc<HierarchyDocument>> {
        self.hierarchy.read().await.clone()
    }

    pub fn relays_handled(&self) -> usize {
        self.relays_handled.load(Ordering::Relaxed)
    }

    pub fn hierarchies_received(&self) -> usize {
        self.hierarchies_received.load(Ordering::Relaxed)
    }
}

/// A worker node: executes jobs and answers relayed requests.
///
/// In this process it only answers; job execution itself happens
/// elsewhere.
#[derive(Debug)]
pub struct WorkerNode {
    pub name: String,
    checkpoint: CheckpointSupport,
    rx: mpsc::Receiver<WorkerMessage>,
    handle: WorkerHandle,
}

impl WorkerNode {
    pub fn new(
        name: impl Into<String>,
        checkpoint: CheckpointSupport,
        queue_depth: usize,
    ) -> (Self, mpsc::Sender<WorkerMessage>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let node = Self {
            name: name.into(),
            checkpoint,
            rx,
            handle: WorkerHandle::default(),
        };
        (node, tx)
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Answer messages until shutdown or until every sender is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(node = %self.name, checkpoint = ?self.checkpoint, "Worker node started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },
            }
        }

        tracing::info!(node = %self.name, "Worker node stopped");
    }

    async fn handle_message(&self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Relay { request, reply_tx } => {
                let reply = match request.request.kind {
                    RequestKind::HoldJob | RequestKind::CheckpointJob => self.checkpoint.reply(),
                    _ => WorkerReply::error(code::INVALID_REQUEST),
                };
                tracing::debug!(
                    node = %self.name,
                    relay_id = %request.id,
                    job_id = %request.request.object,
                    kind = %request.request.kind,
                    code = reply.code,
                    "Answered relayed request"
                );
                self.handle.relays_handled.fetch_add(1, Ordering::Relaxed);
                let _ = reply_tx.send(reply);
            }
            WorkerMessage::Hierarchy { document, ack_tx } => {
                tracing::debug!(node = %self.name, fragments = document.fragments().len(), "Hierarchy received");
                *self.handle.hierarchy.write().await = Some(document);
                self.handle.hierarchies_received.fetch_add(1, Ordering::Relaxed);
                let _ = ack_tx.send(Ok(()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BatchRequest, ConnectionId};
    use uuid::Uuid;

    fn relay_message(kind: RequestKind) -> (WorkerMessage, oneshot::Receiver<WorkerReply>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = RelayRequest {
            id: Uuid::new_v4(),
            node: "node01".to_string(),
            conn: ConnectionId(1),
            request: BatchRequest::new(kind, "1.srv", "alice", "login"),
        };
        (WorkerMessage::Relay { request, reply_tx }, reply_rx)
    }

    #[test]
    fn checkpoint_support_replies() {
        assert!(CheckpointSupport::Supported.reply().is_ok());
        assert_eq!(CheckpointSupport::Migratable.reply().aux, 1);
        assert_eq!(CheckpointSupport::Unsupported.reply().code, code::NO_SUPPORT);
        assert_eq!(CheckpointSupport::Fails(15099).reply().code, 15099);
    }

    #[tokio::test]
    async fn answers_relays_until_shutdown() {
        let (node, tx) = WorkerNode::new("node01", CheckpointSupport::Unsupported, 4);
        let handle = node.handle();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(node.run(shutdown.clone()));

        let (msg, reply_rx) = relay_message(RequestKind::HoldJob);
        tx.send(msg).await.unwrap();
        assert_eq!(reply_rx.await.unwrap().code, code::NO_SUPPORT);

        let (msg, reply_rx) = relay_message(RequestKind::ReleaseJob);
        tx.send(msg).await.unwrap();
        assert_eq!(reply_rx.await.unwrap().code, code::INVALID_REQUEST);
        assert_eq!(handle.relays_handled(), 2);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stores_pushed_hierarchy() {
        let (node, tx) = WorkerNode::new("node01", CheckpointSupport::Supported, 4);
        let handle = node.handle();
        let task = tokio::spawn(node.run(CancellationToken::new()));

        let document = Arc::new(HierarchyDocument::default_for(&[
            crate::hierarchy::NodeAddr::new("node01", 15003),
        ]));
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(WorkerMessage::Hierarchy {
            document: document.clone(),
            ack_tx,
        })
        .await
        .unwrap();
        ack_rx.await.unwrap().unwrap();

        assert_eq!(handle.hierarchies_received(), 1);
        assert_eq!(handle.hierarchy().await.unwrap(), document);

        drop(tx);
        task.await.unwrap();
    }
}
