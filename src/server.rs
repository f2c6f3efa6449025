use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::accounting::{Accounting, TracingAccounting};
use crate::config::ServerConfig;
use crate::controller::{HoldController, Outcome};
use crate::error::{BatchError, Result};
use crate::hierarchy::{HierarchyController, HierarchySender, NodeAddr};
use crate::jobs::JobRegistry;
use crate::relay::{ChannelRelay, WorkerRelay};
use crate::request::{BatchRequest, Reply, RequestKind, Responder};
use crate::store::{FileJobStore, JobStore, MemoryJobStore};
use crate::worker::{CheckpointSupport, WorkerHandle, WorkerNode};

/// Queue depth of each in-process worker channel.
const WORKER_QUEUE_DEPTH: usize = 64;

/// The batch server: routes client and worker requests to the hold
/// controller and the hierarchy controller.
pub struct Server {
    pub config: ServerConfig,
    registry: Arc<JobRegistry>,
    controller: Arc<HoldController>,
    hierarchy: Arc<HierarchyController>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn JobStore>,
        accounting: Arc<dyn Accounting>,
        relay: Arc<dyn WorkerRelay>,
        hierarchy_sender: Arc<dyn HierarchySender>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::with_capacity(config.max_jobs));
        let controller = HoldController::new(registry.clone(), store, accounting, relay)
            .with_checkpoint_required(config.checkpoint_required);
        let hierarchy = HierarchyController::new(config.hierarchy.clone(), hierarchy_sender);

        Self {
            config,
            registry,
            controller: Arc::new(controller),
            hierarchy: Arc::new(hierarchy),
        }
    }

    /// Server whose workers run in this process behind a [`ChannelRelay`].
    ///
    /// Jobs are written under `store_dir` when it is set.
    pub fn with_channel_relay(config: ServerConfig) -> Result<(Self, Arc<ChannelRelay>)> {
        let store: Arc<dyn JobStore> = match &config.store_dir {
            Some(dir) => Arc::new(FileJobStore::open(dir)?),
            None => Arc::new(MemoryJobStore::new()),
        };
        let relay = Arc::new(ChannelRelay::new());
        let server = Self::new(
            config,
            store,
            Arc::new(TracingAccounting),
            relay.clone(),
            relay.clone(),
        );
        Ok((server, relay))
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn controller(&self) -> &Arc<HoldController> {
        &self.controller
    }

    pub fn hierarchy(&self) -> &Arc<HierarchyController> {
        &self.hierarchy
    }

    /// Load the node hierarchy for the configured nodes.
    pub async fn start(&self) {
        self.hierarchy.initial_load(self.config.nodes.clone()).await;
    }

    /// Replace the node list and reload the hierarchy.
    pub async fn set_nodes(&mut self, nodes: Vec<NodeAddr>) {
        self.config.nodes = nodes.clone();
        self.hierarchy.reload(nodes).await;
    }

    /// Handle one request. The receiver yields its single reply; for
    /// relayed requests that is after the worker answered.
    pub fn dispatch(&self, request: BatchRequest) -> oneshot::Receiver<Reply> {
        let (responder, rx) = Responder::new(request.conn);
        let controller = self.controller.clone();
        let hierarchy = self.hierarchy.clone();

        tokio::spawn(async move {
            tracing::debug!(kind = %request.kind, object = %request.object, conn = %request.conn, "Request received");
            match request.kind {
                RequestKind::HoldJob => {
                    let outcome = controller.hold_job(request).await;
                    answer(controller, outcome, responder);
                }
                RequestKind::CheckpointJob => {
                    let outcome = controller.checkpoint_job(request).await;
                    answer(controller, outcome, responder);
                }
                RequestKind::ReleaseJob => {
                    responder.send(controller.req_release_job(request).await);
                }
                RequestKind::ReleaseArray => {
                    responder.send(controller.req_release_array(request).await);
                }
                RequestKind::HierarchyRequest => {
                    match hierarchy.send_to_node(&request.object).await {
                        Some(_) => responder.ack(),
                        None => responder.reject(&BatchError::Hierarchy(format!(
                            "{} is not a known node",
                            request.object
                        ))),
                    }
                }
            }
        });

        rx
    }

    /// Drive the hierarchy loop until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            server = %self.config.server_name,
            nodes = self.config.nodes.len(),
            "Server running"
        );
        self.hierarchy
            .clone()
            .run(self.config.tick_interval(), shutdown)
            .await;
    }
}

/// Send a completed reply now, or hand the pending relay and the
/// responder to a continuation task.
fn answer(controller: Arc<HoldController>, outcome: Outcome, responder: Responder) {
    match outcome {
        Outcome::Completed(reply) => responder.send(reply),
        Outcome::Deferred(pending) => {
            tracing::trace!(job_id = %pending.job_id(), relay_id = %pending.relay_id(), "Waiting for worker");
            tokio::spawn(async move {
                let reply = pending.finish(&controller).await;
                responder.send(reply);
            });
        }
    }
}

/// Start an in-process worker for each node and register it with `relay`.
pub fn spawn_local_workers(
    relay: &ChannelRelay,
    nodes: &[NodeAddr],
    support: CheckpointSupport,
    shutdown: &CancellationToken,
) -> Vec<(WorkerHandle, JoinHandle<()>)> {
    nodes
        .iter()
        .map(|node| {
            let (worker, tx) = WorkerNode::new(node.name.clone(), support, WORKER_QUEUE_DEPTH);
            relay.register(node.name.clone(), tx);
            let handle = worker.handle();
            let task = tokio::spawn(worker.run(shutdown.clone()));
            (handle, task)
        })
        .collect()
}
