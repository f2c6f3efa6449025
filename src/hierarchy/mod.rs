//! Node-hierarchy distribution.
//!
//! The server owns the hierarchy document and pushes it to worker nodes:
//! - **Periodically**: every tick calls [`HierarchyController::check_and_send`];
//!   once the next send time has passed every node gets a copy
//! - **On demand**: a node that asks for the hierarchy (for instance after
//!   it restarts) gets one immediately
//!
//! A reload after a topology change delays the next periodic push by a
//! short settle interval so bursts of changes produce one push.
//!
//! Each send runs as its own task. Sends in flight are bounded by a
//! semaphore and counted by [`HierarchyController::sending_count`]. A failed
//! send is not retried; the node gets the document on the next round.

pub mod document;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::audit::{log_event, EventType, ObjectClass};
use crate::config::HierarchyConfig;
use crate::error::Result;

pub use document::{HierarchyDocument, NodeAddr};

/// Delivers a hierarchy document to one node.
#[async_trait]
pub trait HierarchySender: Send + Sync {
    async fn send_hierarchy(&self, node: &NodeAddr, document: Arc<HierarchyDocument>) -> Result<()>;
}

#[derive(Debug)]
struct HierarchyState {
    send_on_demand: bool,
    last_reload: Option<Instant>,
    next_send: Instant,
    file_present: bool,
    nodes: Vec<NodeAddr>,
    document: Arc<HierarchyDocument>,
}

/// Decrements the in-flight counter when a send task ends, however it ends.
struct SendGuard(Arc<AtomicUsize>);

impl SendGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct HierarchyController {
    config: HierarchyConfig,
    sender: Arc<dyn HierarchySender>,
    state: Mutex<HierarchyState>,
    sending: Arc<AtomicUsize>,
    permits: Arc<Semaphore>,
}

impl HierarchyController {
    pub fn new(config: HierarchyConfig, sender: Arc<dyn HierarchySender>) -> Self {
        let now = Instant::now();
        let next_send = if config.send_on_startup {
            now
        } else {
            now + config.startup_delay
        };
        let state = HierarchyState {
            send_on_demand: config.send_on_demand_only,
            last_reload: None,
            next_send,
            file_present: false,
            nodes: Vec::new(),
            document: Arc::new(HierarchyDocument::default_for(&[])),
        };
        let permits = Arc::new(Semaphore::new(config.max_concurrent_sends.max(1)));

        Self {
            config,
            sender,
            state: Mutex::new(state),
            sending: Arc::new(AtomicUsize::new(0)),
            permits,
        }
    }

    /// Build the document for the first time. Called once at startup.
    pub async fn initial_load(&self, nodes: Vec<NodeAddr>) {
        let mut state = self.state.lock().await;
        self.load(&mut state, nodes);
        tracing::info!(
            nodes = state.nodes.len(),
            file_present = state.file_present,
            "Node hierarchy loaded"
        );
    }

    /// Rebuild the document after nodes were added or removed.
    pub async fn reload(&self, nodes: Vec<NodeAddr>) {
        let mut state = self.state.lock().await;
        self.load(&mut state, nodes);
        if let Some(reloaded) = state.last_reload {
            state.next_send = reloaded + self.config.reload_settle;
        }
        log_event(
            EventType::Admin,
            ObjectClass::Server,
            "hierarchy",
            &format!("Node hierarchy reloaded with {} nodes", state.nodes.len()),
        );
    }

    fn load(&self, state: &mut HierarchyState, nodes: Vec<NodeAddr>) {
        let (document, file_present) = match self.config.file_path.as_deref() {
            Some(path) if path.exists() => match HierarchyDocument::load(path, &nodes) {
                Ok(document) => (document, true),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Cannot use hierarchy file, using default");
                    (HierarchyDocument::default_for(&nodes), false)
                }
            },
            _ => (HierarchyDocument::default_for(&nodes), false),
        };

        state.document = Arc::new(document);
        state.file_present = file_present;
        state.nodes = nodes;
        state.last_reload = Some(Instant::now());
    }

    /// Hold the first periodic push back by the startup delay.
    pub async fn dont_send_on_startup(&self) {
        self.state.lock().await.next_send = Instant::now() + self.config.startup_delay;
    }

    /// Stop periodic pushes; nodes get the document only when they ask.
    pub async fn only_send_on_demand(&self) {
        self.state.lock().await.send_on_demand = true;
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.lock().await.last_reload.is_some()
    }

    pub async fn is_file_present(&self) -> bool {
        self.state.lock().await.file_present
    }

    pub async fn next_send(&self) -> Instant {
        self.state.lock().await.next_send
    }

    pub async fn last_reload(&self) -> Option<Instant> {
        self.state.lock().await.last_reload
    }

    /// Current document. Reloads swap in a new one; this copy stays valid.
    pub async fn document(&self) -> Arc<HierarchyDocument> {
        self.state.lock().await.document.clone()
    }

    /// Sends currently in flight.
    pub fn sending_count(&self) -> usize {
        self.sending.load(Ordering::SeqCst)
    }

    pub async fn check_and_send(&self) -> Vec<JoinHandle<()>> {
        self.check_and_send_at(Instant::now()).await
    }

    /// Push to every node if the next send time has passed at `now`.
    pub async fn check_and_send_at(&self, now: Instant) -> Vec<JoinHandle<()>> {
        let (nodes, document) = {
            let mut state = self.state.lock().await;
            if state.send_on_demand || state.last_reload.is_none() || now < state.next_send {
                return Vec::new();
            }
            state.next_send = now + self.config.resend_interval;
            (state.nodes.clone(), state.document.clone())
        };

        tracing::debug!(nodes = nodes.len(), "Sending node hierarchy");
        nodes
            .into_iter()
            .map(|node| self.spawn_send(node, document.clone()))
            .collect()
    }

    /// Push to one node that asked for the hierarchy. `None` when the node
    /// is unknown.
    pub async fn send_to_node(&self, name: &str) -> Option<JoinHandle<()>> {
        let (node, document) = {
            let state = self.state.lock().await;
            let node = state.nodes.iter().find(|n| n.name == name).cloned();
            (node, state.document.clone())
        };

        let Some(node) = node else {
            tracing::warn!(node = name, "Hierarchy requested by unknown node");
            return None;
        };
        Some(self.spawn_send(node, document))
    }

    fn spawn_send(&self, node: NodeAddr, document: Arc<HierarchyDocument>) -> JoinHandle<()> {
        let guard = SendGuard::enter(&self.sending);
        let sender = self.sender.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match sender.send_hierarchy(&node, document).await {
                Ok(()) => tracing::debug!(node = %node, "Hierarchy sent"),
                Err(e) => {
                    log_event(
                        EventType::Error,
                        ObjectClass::Node,
                        &node.name,
                        &format!("Could not send hierarchy: {}", e),
                    );
                }
            }
        })
    }

    /// Check for due sends on every tick until shutdown.
    pub async fn run(self: Arc<Self>, tick: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let sends = self.check_and_send().await;
                    if !sends.is_empty() {
                        tracing::trace!(sends = sends.len(), "Hierarchy sends started");
                    }
                }
            }
        }

        self.permits.close();
        tracing::info!("Hierarchy loop stopped");
    }
}
