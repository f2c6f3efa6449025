use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::hierarchy::NodeAddr;

/// Port worker resource monitors listen on when a node omits one.
pub const DEFAULT_RM_PORT: u16 = 15003;

/// How and when the node hierarchy is pushed to workers.
#[derive(Debug, Clone)]
pub struct HierarchyConfig {
    /// Hierarchy file. When absent or missing on disk every node lands in
    /// one level.
    pub file_path: Option<PathBuf>,
    /// Push to all nodes as soon as the server starts.
    pub send_on_startup: bool,
    /// Only push when a node asks for it.
    pub send_on_demand_only: bool,
    /// Delay before the first push when not sending on startup.
    pub startup_delay: Duration,
    /// Interval between periodic pushes.
    pub resend_interval: Duration,
    /// Delay before the next push after a reload.
    pub reload_settle: Duration,
    /// Upper bound on sends in flight at once.
    pub max_concurrent_sends: usize,
    pub default_rm_port: u16,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            send_on_startup: true,
            send_on_demand_only: false,
            startup_delay: Duration::from_secs(600),
            resend_interval: Duration::from_secs(600),
            reload_settle: Duration::from_secs(10),
            max_concurrent_sends: 64,
            default_rm_port: DEFAULT_RM_PORT,
        }
    }
}

impl HierarchyConfig {
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_name: String,
    /// Worker nodes known to the server
    pub nodes: Vec<NodeAddr>,
    /// Running jobs can only be held through a checkpoint
    pub checkpoint_required: bool,
    pub hierarchy: HierarchyConfig,
    /// Main loop tick; hierarchy sends are checked on every tick
    pub tick_interval_ms: u64,
    /// Job files go here; jobs are kept in memory only when unset
    pub store_dir: Option<PathBuf>,
    pub max_jobs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            nodes: Vec::new(),
            checkpoint_required: false,
            hierarchy: HierarchyConfig::default(),
            tick_interval_ms: 1000,
            store_dir: None,
            max_jobs: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, name: impl Into<String>, port: u16) -> Self {
        self.nodes.push(NodeAddr::new(name, port));
        self
    }

    /// Add nodes from a comma-separated `host[:port]` list.
    pub fn with_node_list(mut self, list: &str) -> Result<Self> {
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            self.nodes
                .push(NodeAddr::parse(entry, self.hierarchy.default_rm_port)?);
        }
        Ok(self)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}
