use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};

/// A worker node and the port its resource monitor listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddr {
    pub name: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    /// Parse `host` or `host:port`.
    pub fn parse(value: &str, default_port: u16) -> Result<Self> {
        let value = value.trim();
        let (name, port) = match value.rsplit_once(':') {
            Some((name, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| BatchError::Config(format!("invalid port in node '{}'", value)))?;
                (name, port)
            }
            None => (value, default_port),
        };

        if name.is_empty() {
            return Err(BatchError::Config(format!("invalid node '{}'", value)));
        }
        Ok(Self::new(name, port))
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct HierarchyFile {
    #[serde(default)]
    path: Vec<PathEntry>,
}

#[derive(Debug, Deserialize)]
struct PathEntry {
    #[serde(default)]
    levels: Vec<Vec<String>>,
}

pub type Level = Vec<NodeAddr>;
pub type ReportPath = Vec<Level>;

/// The node hierarchy: ordered paths, each an ordered list of levels.
///
/// Workers report events up their path one level at a time. The document
/// is rendered once into the fragments sent to every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyDocument {
    paths: Vec<ReportPath>,
    fragments: Vec<String>,
}

impl HierarchyDocument {
    fn from_paths(paths: Vec<ReportPath>) -> Self {
        let fragments = render(&paths);
        Self { paths, fragments }
    }

    /// One path with a single level holding every node.
    pub fn default_for(nodes: &[NodeAddr]) -> Self {
        if nodes.is_empty() {
            return Self::from_paths(Vec::new());
        }
        Self::from_paths(vec![vec![nodes.to_vec()]])
    }

    /// Build a document from hierarchy file text.
    ///
    /// Hosts are resolved against `nodes` and take their port from there.
    /// Unknown hosts are skipped. Nodes the file does not mention are
    /// appended as a final level of the last path.
    pub fn from_toml(text: &str, nodes: &[NodeAddr]) -> Result<Self> {
        let file: HierarchyFile = toml::from_str(text)
            .map_err(|e| BatchError::Hierarchy(format!("invalid hierarchy file: {}", e)))?;

        let mut placed: HashSet<&str> = HashSet::new();
        let mut paths: Vec<ReportPath> = Vec::new();

        for (path_index, entry) in file.path.iter().enumerate() {
            let mut levels: ReportPath = Vec::new();
            for (level_index, hosts) in entry.levels.iter().enumerate() {
                let mut level = Level::new();
                for host in hosts {
                    let host = host.trim();
                    let Some(node) = nodes.iter().find(|n| n.name == host) else {
                        tracing::warn!(
                            host,
                            path = path_index,
                            level = level_index,
                            "Hierarchy host is not a known node, skipped"
                        );
                        continue;
                    };
                    if !placed.insert(node.name.as_str()) {
                        tracing::warn!(host, "Hierarchy host listed more than once, skipped");
                        continue;
                    }
                    level.push(node.clone());
                }
                if !level.is_empty() {
                    levels.push(level);
                }
            }
            if !levels.is_empty() {
                paths.push(levels);
            }
        }

        let missing: Level = nodes
            .iter()
            .filter(|n| !placed.contains(n.name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            tracing::info!(count = missing.len(), "Nodes missing from hierarchy file appended");
            match paths.last_mut() {
                Some(last) => last.push(missing),
                None => paths.push(vec![missing]),
            }
        }

        Ok(Self::from_paths(paths))
    }

    /// Read and parse a hierarchy file.
    pub fn load(path: &Path, nodes: &[NodeAddr]) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text, nodes)
    }

    /// Pre-rendered send format, in order.
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn paths(&self) -> &[ReportPath] {
        &self.paths
    }

    pub fn node_count(&self) -> usize {
        self.paths.iter().flatten().map(Vec::len).sum()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.paths.iter().flatten().flatten().any(|n| n.name == name)
    }

    /// The fragments joined into the text a worker receives.
    pub fn to_send_format(&self) -> String {
        self.fragments.concat()
    }
}

fn render(paths: &[ReportPath]) -> Vec<String> {
    let mut fragments = Vec::new();
    for path in paths {
        fragments.push("<sp>".to_string());
        for level in path {
            let hosts: Vec<String> = level.iter().map(NodeAddr::to_string).collect();
            fragments.push(format!("<sl>{}", hosts.join(",")));
            fragments.push("</sl>".to_string());
        }
        fragments.push("</sp>".to_string());
    }
    fragments
}
