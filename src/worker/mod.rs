//! Worker nodes as seen from the server.
//!
//! A worker runs jobs and answers requests the server relays to it:
//! - **Checkpoint/hold**: take a checkpoint of a running job and report
//!   whether it succeeded and whether the image can migrate
//! - **Hierarchy**: accept the node-hierarchy document pushed by the server
//!
//! # Components
//!
//! - [`WorkerNode`]: in-process worker answering over a channel
//! - [`WorkerHandle`]: read side for what a worker has received
//! - [`CheckpointSupport`]: how a worker answers checkpoint requests

pub mod node;

pub use node::{CheckpointSupport, WorkerHandle, WorkerMessage, WorkerNode};
