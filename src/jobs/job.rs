use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::hold::HoldTypes;
use crate::jobs::state::{JobState, JobSubstate};

/// Server-side flags recorded on a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFlags(u32);

impl ServerFlags {
    pub const HAS_RUN: ServerFlags = ServerFlags(0x01);
    pub const CHECKPOINT_FILE: ServerFlags = ServerFlags(0x02);
    pub const CHECKPOINT_MIGRATEABLE: ServerFlags = ServerFlags(0x04);

    pub fn contains(self, flag: ServerFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn insert(&mut self, flag: ServerFlags) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: ServerFlags) {
        self.0 &= !flag.0;
    }
}

impl std::ops::BitOr for ServerFlags {
    type Output = ServerFlags;

    fn bitor(self, rhs: ServerFlags) -> ServerFlags {
        ServerFlags(self.0 | rhs.0)
    }
}

/// Checkpoint tokens that make a running job checkpoint-capable.
const CHECKPOINT_TOKENS: [&str; 3] = ["s", "c", "enabled"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// `user@host` of the submitter
    pub owner: String,
    pub state: JobState,
    pub substate: JobSubstate,
    pub hold: HoldTypes,
    /// The hold attribute has been explicitly assigned
    pub hold_set: bool,
    /// Comma-separated checkpoint options, e.g. `"c=30,depth=2"`
    pub checkpoint: Option<String>,
    pub server_flags: ServerFlags,
    /// Worker node the job is executing on
    pub exec_node: Option<String>,
    pub execution_time: Option<DateTime<Utc>>,
    /// Parent array id for array members
    pub array_id: Option<String>,
    /// Attributes changed since the last state evaluation
    #[serde(skip)]
    pub modified: bool,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            state: JobState::Queued,
            substate: JobSubstate::Queued,
            hold: HoldTypes::NONE,
            hold_set: false,
            checkpoint: None,
            server_flags: ServerFlags::default(),
            exec_node: None,
            execution_time: None,
            array_id: None,
            modified: false,
            created_at: Utc::now(),
        }
    }

    /// A job executing on `node`.
    pub fn running_on(mut self, node: impl Into<String>) -> Self {
        self.state = JobState::Running;
        self.substate = JobSubstate::Running;
        self.exec_node = Some(node.into());
        self.server_flags.insert(ServerFlags::HAS_RUN);
        self
    }

    pub fn with_checkpoint(mut self, options: impl Into<String>) -> Self {
        self.checkpoint = Some(options.into());
        self
    }

    pub fn owner_user(&self) -> &str {
        self.owner.split('@').next().unwrap_or(&self.owner)
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// True when the checkpoint options name a checkpointing mode.
    ///
    /// Tokens may carry a value (`c=60`), only the name is compared.
    pub fn checkpoint_enabled(&self) -> bool {
        self.checkpoint.as_deref().is_some_and(|options| {
            options
                .split(',')
                .map(|token| token.trim().split('=').next().unwrap_or_default())
                .any(|name| CHECKPOINT_TOKENS.contains(&name))
        })
    }

    /// Running and able to take a checkpoint on its worker.
    pub fn can_checkpoint(&self) -> bool {
        self.is_running() && self.checkpoint_enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_queued_without_holds() {
        let job = Job::new("7.srv", "bob@login");
        assert_eq!(job.state, JobState::Queued);
        assert!(job.hold.is_empty());
        assert!(!job.hold_set);
        assert_eq!(job.owner_user(), "bob");
    }

    #[test]
    fn checkpoint_tokens() {
        let job = Job::new("1.srv", "a@h");
        assert!(!job.checkpoint_enabled());

        assert!(job.clone().with_checkpoint("enabled").checkpoint_enabled());
        assert!(job.clone().with_checkpoint("depth=2,c=60").checkpoint_enabled());
        assert!(job.clone().with_checkpoint("s").checkpoint_enabled());
        assert!(!job.clone().with_checkpoint("none").checkpoint_enabled());
        assert!(!job.with_checkpoint("cc,shutdown").checkpoint_enabled());
    }

    #[test]
    fn can_checkpoint_requires_running() {
        let queued = Job::new("1.srv", "a@h").with_checkpoint("enabled");
        assert!(!queued.can_checkpoint());

        let running = queued.running_on("node01");
        assert!(running.can_checkpoint());
        assert!(running.server_flags.contains(ServerFlags::HAS_RUN));
    }

    #[test]
    fn server_flags_insert_remove() {
        let mut flags = ServerFlags::default();
        flags.insert(ServerFlags::HAS_RUN | ServerFlags::CHECKPOINT_FILE);
        assert!(flags.contains(ServerFlags::CHECKPOINT_FILE));
        flags.remove(ServerFlags::CHECKPOINT_FILE);
        assert!(!flags.contains(ServerFlags::CHECKPOINT_FILE));
        assert!(flags.contains(ServerFlags::HAS_RUN));
    }
}
