//! Hold, release and checkpoint request handling.
//!
//! Handlers lock the target job through the [`JobRegistry`], validate the
//! request, and then either finish synchronously or relay the request to
//! the job's worker:
//!
//! - [`Outcome::Completed`]: the job lock is already released and the reply
//!   is ready for the client
//! - [`Outcome::Deferred`]: the request went to a worker; the returned
//!   [`PendingRelay`] must be finished to produce the reply
//!
//! The job lock is never carried into the deferred leg. The continuation
//! looks the job up again by id and copes with it having been deleted.
//!
//! Array operations lock the array first and member jobs one at a time
//! under it.

pub mod array;
pub mod continuation;
pub mod hold;

use std::sync::Arc;

use crate::accounting::Accounting;
use crate::error::Result;
use crate::jobs::{evaluate_state, Job, JobRegistry, JobState, JobSubstate};
use crate::relay::{RelayHandle, WorkerRelay};
use crate::request::{BatchRequest, Reply};
use crate::store::{JobStore, SaveMode};

pub use continuation::{PendingRelay, RelayOp};

/// Result of a request handler.
#[derive(Debug)]
#[must_use = "a deferred outcome must be finished to answer the client"]
pub enum Outcome {
    Completed(Reply),
    Deferred(PendingRelay),
}

impl Outcome {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred(_))
    }

    /// Drive the outcome to its terminal reply.
    pub async fn into_reply(self, controller: &HoldController) -> Reply {
        match self {
            Outcome::Completed(reply) => reply,
            Outcome::Deferred(pending) => pending.finish(controller).await,
        }
    }
}

/// Job hold/release/checkpoint state machine.
pub struct HoldController {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    accounting: Arc<dyn Accounting>,
    relay: Arc<dyn WorkerRelay>,
    /// Running jobs may only be held by checkpointing them
    checkpoint_required: bool,
}

impl HoldController {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
        accounting: Arc<dyn Accounting>,
        relay: Arc<dyn WorkerRelay>,
    ) -> Self {
        Self {
            registry,
            store,
            accounting,
            relay,
            checkpoint_required: false,
        }
    }

    pub fn with_checkpoint_required(mut self, required: bool) -> Self {
        self.checkpoint_required = required;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Persist a job. Failures are logged here; the in-memory record stays
    /// authoritative either way.
    fn save(&self, job: &Job, mode: SaveMode) -> Result<()> {
        self.store.save(job, mode).inspect_err(|e| {
            tracing::error!(job_id = %job.id, error = %e, "Failed to save job");
        })
    }

    /// Move a job to `state`/`substate` and save the full record.
    fn set_state(&self, job: &mut Job, state: JobState, substate: JobSubstate) -> Result<()> {
        if job.state != state || job.substate != substate {
            tracing::debug!(
                job_id = %job.id,
                from = %job.state,
                to = %state,
                substate = %substate,
                "Job state change"
            );
        }
        job.state = state;
        job.substate = substate;
        job.modified = false;
        self.save(job, SaveMode::Full)
    }

    /// Mark attributes changed and recompute the job's state.
    fn reevaluate(&self, job: &mut Job) -> Result<()> {
        job.modified = true;
        let (state, substate) = evaluate_state(job);
        self.set_state(job, state, substate)
    }

    /// Send a copy of `request` to `node`. On success the request's reply
    /// connection is swapped for the worker connection until the relay
    /// finishes.
    fn submit(&self, node: &str, request: &mut BatchRequest) -> Result<RelayHandle> {
        let handle = self.relay.relay(node, request.clone())?;
        request.orig_conn = Some(request.conn);
        request.conn = handle.conn;
        Ok(handle)
    }
}
