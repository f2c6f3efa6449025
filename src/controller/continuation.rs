use uuid::Uuid;

use crate::accounting::AccountKind;
use crate::audit::{log_event, EventType, ObjectClass};
use crate::controller::HoldController;
use crate::error::{code, BatchError};
use crate::jobs::{HoldTypes, JobSubstate, ServerFlags, SetMode};
use crate::relay::RelayHandle;
use crate::request::{BatchRequest, ConnectionId, Reply};

const NO_JOB_AFTER_REPLY: &str = "Job not found after reply from worker";

/// What a relayed request was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOp {
    /// Checkpoint and hold; `added` are the holds this request applied
    Hold { added: HoldTypes },
    Checkpoint,
}

/// A request waiting on its worker's reply.
///
/// Finishing consumes the value, so a relay is completed exactly once.
#[derive(Debug)]
#[must_use = "a pending relay must be finished to answer the client"]
pub struct PendingRelay {
    op: RelayOp,
    request: BatchRequest,
    handle: RelayHandle,
}

impl PendingRelay {
    pub(crate) fn new(op: RelayOp, request: BatchRequest, handle: RelayHandle) -> Self {
        Self {
            op,
            request,
            handle,
        }
    }

    pub fn op(&self) -> RelayOp {
        self.op
    }

    pub fn job_id(&self) -> &str {
        &self.request.object
    }

    pub fn relay_id(&self) -> Uuid {
        self.handle.id
    }

    /// Wait for the worker and reconcile the job with its answer.
    pub async fn finish(self, controller: &HoldController) -> Reply {
        let PendingRelay {
            op,
            mut request,
            handle,
        } = self;

        let worker_conn = handle.conn;
        request.reply = handle.reply().await;
        controller.complete_relay(op, request, worker_conn).await
    }
}

impl HoldController {
    async fn complete_relay(
        &self,
        op: RelayOp,
        mut request: BatchRequest,
        worker_conn: ConnectionId,
    ) -> Reply {
        self.relay.disconnect(worker_conn);
        if let Some(conn) = request.orig_conn.take() {
            request.conn = conn;
        }

        match op {
            RelayOp::Hold { added } => self.process_hold_reply(&request, added).await,
            RelayOp::Checkpoint => self.process_checkpoint_reply(&request).await,
        }
    }

    /// Finish a hold that was relayed as a checkpoint request.
    async fn process_hold_reply(&self, request: &BatchRequest, added: HoldTypes) -> Reply {
        let Some(mut job) = self.registry.find_job(&request.object).await else {
            log_event(EventType::Debug, ObjectClass::Job, &request.object, NO_JOB_AFTER_REPLY);
            return Reply::reject_with(
                &BatchError::UnknownJob(request.object.clone()),
                NO_JOB_AFTER_REPLY,
            );
        };

        let reply = request.reply;

        if !reply.is_ok() {
            // A worker without checkpoint support still honours the hold.
            let unsupported = reply.code == code::NO_SUPPORT;
            if !unsupported {
                job.hold.apply(added, SetMode::Decr);
            }
            job.substate = JobSubstate::Running;
            self.reevaluate(&mut job).ok();

            if unsupported {
                tracing::info!(job_id = %job.id, "Worker cannot checkpoint, hold kept");
                return Reply::Ack;
            }

            let message = format!("Worker rejected hold request: {}", reply.code);
            log_event(EventType::Debug, ObjectClass::Job, &job.id, &message);
            return Reply::reject_with(&BatchError::WorkerRejected(reply.code), message);
        }

        job.server_flags.insert(ServerFlags::CHECKPOINT_FILE);
        if reply.aux != 0 {
            job.server_flags.remove(ServerFlags::CHECKPOINT_FILE);
            job.server_flags
                .insert(ServerFlags::HAS_RUN | ServerFlags::CHECKPOINT_MIGRATEABLE);
        }

        job.substate = JobSubstate::Running;
        self.reevaluate(&mut job).ok();
        self.accounting
            .record(AccountKind::Checkpoint, &job, "Checkpointed and held");
        Reply::Ack
    }

    async fn process_checkpoint_reply(&self, request: &BatchRequest) -> Reply {
        let Some(job) = self.registry.find_job(&request.object).await else {
            log_event(EventType::Debug, ObjectClass::Job, &request.object, NO_JOB_AFTER_REPLY);
            return Reply::reject_with(
                &BatchError::UnknownJob(request.object.clone()),
                NO_JOB_AFTER_REPLY,
            );
        };

        if !request.reply.is_ok() {
            tracing::debug!(job_id = %job.id, code = request.reply.code, "Worker reported checkpoint error");
        }

        self.accounting
            .record(AccountKind::Checkpoint, &job, "Checkpointed");
        Reply::Ack
    }
}
