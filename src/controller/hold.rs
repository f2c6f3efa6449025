use crate::audit::job_event;
use crate::controller::{HoldController, Outcome, PendingRelay, RelayOp};
use crate::error::{code, BatchError, Result};
use crate::jobs::hold::get_hold;
use crate::jobs::{HoldSpec, HoldTypes, Job, JobSubstate, LockedJob, ServerFlags, SetMode};
use crate::request::{authorize_job_request, check_hold_privilege, BatchRequest, Reply};
use crate::store::SaveMode;

const NOT_CHECKPOINTING_MSG: &str =
    "job not held since checkpointing is expected but not enabled for job";

impl HoldController {
    /// Service a Hold Job request.
    ///
    /// Holds on a job that is not running take effect immediately. A running
    /// job that can checkpoint is held by asking its worker to checkpoint
    /// it, and the reply waits for the worker.
    pub async fn hold_job(&self, request: BatchRequest) -> Outcome {
        let Some(mut job) = self.registry.find_job(&request.object).await else {
            return Outcome::Completed(Reply::reject(&BatchError::UnknownJob(
                request.object.clone(),
            )));
        };

        if let Err(e) = authorize(&request, &job) {
            return Outcome::Completed(Reply::reject(&e));
        }

        let spec = match get_hold(&request.attrs) {
            Ok(spec) => spec,
            Err(e) => return Outcome::Completed(Reply::reject(&e)),
        };

        if let Err(e) = check_hold_privilege(spec.holds, request.perm) {
            tracing::info!(job_id = %job.id, requester = %request.requester(), holds = %spec.holds, "Hold refused");
            return Outcome::Completed(Reply::reject(&e));
        }

        let old = job.hold;
        job.hold.apply(spec.holds, SetMode::Incr);
        job.hold_set = true;
        let message = format!(
            "Holds {} set at request of {}",
            spec.raw,
            request.requester()
        );

        if job.can_checkpoint() {
            return self.relay_hold(job, request, &spec, old, &message);
        }

        if self.checkpoint_required && job.is_running() {
            // Holds stay applied although the request is refused.
            job_event(&job.id, &message);
            tracing::warn!(job_id = %job.id, holds = %job.hold, "Running job not checkpointable, hold left in place");
            return Outcome::Completed(Reply::reject_with(
                &BatchError::InvalidRequest(NOT_CHECKPOINTING_MSG.to_string()),
                NOT_CHECKPOINTING_MSG,
            ));
        }

        job_event(&job.id, &message);

        if old != job.hold {
            if let Err(e) = self.reevaluate(&mut job) {
                return Outcome::Completed(Reply::reject(&e));
            }
        }

        Outcome::Completed(Reply::Ack)
    }

    fn relay_hold(
        &self,
        mut job: LockedJob,
        mut request: BatchRequest,
        spec: &HoldSpec,
        old: HoldTypes,
        message: &str,
    ) -> Outcome {
        let added = job.hold - old;

        let submitted = match job.exec_node.clone() {
            Some(node) => self.submit(&node, &mut request),
            None => Err(BatchError::RelaySubmission {
                code: code::NO_RELAY_NODE,
                reason: format!("job {} has no execution node", job.id),
            }),
        };

        match submitted {
            Err(e) => {
                job.hold = old;
                tracing::warn!(job_id = %job.id, error = %e, "Hold relay failed, holds rolled back");
                Outcome::Completed(Reply::reject(&e))
            }
            Ok(handle) => {
                job.server_flags
                    .insert(ServerFlags::HAS_RUN | ServerFlags::CHECKPOINT_FILE);
                job.substate = JobSubstate::CheckpointPending;
                self.save(&job, SaveMode::Quick).ok();
                job_event(&job.id, message);
                tracing::debug!(job_id = %job.id, holds = %spec.holds, relay_id = %handle.id, "Hold deferred to worker");
                Outcome::Deferred(PendingRelay::new(
                    RelayOp::Hold { added },
                    request,
                    handle,
                ))
            }
        }
    }

    /// Clear the requested holds on a locked job.
    ///
    /// The caller owns the lock and the reply.
    pub fn release_job(&self, request: &BatchRequest, job: &mut Job) -> Result<()> {
        let spec = get_hold(&request.attrs)?;
        check_hold_privilege(spec.holds, request.perm)?;

        let old = job.hold;
        job.hold.apply(spec.holds, SetMode::Decr);

        if old != job.hold {
            self.reevaluate(job)?;
        }

        job_event(
            &job.id,
            &format!(
                "Holds {} released at request of {}",
                spec.raw,
                request.requester()
            ),
        );
        Ok(())
    }

    /// Service a Release Job request.
    pub async fn req_release_job(&self, request: BatchRequest) -> Reply {
        let Some(mut job) = self.registry.find_job(&request.object).await else {
            return Reply::reject(&BatchError::UnknownJob(request.object.clone()));
        };

        if let Err(e) = authorize(&request, &job) {
            return Reply::reject(&e);
        }

        let result = self.release_job(&request, &mut job);
        drop(job);
        result.into()
    }

    /// Service a Checkpoint Job request.
    pub async fn checkpoint_job(&self, mut request: BatchRequest) -> Outcome {
        let Some(mut job) = self.registry.find_job(&request.object).await else {
            return Outcome::Completed(Reply::reject(&BatchError::UnknownJob(
                request.object.clone(),
            )));
        };

        if let Err(e) = authorize(&request, &job) {
            return Outcome::Completed(Reply::reject(&e));
        }

        if !job.can_checkpoint() {
            let err = BatchError::NotCheckpointable(job.id.clone());
            job_event(&job.id, "checkpoint refused, job is not checkpointable");
            return Outcome::Completed(Reply::reject_with(&err, "job is not checkpointable"));
        }

        let submitted = match job.exec_node.clone() {
            Some(node) => self.submit(&node, &mut request),
            None => Err(BatchError::RelaySubmission {
                code: code::NO_RELAY_NODE,
                reason: format!("job {} has no execution node", job.id),
            }),
        };

        match submitted {
            Err(e) => Outcome::Completed(Reply::reject(&e)),
            Ok(handle) => {
                job.server_flags.insert(ServerFlags::CHECKPOINT_FILE);
                self.save(&job, SaveMode::Quick).ok();
                job_event(
                    &job.id,
                    &format!("Checkpoint requested by {}", request.requester()),
                );
                Outcome::Deferred(PendingRelay::new(RelayOp::Checkpoint, request, handle))
            }
        }
    }
}

/// Owner, operator or manager only.
fn authorize(request: &BatchRequest, job: &Job) -> Result<()> {
    if authorize_job_request(request, job) {
        return Ok(());
    }
    tracing::info!(job_id = %job.id, requester = %request.requester(), kind = %request.kind, "Request refused, not the job owner");
    Err(BatchError::PermissionDenied)
}
