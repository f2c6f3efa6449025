use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::jobs::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Transit,
    Queued,
    Held,
    Waiting,
    Running,
    Exiting,
    Complete,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Transit => write!(f, "transit"),
            JobState::Queued => write!(f, "queued"),
            JobState::Held => write!(f, "held"),
            JobState::Waiting => write!(f, "waiting"),
            JobState::Running => write!(f, "running"),
            JobState::Exiting => write!(f, "exiting"),
            JobState::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobSubstate {
    Transit,
    Queued,
    Held,
    Waiting,
    Prerun,
    Running,
    /// Running, a checkpoint-and-hold has been relayed to the worker
    CheckpointPending,
    Exiting,
    Complete,
}

impl std::fmt::Display for JobSubstate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobSubstate::Transit => write!(f, "transit"),
            JobSubstate::Queued => write!(f, "queued"),
            JobSubstate::Held => write!(f, "held"),
            JobSubstate::Waiting => write!(f, "waiting"),
            JobSubstate::Prerun => write!(f, "prerun"),
            JobSubstate::Running => write!(f, "running"),
            JobSubstate::CheckpointPending => write!(f, "checkpoint-pending"),
            JobSubstate::Exiting => write!(f, "exiting"),
            JobSubstate::Complete => write!(f, "complete"),
        }
    }
}

/// Compute the state a job should be in given its attributes.
///
/// Jobs that are executing or finished keep their current state; the
/// worker drives those transitions. Otherwise holds win over an execution
/// time in the future, which wins over plain queued.
pub fn evaluate_state(job: &Job) -> (JobState, JobSubstate) {
    match job.state {
        JobState::Running | JobState::Exiting | JobState::Complete => {
            return (job.state, job.substate)
        }
        _ => {}
    }

    if !job.hold.is_empty() {
        return (JobState::Held, JobSubstate::Held);
    }

    if let Some(at) = job.execution_time {
        if at > Utc::now() {
            return (JobState::Waiting, JobSubstate::Waiting);
        }
    }

    (JobState::Queued, JobSubstate::Queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::hold::HoldTypes;
    use chrono::Duration;

    #[test]
    fn held_when_any_hold_is_set() {
        let mut job = Job::new("1.srv", "alice@login");
        job.hold = HoldTypes::OTHER;
        assert_eq!(evaluate_state(&job), (JobState::Held, JobSubstate::Held));
    }

    #[test]
    fn queued_when_released() {
        let mut job = Job::new("1.srv", "alice@login");
        job.state = JobState::Held;
        job.substate = JobSubstate::Held;
        assert_eq!(evaluate_state(&job), (JobState::Queued, JobSubstate::Queued));
    }

    #[test]
    fn waiting_for_future_execution_time() {
        let mut job = Job::new("1.srv", "alice@login");
        job.execution_time = Some(Utc::now() + Duration::hours(1));
        assert_eq!(
            evaluate_state(&job),
            (JobState::Waiting, JobSubstate::Waiting)
        );
    }

    #[test]
    fn running_is_sticky() {
        let mut job = Job::new("1.srv", "alice@login");
        job.state = JobState::Running;
        job.substate = JobSubstate::CheckpointPending;
        job.hold = HoldTypes::USER;
        assert_eq!(
            evaluate_state(&job),
            (JobState::Running, JobSubstate::CheckpointPending)
        );
    }
}
