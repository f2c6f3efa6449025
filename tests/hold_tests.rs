//! Integration tests for synchronous hold and release handling.
//!
//! Covers jobs that are not running (holds apply immediately, no relay),
//! privilege checks per hold type, and malformed hold attributes.


use batch_lite::controller::Outcome;
use batch_lite::error::code;
use batch_lite::jobs::{HoldTypes, Job, JobState, JobSubstate};
use batch_lite::request::{BatchRequest, Permissions, Reply};
use batch_lite::store::SaveMode;
use test_harness::TestController;

fn completed(outcome: Outcome) -> Reply {
    match outcome {
        Outcome::Completed(reply) => reply,
        Outcome::Deferred(pending) => panic!("unexpected relay for {}", pending.job_id()),
    }
}

#[tokio::test]
async fn test_hold_then_release_restores_mask() {
    let t = TestController::new();
    t.add(Job::new("1.srv", "alice@login")).await;

    let hold = BatchRequest::hold("1.srv", "u", "alice", "login");
    assert_eq!(completed(t.controller.hold_job(hold).await), Reply::Ack);

    let job = t.job("1.srv").await;
    assert_eq!(job.hold, HoldTypes::USER);
    assert!(job.hold_set);
    assert_eq!(job.state, JobState::Held);
    assert_eq!(job.substate, JobSubstate::Held);

    let release = BatchRequest::release("1.srv", "u", "alice", "login");
    assert_eq!(t.controller.req_release_job(release).await, Reply::Ack);

    let job = t.job("1.srv").await;
    assert_eq!(job.hold, HoldTypes::NONE);
    assert_eq!(job.state, JobState::Queued);
    assert!(t.relay.relayed().is_empty(), "no worker relay for a queued job");
}

#[tokio::test]
async fn test_round_trip_keeps_existing_holds() {
    let t = TestController::new();
    let mut job = Job::new("2.srv", "alice@login");
    job.hold = HoldTypes::OTHER;
    t.add(job).await;

    let oper = Permissions::operator();
    let hold = BatchRequest::hold("2.srv", "uo", "op", "admin").with_perm(oper);
    assert!(completed(t.controller.hold_job(hold).await).is_ack());
    assert_eq!(t.job("2.srv").await.hold, HoldTypes::USER | HoldTypes::OTHER);

    let release = BatchRequest::release("2.srv", "u", "op", "admin").with_perm(oper);
    assert!(t.controller.req_release_job(release).await.is_ack());

    let job = t.job("2.srv").await;
    assert_eq!(job.hold, HoldTypes::OTHER);
    assert_eq!(job.state, JobState::Held, "remaining hold keeps the job held");
}

#[tokio::test]
async fn test_hold_state_change_is_saved() {
    let t = TestController::new();
    t.add(Job::new("3.srv", "alice@login")).await;

    let hold = BatchRequest::hold("3.srv", "u", "alice", "login");
    assert!(completed(t.controller.hold_job(hold).await).is_ack());

    assert_eq!(t.store.saves_for("3.srv"), vec![SaveMode::Full]);
    let saved = t.store.load("3.srv").unwrap();
    assert_eq!(saved.state, JobState::Held);
    assert!(!saved.modified);
}

#[tokio::test]
async fn test_repeated_hold_does_not_save_again() {
    let t = TestController::new();
    t.add(Job::new("4.srv", "alice@login")).await;

    for _ in 0..2 {
        let hold = BatchRequest::hold("4.srv", "u", "alice", "login");
        assert!(completed(t.controller.hold_job(hold).await).is_ack());
    }
    assert_eq!(t.store.saves_for("4.srv").len(), 1);
}

#[tokio::test]
async fn test_system_hold_requires_manager() {
    let t = TestController::new();
    t.add(Job::new("5.srv", "alice@login")).await;

    for perm in [Permissions::default(), Permissions::user(), Permissions::operator()] {
        let hold = BatchRequest::hold("5.srv", "s", "alice", "login").with_perm(perm);
        let reply = completed(t.controller.hold_job(hold).await);
        assert_eq!(reply.code(), code::PERMISSION);
        assert_eq!(t.job("5.srv").await.hold, HoldTypes::NONE);
    }

    let hold = BatchRequest::hold("5.srv", "s", "root", "server").with_perm(Permissions::manager());
    assert!(completed(t.controller.hold_job(hold).await).is_ack());
    assert_eq!(t.job("5.srv").await.hold, HoldTypes::SYSTEM);
}

#[tokio::test]
async fn test_release_system_hold_requires_manager() {
    let t = TestController::new();
    let mut job = Job::new("6.srv", "alice@login");
    job.hold = HoldTypes::SYSTEM;
    t.add(job).await;

    let release = BatchRequest::release("6.srv", "s", "op", "admin").with_perm(Permissions::operator());
    assert_eq!(t.controller.req_release_job(release).await.code(), code::PERMISSION);
    assert_eq!(t.job("6.srv").await.hold, HoldTypes::SYSTEM);
}

#[tokio::test]
async fn test_other_hold_requires_operator() {
    let t = TestController::new();
    t.add(Job::new("7.srv", "alice@login")).await;

    let hold = BatchRequest::hold("7.srv", "o", "alice", "login");
    assert_eq!(completed(t.controller.hold_job(hold).await).code(), code::PERMISSION);
    assert_eq!(t.job("7.srv").await.hold, HoldTypes::NONE);
}

#[tokio::test]
async fn test_unknown_job() {
    let t = TestController::new();

    let hold = BatchRequest::hold("99.srv", "u", "alice", "login");
    assert_eq!(completed(t.controller.hold_job(hold).await).code(), code::UNKNOWN_JOB);

    let release = BatchRequest::release("99.srv", "u", "alice", "login");
    assert_eq!(t.controller.req_release_job(release).await.code(), code::UNKNOWN_JOB);
}

#[tokio::test]
async fn test_malformed_hold_attributes() {
    let t = TestController::new();
    t.add(Job::new("8.srv", "alice@login")).await;

    let cases = [
        BatchRequest::hold("8.srv", "x", "alice", "login"),
        BatchRequest::hold("8.srv", "u", "alice", "login").with_attr("Hold_Types", "o"),
        BatchRequest::new(batch_lite::request::RequestKind::HoldJob, "8.srv", "alice", "login")
            .with_attr("Priority", "10"),
        BatchRequest::new(batch_lite::request::RequestKind::HoldJob, "8.srv", "alice", "login"),
    ];

    for hold in cases {
        let reply = completed(t.controller.hold_job(hold).await);
        assert_eq!(reply.code(), code::INVALID_REQUEST);
    }
    assert_eq!(t.job("8.srv").await.hold, HoldTypes::NONE);
}

#[tokio::test]
async fn test_running_job_without_checkpoint_is_held_in_place() {
    let t = TestController::new();
    t.add(Job::new("9.srv", "alice@login").running_on("node01")).await;

    let hold = BatchRequest::hold("9.srv", "u", "alice", "login");
    assert!(completed(t.controller.hold_job(hold).await).is_ack());

    let job = t.job("9.srv").await;
    assert_eq!(job.hold, HoldTypes::USER);
    assert_eq!(job.state, JobState::Running, "running jobs keep running");
    assert!(t.relay.relayed().is_empty());
}

/// With checkpoint-required holds a running job that cannot checkpoint is
/// refused, and the hold bits stay applied.
#[tokio::test]
async fn test_checkpoint_required_rejects_but_keeps_hold() {
    let t = TestController::checkpoint_required();
    t.add(Job::new("10.srv", "alice@login").running_on("node01")).await;

    let hold = BatchRequest::hold("10.srv", "u", "alice", "login");
    let reply = completed(t.controller.hold_job(hold).await);

    match reply {
        Reply::Reject { code: c, message } => {
            assert_eq!(c, code::INVALID_REQUEST);
            assert_eq!(
                message.as_deref(),
                Some("job not held since checkpointing is expected but not enabled for job")
            );
        }
        Reply::Ack => panic!("hold should be refused"),
    }

    let job = t.job("10.srv").await;
    assert_eq!(job.hold, HoldTypes::USER);
    assert_eq!(job.substate, JobSubstate::Running);
    assert!(t.relay.relayed().is_empty());
}

#[tokio::test]
async fn test_checkpoint_required_ignores_queued_jobs() {
    let t = TestController::checkpoint_required();
    t.add(Job::new("11.srv", "alice@login")).await;

    let hold = BatchRequest::hold("11.srv", "u", "alice", "login");
    assert!(completed(t.controller.hold_job(hold).await).is_ack());
    assert_eq!(t.job("11.srv").await.state, JobState::Held);
}

#[tokio::test]
async fn test_other_user_cannot_touch_job() {
    let t = TestController::new();
    let mut job = Job::new("12.srv", "alice@login");
    job.hold = HoldTypes::USER;
    job.state = JobState::Held;
    t.add(job).await;

    let release = BatchRequest::release("12.srv", "u", "mallory", "evil");
    assert_eq!(t.controller.req_release_job(release).await.code(), code::PERMISSION);

    let hold = BatchRequest::hold("12.srv", "u", "mallory", "evil");
    assert_eq!(completed(t.controller.hold_job(hold).await).code(), code::PERMISSION);

    let job = t.job("12.srv").await;
    assert_eq!(job.hold, HoldTypes::USER);
    assert_eq!(job.state, JobState::Held);
    assert!(t.store.saves_for("12.srv").is_empty());
}

#[tokio::test]
async fn test_operator_may_release_any_job() {
    let t = TestController::new();
    let mut job = Job::new("13.srv", "alice@login");
    job.hold = HoldTypes::USER;
    t.add(job).await;

    let release = BatchRequest::release("13.srv", "u", "op", "admin").with_perm(Permissions::operator());
    assert!(t.controller.req_release_job(release).await.is_ack());
    assert_eq!(t.job("13.srv").await.hold, HoldTypes::NONE);
}

/// A release that was waiting on the job lock while the job was deleted.
#[tokio::test]
async fn test_release_of_job_deleted_while_waiting() {
    let t = TestController::new();
    let mut job = Job::new("14.srv", "alice@login");
    job.hold = HoldTypes::USER;
    t.add(job).await;

    let deleter = t.registry.find_job("14.srv").await.unwrap();
    let controller = t.controller.clone();
    let task = tokio::spawn(async move {
        controller
            .req_release_job(BatchRequest::release("14.srv", "u", "alice", "login"))
            .await
    });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!task.is_finished());

    assert!(t.registry.remove_job("14.srv").await);
    drop(deleter);

    assert_eq!(task.await.unwrap().code(), code::UNKNOWN_JOB);
    assert!(t.store.saves_for("14.srv").is_empty());
}
