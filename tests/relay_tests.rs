//! Integration tests for holds and checkpoints relayed to a worker.
//!
//! These tests validate that:
//! - A hold on a running checkpointable job is not answered until the
//!   worker replies, and the job lock is free meanwhile
//! - Worker errors roll back exactly the holds the request added, except
//!   the "no support" reply which keeps the hold and acknowledges
//! - Submission failures roll back immediately
//! - A job deleted while the relay is in flight ends in an unknown-job reply


use std::time::Duration;

use batch_lite::accounting::AccountKind;
use batch_lite::controller::{Outcome, RelayOp};
use batch_lite::error::code;
use batch_lite::jobs::{HoldTypes, Job, JobState, JobSubstate, ServerFlags};
use batch_lite::request::{BatchRequest, ConnectionId, Reply, WorkerReply};
use batch_lite::store::SaveMode;
use test_harness::{assert_eventually, checkpointable_job, TestController};

fn hold_request(job_id: &str) -> BatchRequest {
    BatchRequest::hold(job_id, "u", "alice", "login").with_conn(ConnectionId(7))
}

#[tokio::test]
async fn test_hold_on_running_job_waits_for_worker() {
    let t = TestController::new();
    t.add(checkpointable_job("1.srv", "alice@login", "node01")).await;

    let outcome = t.controller.hold_job(hold_request("1.srv")).await;
    let Outcome::Deferred(pending) = outcome else {
        panic!("hold on a checkpointable job should be relayed");
    };
    assert_eq!(pending.op(), RelayOp::Hold { added: HoldTypes::USER });

    let relayed = t.relay.relayed();
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0].0, "node01");
    assert_eq!(relayed[0].1.object, "1.srv");

    // The job is unlocked and shows the pending checkpoint.
    let job = t.job("1.srv").await;
    assert_eq!(job.hold, HoldTypes::USER);
    assert_eq!(job.substate, JobSubstate::CheckpointPending);
    assert!(job
        .server_flags
        .contains(ServerFlags::HAS_RUN | ServerFlags::CHECKPOINT_FILE));
    assert_eq!(t.store.saves_for("1.srv"), vec![SaveMode::Quick]);

    let controller = t.controller.clone();
    let task = tokio::spawn(async move { pending.finish(&controller).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!task.is_finished(), "client must not be answered before the worker");

    assert!(t.relay.answer_next(WorkerReply::ok()));
    assert_eq!(task.await.unwrap(), Reply::Ack);

    let job = t.job("1.srv").await;
    assert_eq!(job.hold, HoldTypes::USER);
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.substate, JobSubstate::Running, "checkpoint no longer pending");
    assert!(job.server_flags.contains(ServerFlags::CHECKPOINT_FILE));

    let records = t.accounting.records_for("1.srv");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, AccountKind::Checkpoint);
}

#[tokio::test]
async fn test_unsupported_worker_acks_and_keeps_hold() {
    let t = TestController::new();
    t.add(checkpointable_job("2.srv", "alice@login", "node01")).await;

    let outcome = t.controller.hold_job(hold_request("2.srv")).await;
    assert!(outcome.is_deferred());

    assert!(t.relay.answer_next(WorkerReply::error(code::NO_SUPPORT)));
    let reply = outcome.into_reply(&t.controller).await;
    assert_eq!(reply, Reply::Ack);

    let job = t.job("2.srv").await;
    assert!(job.hold.contains(HoldTypes::USER));
    assert_eq!(job.substate, JobSubstate::Running);
    assert!(t.accounting.records().is_empty());
}

#[tokio::test]
async fn test_worker_error_restores_mask() {
    let t = TestController::new();
    let mut job = checkpointable_job("3.srv", "alice@login", "node01");
    job.hold = HoldTypes::OTHER;
    t.add(job).await;

    let request = BatchRequest::hold("3.srv", "uo", "op", "admin")
        .with_perm(batch_lite::request::Permissions::operator());
    let outcome = t.controller.hold_job(request).await;
    let Outcome::Deferred(ref pending) = outcome else {
        panic!("expected relay");
    };
    assert_eq!(pending.op(), RelayOp::Hold { added: HoldTypes::USER });

    assert!(t.relay.answer_next(WorkerReply::error(15099)));
    let reply = outcome.into_reply(&t.controller).await;
    assert_eq!(reply.code(), 15099);

    let job = t.job("3.srv").await;
    assert_eq!(job.hold, HoldTypes::OTHER, "only the added hold is removed");
    assert_eq!(job.substate, JobSubstate::Running);
}

#[tokio::test]
async fn test_lost_worker_is_a_protocol_error() {
    let t = TestController::new();
    t.add(checkpointable_job("4.srv", "alice@login", "node01")).await;

    let outcome = t.controller.hold_job(hold_request("4.srv")).await;
    assert!(t.relay.lose_next());

    let reply = outcome.into_reply(&t.controller).await;
    assert_eq!(reply.code(), code::PROTOCOL);
    assert_eq!(t.job("4.srv").await.hold, HoldTypes::NONE);
}

#[tokio::test]
async fn test_submission_failure_rolls_back() {
    let t = TestController::new();
    t.add(checkpointable_job("5.srv", "alice@login", "node01")).await;
    t.relay.fail_submissions(code::NO_RELAY_NODE);

    let outcome = t.controller.hold_job(hold_request("5.srv")).await;
    let Outcome::Completed(reply) = outcome else {
        panic!("failed submission must answer immediately");
    };
    assert_eq!(reply.code(), code::NO_RELAY_NODE);

    let job = t.job("5.srv").await;
    assert_eq!(job.hold, HoldTypes::NONE);
    assert_eq!(job.substate, JobSubstate::Running);
    assert!(t.store.saves_for("5.srv").is_empty());
}

#[tokio::test]
async fn test_running_job_without_exec_node_rolls_back() {
    let t = TestController::new();
    let mut job = checkpointable_job("6.srv", "alice@login", "node01");
    job.exec_node = None;
    t.add(job).await;

    let outcome = t.controller.hold_job(hold_request("6.srv")).await;
    let Outcome::Completed(reply) = outcome else {
        panic!("no node to relay to");
    };
    assert_eq!(reply.code(), code::NO_RELAY_NODE);
    assert_eq!(t.job("6.srv").await.hold, HoldTypes::NONE);
}

#[tokio::test]
async fn test_job_deleted_during_relay() {
    let t = TestController::new();
    t.add(checkpointable_job("7.srv", "alice@login", "node01")).await;

    let outcome = t.controller.hold_job(hold_request("7.srv")).await;
    assert!(outcome.is_deferred());
    assert!(t.registry.remove_job("7.srv").await);

    assert!(t.relay.answer_next(WorkerReply::ok()));
    let reply = outcome.into_reply(&t.controller).await;
    match reply {
        Reply::Reject { code: c, message } => {
            assert_eq!(c, code::UNKNOWN_JOB);
            assert_eq!(message.as_deref(), Some("Job not found after reply from worker"));
        }
        Reply::Ack => panic!("deleted job cannot be acknowledged"),
    }
}

/// The job is deleted by a task that holds its lock while the continuation
/// is already waiting for that lock.
#[tokio::test]
async fn test_job_deleted_while_continuation_waits_for_lock() {
    let t = TestController::new();
    t.add(checkpointable_job("13.srv", "alice@login", "node01")).await;

    let Outcome::Deferred(pending) = t.controller.hold_job(hold_request("13.srv")).await else {
        panic!("expected relay");
    };

    let deleter = t.registry.find_job("13.srv").await.unwrap();
    assert!(t.relay.answer_next(WorkerReply::ok()));

    let controller = t.controller.clone();
    let task = tokio::spawn(async move { pending.finish(&controller).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!task.is_finished(), "continuation should be waiting for the job lock");

    assert!(t.registry.remove_job("13.srv").await);
    drop(deleter);

    match task.await.unwrap() {
        Reply::Reject { code: c, message } => {
            assert_eq!(c, code::UNKNOWN_JOB);
            assert_eq!(message.as_deref(), Some("Job not found after reply from worker"));
        }
        Reply::Ack => panic!("deleted job cannot be acknowledged"),
    }
    assert!(t.accounting.records().is_empty());
    assert_eq!(t.store.saves_for("13.srv"), vec![SaveMode::Quick], "deleted job is not saved again");
}

#[tokio::test]
async fn test_migratable_checkpoint_flags() {
    let t = TestController::new();
    t.add(checkpointable_job("8.srv", "alice@login", "node01")).await;

    let outcome = t.controller.hold_job(hold_request("8.srv")).await;
    assert!(t.relay.answer_next(WorkerReply { code: code::NONE, aux: 1 }));
    assert!(outcome.into_reply(&t.controller).await.is_ack());

    let flags = t.job("8.srv").await.server_flags;
    assert!(flags.contains(ServerFlags::HAS_RUN | ServerFlags::CHECKPOINT_MIGRATEABLE));
    assert!(!flags.contains(ServerFlags::CHECKPOINT_FILE));
}

#[tokio::test]
async fn test_client_connection_restored_and_worker_connection_closed() {
    let t = TestController::new();
    t.add(checkpointable_job("9.srv", "alice@login", "node01")).await;

    let outcome = t.controller.hold_job(hold_request("9.srv")).await;
    assert!(t.relay.answer_next(WorkerReply::ok()));
    assert!(outcome.into_reply(&t.controller).await.is_ack());

    // The scripted relay numbers worker connections from 1000.
    assert_eq!(t.relay.disconnected(), vec![ConnectionId(1000)]);
}

#[tokio::test]
async fn test_job_lock_is_free_while_relay_pending() {
    let t = TestController::new();
    t.add(checkpointable_job("10.srv", "alice@login", "node01")).await;

    let outcome = t.controller.hold_job(hold_request("10.srv")).await;
    assert!(outcome.is_deferred());

    let registry = t.registry.clone();
    assert_eventually(
        || {
            let registry = registry.clone();
            async move { registry.find_job("10.srv").await.is_some() }
        },
        Duration::from_millis(200),
        "job should be lockable while waiting for the worker",
    )
    .await;

    assert!(t.relay.answer_next(WorkerReply::ok()));
    assert!(outcome.into_reply(&t.controller).await.is_ack());
}

#[tokio::test]
async fn test_checkpoint_request_relays_and_records() {
    let t = TestController::new();
    t.add(checkpointable_job("11.srv", "alice@login", "node01")).await;

    let outcome = t
        .controller
        .checkpoint_job(BatchRequest::checkpoint("11.srv", "alice", "login"))
        .await;
    let Outcome::Deferred(ref pending) = outcome else {
        panic!("checkpoint should be relayed");
    };
    assert_eq!(pending.op(), RelayOp::Checkpoint);

    // Checkpoint replies are acknowledged whatever the worker says.
    assert!(t.relay.answer_next(WorkerReply::error(15099)));
    assert!(outcome.into_reply(&t.controller).await.is_ack());

    let records = t.accounting.records_for("11.srv");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, AccountKind::Checkpoint);
    assert!(t.job("11.srv").await.server_flags.contains(ServerFlags::CHECKPOINT_FILE));
}

#[tokio::test]
async fn test_checkpoint_by_other_user_is_refused() {
    let t = TestController::new();
    t.add(checkpointable_job("14.srv", "alice@login", "node01")).await;

    let outcome = t
        .controller
        .checkpoint_job(BatchRequest::checkpoint("14.srv", "mallory", "evil"))
        .await;
    let Outcome::Completed(reply) = outcome else {
        panic!("refused checkpoint must answer immediately");
    };
    assert_eq!(reply.code(), code::PERMISSION);
    assert!(t.relay.relayed().is_empty());
    assert!(!t.job("14.srv").await.server_flags.contains(ServerFlags::CHECKPOINT_FILE));
}

#[tokio::test]
async fn test_hold_by_other_user_is_not_relayed() {
    let t = TestController::new();
    t.add(checkpointable_job("15.srv", "alice@login", "node01")).await;

    let request = BatchRequest::hold("15.srv", "u", "mallory", "evil");
    let Outcome::Completed(reply) = t.controller.hold_job(request).await else {
        panic!("refused hold must answer immediately");
    };
    assert_eq!(reply.code(), code::PERMISSION);
    assert!(t.relay.relayed().is_empty());

    let job = t.job("15.srv").await;
    assert_eq!(job.hold, HoldTypes::NONE);
    assert_eq!(job.substate, JobSubstate::Running);
}

#[tokio::test]
async fn test_checkpoint_refused_for_queued_job() {
    let t = TestController::new();
    t.add(Job::new("12.srv", "alice@login").with_checkpoint("enabled")).await;

    let outcome = t
        .controller
        .checkpoint_job(BatchRequest::checkpoint("12.srv", "alice", "login"))
        .await;
    let Outcome::Completed(reply) = outcome else {
        panic!("queued job cannot checkpoint");
    };
    assert_eq!(reply.code(), code::INVALID_REQUEST);
    assert!(t.relay.relayed().is_empty());
}
