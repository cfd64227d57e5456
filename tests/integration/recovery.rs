//! Failure handling: timeouts, cancellation, capacity exhaustion, and
//! durable store behavior across restarts.

use std::time::Duration;

use hive::core::task::{FailureReason, TaskStatus};
use hive::orchestration::{SessionStatus, Strategy};
use hive::registry::WorkerType;
use hive::store::TaskStore;

use crate::fixtures::{fenced_plan, Harness, ScriptedExecutor, StubCompletion};

const CHAIN: &str = r#"[
    {"id": "a", "description": "long setup", "worker": "backend", "dependencies": []},
    {"id": "b", "description": "follow-up work", "worker": "backend", "dependencies": ["a"]}
]"#;

#[tokio::test]
async fn timeout_poisons_dependents_and_releases_the_worker() {
    let executor = ScriptedExecutor::slow(Duration::from_secs(60));
    let harness = Harness::standard(&fenced_plan(CHAIN), executor.clone())
        .with_task_timeout(Duration::from_millis(50));

    let session = harness
        .scheduler
        .run("slow job", Strategy::Sequential)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::PartialFailure);
    assert_eq!(session.tasks[0].status, TaskStatus::TimedOut);
    assert_eq!(
        session.tasks[1].status,
        TaskStatus::Failed {
            reason: FailureReason::UpstreamFailure
        }
    );
    assert_eq!(harness.total_load(), 0);

    // The durable record agrees with the graph.
    let records = harness.store.list().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TaskStatus::TimedOut);
}

#[tokio::test]
async fn cancellation_leaves_no_task_running() {
    let executor = ScriptedExecutor::slow(Duration::from_secs(60));
    let harness = Harness::standard(&fenced_plan(CHAIN), executor.clone());

    let token = harness.scheduler.shutdown_token();
    let (session, _) = tokio::join!(
        harness.scheduler.run("slow job", Strategy::Sequential),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        }
    );

    let session = session.unwrap();
    assert_eq!(session.status, SessionStatus::PartialFailure);
    for task in &session.tasks {
        assert!(
            task.status.is_terminal(),
            "task left in non-terminal state {}",
            task.status
        );
    }
    // The in-flight task was marked cancelled, the untouched one never ran.
    assert_eq!(
        session.tasks[0].status,
        TaskStatus::Failed {
            reason: FailureReason::Cancelled
        }
    );
    assert_eq!(executor.executed().len(), 1);

    for record in harness.store.list().unwrap() {
        assert!(record.status.is_terminal());
    }
}

#[tokio::test]
async fn queued_task_waits_for_a_release_instead_of_failing() {
    let plan = fenced_plan(
        r#"[
            {"id": "t1", "description": "first slice", "worker": "backend", "dependencies": []},
            {"id": "t2", "description": "second slice", "worker": "backend", "dependencies": []}
        ]"#,
    );
    let executor = ScriptedExecutor::slow(Duration::from_millis(50));
    let harness = Harness::new(
        StubCompletion::responding(&plan),
        executor,
        &[(WorkerType::Backend, 1)],
    )
    .with_max_requeues(0);

    // The queued slice waits for the running one to release the worker;
    // waiting for an eventual release never burns the requeue budget.
    let session = harness
        .scheduler
        .run("two slices", Strategy::Parallel)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    for task in &session.tasks {
        assert_eq!(task.status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn requeue_budget_exhaustion_fails_with_no_capacity() {
    let plan = fenced_plan(
        r#"[
            {"id": "t1", "description": "verify the build", "worker": "tester", "dependencies": []},
            {"id": "t2", "description": "wait in vain", "worker": "backend", "dependencies": []}
        ]"#,
    );
    let executor = ScriptedExecutor::slow(Duration::from_millis(20));
    let harness = Harness::new(
        StubCompletion::responding(&plan),
        executor,
        &[(WorkerType::Backend, 1), (WorkerType::Tester, 1)],
    )
    .with_max_requeues(0);

    // Simulate a concurrent session holding the only backend worker: every
    // release that frees capacity elsewhere counts against the budget.
    let held = harness.registry.acquire(&WorkerType::Backend).unwrap();

    let session = harness
        .scheduler
        .run("contended work", Strategy::Parallel)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::PartialFailure);
    assert_eq!(session.tasks[0].status, TaskStatus::Completed);
    assert_eq!(
        session.tasks[1].status,
        TaskStatus::Failed {
            reason: FailureReason::NoCapacity
        }
    );
    harness.registry.release(&held);
}

#[tokio::test]
async fn records_survive_a_store_reopen() {
    let executor = ScriptedExecutor::instant();
    let harness = Harness::standard(&fenced_plan(CHAIN), executor);

    let session = harness
        .scheduler
        .run("durable job", Strategy::Sequential)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // A new process opening the same directory sees the finished records.
    let reopened = TaskStore::open(&harness.store_path).unwrap();
    let records = reopened.list().unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.completed_at.is_some());
        assert!(record.output_payload.is_some());
    }
}

#[tokio::test]
async fn dispatched_tasks_always_record_their_worker() {
    let executor = ScriptedExecutor::instant();
    let harness = Harness::standard(&fenced_plan(CHAIN), executor);

    harness
        .scheduler
        .run("traceable job", Strategy::Sequential)
        .await
        .unwrap();

    for record in harness.store.list().unwrap() {
        assert!(record.assigned_worker.is_some());
        assert_eq!(record.worker_type, Some(WorkerType::Backend));
        assert!(record.input_payload["description"].is_string());
    }
}
