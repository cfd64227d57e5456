//! Strategy semantics: ordering, concurrency bounds, and pool growth.

use std::time::Duration;

use hive::core::task::{FailureReason, TaskStatus};
use hive::orchestration::{SessionStatus, Strategy};
use hive::registry::WorkerType;

use crate::fixtures::{fenced_plan, Harness, ScriptedExecutor, StubCompletion};

const PIPELINE: &str = r#"[
    {"id": "schema", "description": "design the schema", "worker": "backend", "dependencies": []},
    {"id": "api", "description": "implement the API", "worker": "backend", "dependencies": ["schema"]},
    {"id": "ui", "description": "build the UI", "worker": "frontend", "dependencies": ["api"]},
    {"id": "verify", "description": "verify the flow", "worker": "tester", "dependencies": ["ui"]}
]"#;

#[tokio::test]
async fn sequential_runs_in_dependency_order() {
    let executor = ScriptedExecutor::instant();
    let harness = Harness::standard(&fenced_plan(PIPELINE), executor.clone());

    let session = harness
        .scheduler
        .run("ship the feature", Strategy::Sequential)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(
        executor.executed(),
        vec![
            "design the schema",
            "implement the API",
            "build the UI",
            "verify the flow"
        ]
    );
    // Sequential never overlaps executions.
    assert_eq!(executor.peak_concurrency(), 1);
}

#[tokio::test]
async fn sequential_failure_poisons_the_chain() {
    let executor = ScriptedExecutor::failing_on("schema");
    let harness = Harness::standard(&fenced_plan(PIPELINE), executor.clone());

    let session = harness
        .scheduler
        .run("ship the feature", Strategy::Sequential)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::PartialFailure);
    assert!(matches!(
        session.tasks[0].status,
        TaskStatus::Failed {
            reason: FailureReason::Execution { .. }
        }
    ));
    for downstream in &session.tasks[1..] {
        assert_eq!(
            downstream.status,
            TaskStatus::Failed {
                reason: FailureReason::UpstreamFailure
            }
        );
    }
    // Nothing past the failure was ever handed to a worker.
    assert_eq!(executor.executed(), vec!["design the schema"]);
    assert_eq!(harness.store.list().unwrap().len(), 1);
}

#[tokio::test]
async fn parallel_is_bounded_by_pool_capacity() {
    let plan = fenced_plan(
        r#"[
            {"id": "t1", "description": "chunk one", "worker": "backend", "dependencies": []},
            {"id": "t2", "description": "chunk two", "worker": "backend", "dependencies": []},
            {"id": "t3", "description": "chunk three", "worker": "backend", "dependencies": []},
            {"id": "t4", "description": "chunk four", "worker": "backend", "dependencies": []}
        ]"#,
    );
    let executor = ScriptedExecutor::slow(Duration::from_millis(30));
    let harness = Harness::new(
        StubCompletion::responding(&plan),
        executor.clone(),
        &[(WorkerType::Backend, 1), (WorkerType::Backend, 1)],
    );

    let session = harness
        .scheduler
        .run("split the work", Strategy::Parallel)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    // Two backend workers of capacity 1: overlap happens, but never exceeds 2.
    assert!(executor.peak_concurrency() >= 2);
    assert!(executor.peak_concurrency() <= 2);
}

#[tokio::test]
async fn parallel_honors_dependencies_across_workers() {
    let plan = fenced_plan(
        r#"[
            {"id": "api", "description": "build the API", "worker": "backend", "dependencies": []},
            {"id": "ui", "description": "build the UI", "worker": "frontend", "dependencies": []},
            {"id": "verify", "description": "verify both", "worker": "tester", "dependencies": ["api", "ui"]}
        ]"#,
    );
    let executor = ScriptedExecutor::slow(Duration::from_millis(20));
    let harness = Harness::standard(&plan, executor.clone());

    let session = harness
        .scheduler
        .run("build and verify", Strategy::Parallel)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    let order = executor.executed();
    assert_eq!(order.len(), 3);
    assert_eq!(order[2], "verify both");
}

#[tokio::test]
async fn swarm_grows_the_pool_to_demand() {
    let plan = fenced_plan(
        r#"[
            {"id": "t1", "description": "shard one", "worker": "backend", "dependencies": []},
            {"id": "t2", "description": "shard two", "worker": "backend", "dependencies": []},
            {"id": "t3", "description": "shard three", "worker": "backend", "dependencies": []},
            {"id": "t4", "description": "shard four", "worker": "backend", "dependencies": []},
            {"id": "t5", "description": "shard five", "worker": "backend", "dependencies": []},
            {"id": "t6", "description": "shard six", "worker": "backend", "dependencies": []}
        ]"#,
    );
    let executor = ScriptedExecutor::slow(Duration::from_millis(20));
    let harness = Harness::standard(&plan, executor.clone());

    let session = harness
        .scheduler
        .run("fan out", Strategy::Swarm)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    // Demand is 6 but the spawn cap adds at most 3 to the static worker.
    assert_eq!(harness.registry.spawned_count(&WorkerType::Backend), 3);
    assert_eq!(harness.registry.count_of_type(&WorkerType::Backend), 4);
    assert!(executor.peak_concurrency() >= 2);
    assert!(executor.peak_concurrency() <= 4);
}

#[tokio::test]
async fn swarm_reuses_spawned_workers_across_levels() {
    let plan = fenced_plan(
        r#"[
            {"id": "a1", "description": "first wave one", "worker": "tester", "dependencies": []},
            {"id": "a2", "description": "first wave two", "worker": "tester", "dependencies": []},
            {"id": "b1", "description": "second wave one", "worker": "tester", "dependencies": ["a1"]},
            {"id": "b2", "description": "second wave two", "worker": "tester", "dependencies": ["a2"]}
        ]"#,
    );
    let executor = ScriptedExecutor::slow(Duration::from_millis(10));
    let harness = Harness::standard(&plan, executor.clone());

    let session = harness
        .scheduler
        .run("two waves", Strategy::Swarm)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    // Peak demand per level is 2, so only one extra tester is spawned.
    assert_eq!(harness.registry.spawned_count(&WorkerType::Tester), 1);
}

#[tokio::test]
async fn offline_completion_falls_back_to_single_task() {
    let executor = ScriptedExecutor::instant();
    let harness = Harness::new(
        StubCompletion::unavailable(),
        executor.clone(),
        &[(WorkerType::Backend, 1)],
    );

    let session = harness
        .scheduler
        .run("do the whole thing", Strategy::Sequential)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.tasks.len(), 1);
    assert_eq!(executor.executed(), vec!["do the whole thing"]);
}

#[tokio::test]
async fn session_summary_serializes_to_json() {
    let executor = ScriptedExecutor::instant();
    let harness = Harness::standard(&fenced_plan(PIPELINE), executor);

    let session = harness
        .scheduler
        .run("ship the feature", Strategy::Sequential)
        .await
        .unwrap();

    let json = serde_json::to_value(&session).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["strategy"], "sequential");
    assert_eq!(json["tasks"].as_array().unwrap().len(), 4);
    assert_eq!(json["tasks"][0]["status"]["state"], "completed");
}
