use std::collections::HashSet;
use std::time::Duration;

use broker_core::config::DatabaseConfig;
use broker_core::models::{
    DeferredJob, NewTask, NewTaskResult, NewWorkerEvent, PackageFile, PackageFileSource,
    TaskConfig, TaskOutcome, TaskState, WorkerEventType,
};
use broker_core::traits::DeferredQueue;
use broker_core::BrokerError;
use broker_infrastructure::DatabaseManager;
use chrono::Utc;

async fn setup() -> (tempfile::TempDir, DatabaseManager) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}/broker.db", dir.path().display()),
        max_connections: 8,
        ..Default::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    (dir, manager)
}

fn new_task(name: &str, requirements: &[&str], priority: i32) -> NewTask {
    NewTask::new(
        name,
        TaskConfig {
            executor_requirements: requirements.iter().map(|s| s.to_string()).collect(),
            priority,
            ..Default::default()
        },
    )
}

fn result_with_exit(exit_code: i32) -> NewTaskResult {
    NewTaskResult {
        exit_code,
        execution_time_ms: Some(1200),
        stdout_ref: Some("stdout-key".to_string()),
        stderr_ref: None,
        device_serial_number: Some("R58M123".to_string()),
        result_metadata: Default::default(),
        worker_log: Some("ok".to_string()),
    }
}

#[tokio::test]
async fn test_create_and_get_task() {
    let (_dir, db) = setup().await;
    let repo = db.task_repository();

    let created = repo
        .create(&new_task("build", &["macos", "xcode", "macos"], 0))
        .await
        .unwrap();
    assert_eq!(created.state, TaskState::Scheduled);
    assert_eq!(created.attempts, 0);
    assert_eq!(created.max_attempts, 3);
    assert!(created.outcome.is_none());

    let fetched = repo.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched, created);
    assert!(repo.get_by_id(created.id + 100).await.unwrap().is_none());
}

#[tokio::test]
async fn test_peek_orders_by_priority_then_age() {
    let (_dir, db) = setup().await;
    let repo = db.task_repository();

    let first = repo.create(&new_task("first", &["linux"], 0)).await.unwrap();
    let _second = repo.create(&new_task("second", &["linux"], 0)).await.unwrap();
    let urgent = repo.create(&new_task("urgent", &["linux"], 10)).await.unwrap();

    assert_eq!(repo.peek_oldest("linux").await.unwrap().unwrap().id, urgent.id);
    repo.try_claim(urgent.id, 0, "w", Utc::now()).await.unwrap().unwrap();
    assert_eq!(repo.peek_oldest("linux").await.unwrap().unwrap().id, first.id);
    assert!(repo.peek_oldest("windows").await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_is_compare_and_swap() {
    let (_dir, db) = setup().await;
    let repo = db.task_repository();
    let task = repo.create(&new_task("t", &["android"], 0)).await.unwrap();

    let claimed = repo
        .try_claim(task.id, 0, "worker-a", Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.state, TaskState::Assigned);
    assert_eq!(claimed.attempts, 1);
    assert_eq!(claimed.assigned_worker.as_deref(), Some("worker-a"));

    // 过期的attempts值不能再次领取
    assert!(repo
        .try_claim(task.id, 0, "worker-b", Utc::now())
        .await
        .unwrap()
        .is_none());
    // 已分配的任务不能领取
    assert!(repo
        .try_claim(task.id, 1, "worker-b", Utc::now())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_concurrent_claims_have_single_winner() {
    let (_dir, db) = setup().await;
    let repo = db.task_repository();
    let task = repo.create(&new_task("contended", &["gpu"], 0)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let repo = db.task_repository();
        let id = task.id;
        handles.push(tokio::spawn(async move {
            repo.try_claim(id, 0, &format!("worker-{i}"), Utc::now())
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(repo.get_by_id(task.id).await.unwrap().unwrap().attempts, 1);
}

#[tokio::test]
async fn test_requeue_and_time_out_guarded_by_attempt() {
    let (_dir, db) = setup().await;
    let repo = db.task_repository();
    let task = repo
        .create(&new_task("t", &["ios"], 0).with_max_attempts(2))
        .await
        .unwrap();

    repo.try_claim(task.id, 0, "w1", Utc::now()).await.unwrap().unwrap();
    assert!(!repo.requeue(task.id, 0).await.unwrap());
    assert!(repo.requeue(task.id, 1).await.unwrap());
    assert!(!repo.requeue(task.id, 1).await.unwrap());

    let requeued = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(requeued.state, TaskState::Scheduled);
    assert_eq!(requeued.assigned_worker.as_deref(), Some("w1"));

    repo.try_claim(task.id, 1, "w2", Utc::now()).await.unwrap().unwrap();
    // 最后一次尝试不能再放回队列
    assert!(!repo.requeue(task.id, 2).await.unwrap());
    assert!(repo.mark_timed_out(task.id, 2, Utc::now()).await.unwrap());
    assert!(!repo.mark_timed_out(task.id, 2, Utc::now()).await.unwrap());

    let timed_out = repo.get_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(timed_out.state, TaskState::Complete);
    assert_eq!(timed_out.outcome, Some(TaskOutcome::TimedOut));
    assert!(timed_out.result_id.is_none());
    assert!(repo.get_result(task.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_complete_with_result() {
    let (_dir, db) = setup().await;
    let repo = db.task_repository();
    let task = repo.create(&new_task("t", &["linux"], 0)).await.unwrap();
    repo.try_claim(task.id, 0, "w", Utc::now()).await.unwrap().unwrap();

    let completed = repo
        .complete_with_result(task.id, 1, &result_with_exit(3), Utc::now())
        .await
        .unwrap();
    assert_eq!(completed.state, TaskState::Complete);
    assert_eq!(completed.outcome, Some(TaskOutcome::Failed));
    assert!(completed.completed_time.is_some());

    let result = repo.get_result(task.id).await.unwrap().unwrap();
    assert_eq!(Some(result.id), completed.result_id);
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.stdout_ref.as_deref(), Some("stdout-key"));
    assert_eq!(result.device_serial_number.as_deref(), Some("R58M123"));
}

#[tokio::test]
async fn test_stale_report_does_not_mutate() {
    let (_dir, db) = setup().await;
    let repo = db.task_repository();
    let task = repo.create(&new_task("t", &["linux"], 0)).await.unwrap();
    repo.try_claim(task.id, 0, "w1", Utc::now()).await.unwrap().unwrap();
    repo.requeue(task.id, 1).await.unwrap();
    repo.try_claim(task.id, 1, "w2", Utc::now()).await.unwrap().unwrap();
    let before = repo.get_by_id(task.id).await.unwrap().unwrap();

    let err = repo
        .complete_with_result(task.id, 1, &result_with_exit(0), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::StaleAttempt {
            reported: 1,
            current: 2,
            ..
        }
    ));
    assert_eq!(repo.get_by_id(task.id).await.unwrap().unwrap(), before);
    assert!(repo.get_result(task.id).await.unwrap().is_none());

    let missing = repo
        .complete_with_result(task.id + 1, 1, &result_with_exit(0), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(missing, BrokerError::TaskNotFound { .. }));
}

#[tokio::test]
async fn test_completed_task_rejects_second_report() {
    let (_dir, db) = setup().await;
    let repo = db.task_repository();
    let task = repo.create(&new_task("t", &["linux"], 0)).await.unwrap();
    repo.try_claim(task.id, 0, "w", Utc::now()).await.unwrap().unwrap();
    repo.complete_with_result(task.id, 1, &result_with_exit(0), Utc::now())
        .await
        .unwrap();

    let err = repo
        .complete_with_result(task.id, 1, &result_with_exit(1), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::StaleAttempt { .. }));
    assert_eq!(repo.get_result(task.id).await.unwrap().unwrap().exit_code, 0);
}

#[tokio::test]
async fn test_list_and_bulk_delete_by_executor() {
    let (_dir, db) = setup().await;
    let repo = db.task_repository();
    for i in 0..5 {
        repo.create(&new_task(&format!("a{i}"), &["android"], 0))
            .await
            .unwrap();
    }
    let other = repo.create(&new_task("mac", &["macos"], 0)).await.unwrap();

    let listed = repo
        .list_by_executor("android", TaskState::Scheduled, 3)
        .await
        .unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|t| t.requires("android")));

    assert_eq!(repo.delete_batch_by_executor("android", 2).await.unwrap(), 2);
    assert_eq!(repo.delete_batch_by_executor("android", 100).await.unwrap(), 3);
    assert_eq!(repo.delete_batch_by_executor("android", 100).await.unwrap(), 0);
    assert!(repo.get_by_id(other.id).await.unwrap().is_some());

    assert!(repo.delete(other.id).await.unwrap());
    assert!(!repo.delete(other.id).await.unwrap());
}

#[tokio::test]
async fn test_package_create_is_atomic_and_unique() {
    let (_dir, db) = setup().await;
    let repo = db.package_repository();
    let files = vec![
        PackageFile {
            destination: "bin/run.sh".to_string(),
            file_mode: "755".to_string(),
            source: PackageFileSource::Blob {
                key: "abc".to_string(),
            },
        },
        PackageFile {
            destination: "lib/tool.jar".to_string(),
            file_mode: "644".to_string(),
            source: PackageFileSource::Url {
                url: "https://example.com/tool.jar".to_string(),
            },
        },
    ];

    let created = repo.create("agent", "1.0", &files).await.unwrap();
    assert_eq!(created.files, files);

    let err = repo.create("agent", "1.0", &files[..1]).await.unwrap_err();
    assert!(matches!(err, BrokerError::DuplicatePackage { .. }));

    let fetched = repo.get("agent", "1.0").await.unwrap().unwrap();
    assert_eq!(fetched.files, files);

    repo.create("agent", "1.1", &[]).await.unwrap();
    assert_eq!(repo.list_versions("agent").await.unwrap(), vec!["1.0", "1.1"]);

    let deleted = repo.delete("agent", "1.0").await.unwrap().unwrap();
    assert_eq!(deleted.files.len(), 2);
    assert!(repo.get("agent", "1.0").await.unwrap().is_none());
    assert!(repo.delete("agent", "1.0").await.unwrap().is_none());
}

#[tokio::test]
async fn test_pause_flag_upsert() {
    let (_dir, db) = setup().await;
    let repo = db.pause_repository();

    assert!(repo.get("android").await.unwrap().is_none());

    let expiry = Utc::now() + chrono::Duration::minutes(5);
    let paused = repo.set("android", true, Some(expiry)).await.unwrap();
    assert!(paused.paused);

    let stored = repo.get("android").await.unwrap().unwrap();
    assert!(stored.paused);
    assert_eq!(
        stored.expires_at.map(|t| t.timestamp_millis()),
        Some(expiry.timestamp_millis())
    );

    let resumed = repo.set("android", false, Some(expiry)).await.unwrap();
    assert!(!resumed.paused);
    assert!(resumed.expires_at.is_none());
    assert!(!repo.get("android").await.unwrap().unwrap().paused);
}

#[tokio::test]
async fn test_worker_events_newest_first() {
    let (_dir, db) = setup().await;
    let repo = db.worker_event_repository();

    repo.append(&NewWorkerEvent::new("w1", WorkerEventType::Startup))
        .await
        .unwrap();
    repo.append(
        &NewWorkerEvent::new("w1", WorkerEventType::TaskAbandoned)
            .with_task(7)
            .with_info("stale attempt"),
    )
    .await
    .unwrap();
    repo.append(&NewWorkerEvent::new("w2", WorkerEventType::Startup))
        .await
        .unwrap();

    let events = repo.list_recent("w1", 10).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, WorkerEventType::TaskAbandoned);
    assert_eq!(events[0].task_id, Some(7));
    assert_eq!(events[1].event_type, WorkerEventType::Startup);
}

#[tokio::test]
async fn test_deferred_queue_lease_and_ack() {
    let (_dir, db) = setup().await;
    let queue = db.deferred_queue();
    let now = Utc::now();
    let lease = Duration::from_secs(60);

    let due = DeferredJob::DeadlineCheck {
        task_id: 1,
        attempt: 1,
    };
    let later = DeferredJob::Webhook {
        task_id: 2,
        url: "http://example.com/hook".to_string(),
    };
    let due_id = queue.enqueue(&due, now).await.unwrap();
    queue
        .enqueue(&later, now + chrono::Duration::minutes(10))
        .await
        .unwrap();

    let fetched = queue.fetch_due(now, 10, lease).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].id, due_id);
    assert_eq!(fetched[0].job, due);
    assert_eq!(fetched[0].deliveries, 1);

    // 租约期内不可见
    assert!(queue.fetch_due(now, 10, lease).await.unwrap().is_empty());

    // 租约过期后重新出现
    let after_lease = now + chrono::Duration::seconds(61);
    let redelivered = queue.fetch_due(after_lease, 10, lease).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].deliveries, 2);

    queue.ack(due_id).await.unwrap();
    assert_eq!(queue.pending_count().await.unwrap(), 1);

    let ids: HashSet<i64> = queue
        .fetch_due(now + chrono::Duration::minutes(20), 10, lease)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(ids.len(), 1);
}
