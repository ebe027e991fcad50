mod common;

use std::time::Duration;

use broker_core::config::BrokerConfig;
use broker_core::models::{DeferredJob, TaskOutcome, TaskState};
use broker_core::traits::BrokerMetric;
use broker_core::BrokerError;
use broker_dispatcher::{DeadlineOutcome, ResultSubmission};
use broker_testing_utils::{RecordingWebhookNotifier, TaskConfigBuilder};
use chrono::Utc;
use common::{report, Harness};

#[tokio::test]
async fn test_timeout_then_late_report_is_rejected() {
    let h = Harness::new().await;
    let task = h
        .schedule_with(
            "flaky",
            TaskConfigBuilder::new().requires("linux"),
            Some(2),
        )
        .await;

    let first = h.assign("w1", &["linux"]).await.unwrap();
    assert_eq!(first.task.attempts, 1);

    let outcome = h.broker.supervisor.check_deadline(task.id, 1).await.unwrap();
    assert_eq!(outcome, DeadlineOutcome::Requeued);
    let requeued = h.broker.tasks.get(task.id).await.unwrap();
    assert_eq!(requeued.state, TaskState::Scheduled);
    assert_eq!(requeued.attempts, 1);
    assert_eq!(requeued.assigned_worker.as_deref(), Some("w1"));

    let second = h.assign("w2", &["linux"]).await.unwrap();
    assert_eq!(second.task.attempts, 2);

    // w1 finally reports its first attempt
    let late = h.broker.results.report_result(task.id, report(1, 0)).await;
    assert!(matches!(
        late,
        Err(BrokerError::StaleAttempt {
            reported: 1,
            current: 2,
            ..
        })
    ));
    assert_eq!(h.metrics.count(&BrokerMetric::StaleReport), 1);

    let completed = h
        .broker
        .results
        .report_result(task.id, report(2, 0))
        .await
        .unwrap();
    assert_eq!(completed.state, TaskState::Complete);
    assert_eq!(completed.outcome, Some(TaskOutcome::Success));

    // the second attempt's deadline fires after completion and does nothing
    let outcome = h.broker.supervisor.check_deadline(task.id, 2).await.unwrap();
    assert_eq!(outcome, DeadlineOutcome::Stale);
}

#[tokio::test]
async fn test_deadline_check_is_idempotent() {
    let h = Harness::new().await;
    let task = h.schedule("build", "linux").await;
    h.assign("w1", &["linux"]).await.unwrap();

    let first = h.broker.supervisor.check_deadline(task.id, 1).await.unwrap();
    let second = h.broker.supervisor.check_deadline(task.id, 1).await.unwrap();
    assert_eq!(first, DeadlineOutcome::Requeued);
    assert_eq!(second, DeadlineOutcome::Stale);
    assert_eq!(h.metrics.count(&BrokerMetric::TaskRequeued), 1);
}

#[tokio::test]
async fn test_exhausted_attempts_are_terminal() {
    let h = Harness::new().await;
    let task = h
        .schedule_with("once", TaskConfigBuilder::new().requires("linux"), Some(1))
        .await;

    h.assign("w1", &["linux"]).await.unwrap();
    let outcome = h.broker.supervisor.check_deadline(task.id, 1).await.unwrap();
    assert_eq!(outcome, DeadlineOutcome::TimedOut);

    let timed_out = h.broker.tasks.get(task.id).await.unwrap();
    assert_eq!(timed_out.state, TaskState::Complete);
    assert_eq!(timed_out.outcome, Some(TaskOutcome::TimedOut));
    assert!(timed_out.completed_time.is_some());

    assert!(h.assign("w2", &["linux"]).await.is_none());
    assert!(matches!(
        h.broker.results.report_result(task.id, report(1, 0)).await,
        Err(BrokerError::StaleAttempt { .. })
    ));
}

#[tokio::test]
async fn test_deadline_for_deleted_task_is_stale() {
    let h = Harness::new().await;
    let task = h.schedule("build", "linux").await;
    h.assign("w1", &["linux"]).await.unwrap();
    h.broker.tasks.delete(task.id).await.unwrap();

    let outcome = h.broker.supervisor.check_deadline(task.id, 1).await.unwrap();
    assert_eq!(outcome, DeadlineOutcome::Stale);
}

#[tokio::test]
async fn test_deadline_uses_task_timeout_plus_grace() {
    let h = Harness::new().await;
    let task = h
        .schedule_with(
            "short",
            TaskConfigBuilder::new().requires("linux").with_timeout_seconds(60),
            None,
        )
        .await;
    let now = Utc::now();
    let deadline = h.broker.supervisor.deadline_for(&task, now);
    // default grace period is 180 seconds
    assert_eq!((deadline - now).num_seconds(), 240);
}

#[tokio::test]
async fn test_report_stores_output_blobs() {
    let h = Harness::new().await;
    let task = h.schedule("build", "linux").await;
    h.assign("w1", &["linux"]).await.unwrap();

    let submission = ResultSubmission {
        stdout: Some(b"hello".to_vec()),
        stderr: Some(b"oops".to_vec()),
        ..report(1, 3)
    };
    let completed = h
        .broker
        .results
        .report_result(task.id, submission)
        .await
        .unwrap();
    assert_eq!(completed.outcome, Some(TaskOutcome::Failed));

    let details = h.broker.tasks.get_details(task.id).await.unwrap();
    let result = details.result.unwrap();
    assert_eq!(result.exit_code, 3);
    let stdout_key = result.stdout_ref.unwrap();
    assert_eq!(h.broker.packages.blob(&stdout_key).await.unwrap(), b"hello");
    assert_eq!(h.blobs.len(), 2);

    // deleting the task cleans up its output
    h.broker.tasks.delete(task.id).await.unwrap();
    assert!(h.blobs.is_empty());
}

#[tokio::test]
async fn test_stale_report_writes_nothing() {
    let h = Harness::new().await;
    let task = h.schedule("build", "linux").await;
    h.assign("w1", &["linux"]).await.unwrap();

    let submission = ResultSubmission {
        stdout: Some(b"late".to_vec()),
        ..report(7, 0)
    };
    assert!(h.broker.results.report_result(task.id, submission).await.is_err());
    assert!(h.blobs.is_empty());
    assert_eq!(
        h.broker.tasks.get(task.id).await.unwrap().state,
        TaskState::Assigned
    );
}

#[tokio::test]
async fn test_report_for_unknown_task() {
    let h = Harness::new().await;
    assert!(matches!(
        h.broker.results.report_result(404, report(1, 0)).await,
        Err(BrokerError::TaskNotFound { id: 404 })
    ));
}

#[tokio::test]
async fn test_webhook_is_queued_only_after_completion() {
    let h = Harness::new().await;
    let task = h
        .schedule_with(
            "notify",
            TaskConfigBuilder::new()
                .requires("linux")
                .with_webhook("http://hooks.local/done"),
            None,
        )
        .await;
    h.assign("w1", &["linux"]).await.unwrap();
    assert!(!h
        .queue
        .pending_jobs()
        .iter()
        .any(|job| matches!(job, DeferredJob::Webhook { .. })));

    h.broker
        .results
        .report_result(task.id, report(1, 0))
        .await
        .unwrap();
    assert!(h.queue.pending_jobs().contains(&DeferredJob::Webhook {
        task_id: task.id,
        url: "http://hooks.local/done".to_string(),
    }));
}

#[tokio::test]
async fn test_webhook_enqueue_failure_keeps_completion() {
    let h = Harness::new().await;
    let task = h
        .schedule_with(
            "notify",
            TaskConfigBuilder::new()
                .requires("linux")
                .with_webhook("http://hooks.local/done"),
            None,
        )
        .await;
    h.assign("w1", &["linux"]).await.unwrap();
    h.queue.fail_enqueue(true);

    let completed = h
        .broker
        .results
        .report_result(task.id, report(1, 0))
        .await
        .unwrap();
    assert_eq!(completed.state, TaskState::Complete);
}

#[tokio::test]
async fn test_runner_processes_deadline_and_webhook_jobs() {
    let h = Harness::new().await;
    let timed = h
        .schedule_with("timed", TaskConfigBuilder::new().requires("linux"), Some(1))
        .await;
    h.assign("w1", &["linux"]).await.unwrap();

    let notified = h
        .schedule_with(
            "notified",
            TaskConfigBuilder::new()
                .requires("macos")
                .with_webhook("http://hooks.local/done"),
            None,
        )
        .await;
    h.assign("w2", &["macos"]).await.unwrap();
    h.broker
        .results
        .report_result(notified.id, report(1, 0))
        .await
        .unwrap();

    h.queue.make_all_due(Utc::now() - chrono::Duration::seconds(1));
    let stats = h.broker.runner.run_once().await.unwrap();
    // timed deadline, notified deadline (stale) and the webhook
    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.acked, 3);
    assert_eq!(h.queue.pending().len(), 0);

    let timed = h.broker.tasks.get(timed.id).await.unwrap();
    assert_eq!(timed.outcome, Some(TaskOutcome::TimedOut));
    assert_eq!(
        h.notifier.calls(),
        vec![("http://hooks.local/done".to_string(), notified.id)]
    );
    assert_eq!(h.metrics.count(&BrokerMetric::WebhookDelivered), 1);
}

#[tokio::test]
async fn test_runner_retries_failed_webhook_then_gives_up() {
    let config = BrokerConfig {
        webhook_max_deliveries: 2,
        ..Default::default()
    };
    let h = Harness::with(config, RecordingWebhookNotifier::failing(5)).await;
    let task = h
        .schedule_with(
            "notify",
            TaskConfigBuilder::new()
                .requires("linux")
                .with_webhook("http://hooks.local/down"),
            None,
        )
        .await;
    h.assign("w1", &["linux"]).await.unwrap();
    h.broker
        .results
        .report_result(task.id, report(1, 0))
        .await
        .unwrap();

    h.queue.make_all_due(Utc::now() - chrono::Duration::seconds(1));
    let first = h.broker.runner.run_once().await.unwrap();
    assert_eq!(first.rescheduled, 1);

    h.queue.make_all_due(Utc::now() - chrono::Duration::seconds(1));
    let second = h.broker.runner.run_once().await.unwrap();
    assert_eq!(second.acked, 1);

    assert_eq!(h.notifier.calls().len(), 2);
    assert_eq!(h.metrics.count(&BrokerMetric::WebhookFailed), 1);
    assert_eq!(h.queue.pending().len(), 0);
}

#[tokio::test]
async fn test_runner_loop_stops_on_shutdown() {
    let h = Harness::new().await;
    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(h.broker.runner.clone().run(rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("runner did not stop")
        .unwrap();
}
