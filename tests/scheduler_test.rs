//! Scheduler behaviour against a scripted extractor
//!
//! Every test ends with a clean shutdown and checks that the scheduler task
//! exited without an invariant violation.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use ytdl::extractor::ExtractionErrorKind;
use ytdl::queue::{JobRequest, JobStatus, QueueEvent};
use ytdl::scheduler::{ConcurrencyLimit, RetryPolicy, Scheduler, SchedulerConfig, SchedulerHandle};
use ytdl::utils::error::{ValidationError, YtdlError};

type SchedulerTask = JoinHandle<ytdl::utils::error::Result<()>>;

fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff: Duration::from_millis(1),
        stall_timeout: Duration::from_secs(5),
    }
}

fn spawn_with(mock: &Arc<MockExtractor>, limit: usize, retry: RetryPolicy) -> (SchedulerHandle, SchedulerTask) {
    let config = SchedulerConfig {
        limit: ConcurrencyLimit::new(limit).unwrap(),
        retry,
        auto_convert: None,
    };
    Scheduler::spawn(config, mock.clone(), None)
}

fn spawn(mock: &Arc<MockExtractor>, limit: usize) -> (SchedulerHandle, SchedulerTask) {
    spawn_with(mock, limit, test_policy())
}

async fn finish(handle: SchedulerHandle, task: SchedulerTask) {
    handle.shutdown().await.unwrap();
    task.await
        .expect("scheduler task panicked")
        .expect("scheduler reported an invariant violation");
}

#[tokio::test]
async fn test_limit_two_runs_first_two_jobs() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 2);

    let mut ids = Vec::new();
    for n in 1..=4 {
        ids.push(handle.enqueue(request(n, dir.path())).await.unwrap());
    }

    let status = |i: usize| {
        let handle = handle.clone();
        let id = ids[i];
        async move { handle.get(id).await.unwrap().status }
    };
    assert_eq!(status(0).await, JobStatus::Running);
    assert_eq!(status(1).await, JobStatus::Running);
    assert_eq!(status(2).await, JobStatus::Queued);
    assert_eq!(status(3).await, JobStatus::Queued);

    control_for(&mock, &url(1)).await.succeed();
    wait_for_status(&handle, ids[0], JobStatus::Completed).await;

    assert_eq!(status(1).await, JobStatus::Running);
    assert_eq!(status(2).await, JobStatus::Running);
    assert_eq!(status(3).await, JobStatus::Queued);

    wait_for_starts(&mock, 3).await;
    assert_eq!(mock.starts(), vec![url(1), url(2), url(3)]);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_running_count_never_exceeds_limit() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 3);

    let requests = (1..=8).map(|n| request(n, dir.path())).collect();
    let ids: Vec<_> = handle
        .enqueue_many(requests)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    for n in 1..=8 {
        let control = control_for(&mock, &url(n)).await;
        let stats = handle.stats().await.unwrap();
        assert!(stats.running <= 3, "running {} over limit", stats.running);
        assert!(mock.active() <= 3);
        control.progress(0.5);
        control.succeed();
    }

    let stats = handle.wait_until_idle().await.unwrap();
    assert_eq!(stats.completed, 8);
    assert!(mock.peak() <= 3);
    for id in ids {
        let job = handle.get(id).await.unwrap();
        assert_eq!(job.progress, 1.0);
        assert!(job.output_path.is_some());
    }
    finish(handle, task).await;
}

#[tokio::test]
async fn test_jobs_start_in_submission_order() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    for n in 1..=5 {
        mock.script(&url(n), [Script::Succeed(vec![0.5])]);
    }
    let (handle, task) = spawn(&mock, 1);

    for n in 1..=5 {
        handle.enqueue(request(n, dir.path())).await.unwrap();
    }
    handle.wait_until_idle().await.unwrap();

    assert_eq!(mock.starts(), (1..=5).map(url).collect::<Vec<_>>());
    let order: Vec<String> = handle
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.request.url)
        .collect();
    assert_eq!(order, (1..=5).map(url).collect::<Vec<_>>());
    finish(handle, task).await;
}

#[tokio::test]
async fn test_cancel_queued_job_never_calls_extractor() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 1);

    let first = handle.enqueue(request(1, dir.path())).await.unwrap();
    let second = handle.enqueue(request(2, dir.path())).await.unwrap();

    handle.cancel(second).await.unwrap();
    let job = handle.get(second).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.finished_at.is_some());

    control_for(&mock, &url(1)).await.succeed();
    wait_for_status(&handle, first, JobStatus::Completed).await;
    handle.wait_until_idle().await.unwrap();

    assert_eq!(mock.start_count(&url(2)), 0);
    assert_eq!(mock.cancels(), 0);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_cancel_running_job_frees_slot() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 1);

    let first = handle.enqueue(request(1, dir.path())).await.unwrap();
    let second = handle.enqueue(request(2, dir.path())).await.unwrap();
    control_for(&mock, &url(1)).await.progress(0.3);
    assert_eq!(handle.get(second).await.unwrap().status, JobStatus::Queued);

    handle.cancel(first).await.unwrap();
    let job = wait_for_status(&handle, first, JobStatus::Cancelled).await;
    assert!(job.progress <= 0.3);
    assert_eq!(mock.cancels(), 1);

    assert_eq!(handle.get(second).await.unwrap().status, JobStatus::Running);
    control_for(&mock, &url(2)).await.succeed();
    wait_for_status(&handle, second, JobStatus::Completed).await;

    // Cancelling a finished job changes nothing
    handle.cancel(first).await.unwrap();
    handle.cancel(second).await.unwrap();
    assert_eq!(handle.get(first).await.unwrap().status, JobStatus::Cancelled);
    assert_eq!(handle.get(second).await.unwrap().status, JobStatus::Completed);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_retry_budget_exhausted_keeps_last_error() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    mock.script(
        &url(1),
        [
            Script::Fail(ExtractionErrorKind::NetworkTimeout),
            Script::Fail(ExtractionErrorKind::RateLimited),
            Script::Fail(ExtractionErrorKind::TemporarilyUnavailable),
        ],
    );
    let (handle, task) = spawn(&mock, 2);
    let mut events = handle.subscribe();

    let id = handle.enqueue(request(1, dir.path())).await.unwrap();
    let job = wait_for_status(&handle, id, JobStatus::Failed).await;

    assert_eq!(mock.start_count(&url(1)), 3);
    assert_eq!(job.attempt, 3);
    assert!(!job.retrying);
    let error = job.error.expect("failed job carries its error");
    assert_eq!(error.kind, ExtractionErrorKind::TemporarilyUnavailable);
    assert!(job.output_path.is_none());

    let mut retries = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::JobRetrying { attempt, .. } = event {
            retries.push(attempt);
        }
    }
    assert_eq!(retries, vec![2, 3]);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    mock.script(
        &url(1),
        [
            Script::Fail(ExtractionErrorKind::NetworkTimeout),
            Script::Succeed(vec![0.4, 0.9]),
        ],
    );
    let (handle, task) = spawn(&mock, 1);

    let id = handle.enqueue(request(1, dir.path())).await.unwrap();
    let job = wait_for_status(&handle, id, JobStatus::Completed).await;
    assert_eq!(job.attempt, 2);
    assert!(job.error.is_none());
    assert!(job.output_path.unwrap().exists());
    finish(handle, task).await;
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    mock.script(&url(1), [Script::Fail(ExtractionErrorKind::UnsupportedPlatform)]);
    mock.script(&url(2), [Script::Succeed(vec![])]);
    let (handle, task) = spawn(&mock, 1);

    let bad = handle.enqueue(request(1, dir.path())).await.unwrap();
    let good = handle.enqueue(request(2, dir.path())).await.unwrap();

    let job = wait_for_status(&handle, bad, JobStatus::Failed).await;
    assert_eq!(job.attempt, 1);
    assert_eq!(mock.start_count(&url(1)), 1);
    wait_for_status(&handle, good, JobStatus::Completed).await;
    finish(handle, task).await;
}

#[tokio::test]
async fn test_stall_is_retried_then_fails() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let policy = RetryPolicy {
        max_retries: 1,
        backoff: Duration::from_millis(1),
        stall_timeout: Duration::from_millis(50),
    };
    let (handle, task) = spawn_with(&mock, 1, policy);

    let id = handle.enqueue(request(1, dir.path())).await.unwrap();
    let job = wait_for_status(&handle, id, JobStatus::Failed).await;

    assert_eq!(job.error.unwrap().kind, ExtractionErrorKind::Stalled);
    assert_eq!(mock.start_count(&url(1)), 2);
    assert_eq!(mock.cancels(), 2, "stalled attempts must be torn down");
    finish(handle, task).await;
}

#[tokio::test]
async fn test_clear_completed_keeps_active_jobs_in_order() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    mock.script(&url(1), [Script::Succeed(vec![])]);
    mock.script(&url(2), [Script::Fail(ExtractionErrorKind::ContentUnavailable)]);
    let (handle, task) = spawn(&mock, 1);

    let j1 = handle.enqueue(request(1, dir.path())).await.unwrap();
    let j2 = handle.enqueue(request(2, dir.path())).await.unwrap();
    wait_for_status(&handle, j2, JobStatus::Failed).await;

    let j3 = handle.enqueue(request(3, dir.path())).await.unwrap();
    let j4 = handle.enqueue(request(4, dir.path())).await.unwrap();
    let j5 = handle.enqueue(request(5, dir.path())).await.unwrap();
    let j6 = handle.enqueue(request(6, dir.path())).await.unwrap();
    handle.cancel(j5).await.unwrap();
    assert_eq!(handle.get(j3).await.unwrap().status, JobStatus::Running);

    let removed = handle.clear_completed().await.unwrap();
    assert_eq!(removed, vec![j1, j2, j5]);

    let remaining: Vec<_> = handle.list().await.unwrap().into_iter().map(|j| j.id).collect();
    assert_eq!(remaining, vec![j3, j4, j6]);
    assert_eq!(handle.get(j3).await.unwrap().status, JobStatus::Running);
    assert!(matches!(
        handle.get(j1).await,
        Err(YtdlError::JobNotFound(id)) if id == j1
    ));
    finish(handle, task).await;
}

#[tokio::test]
async fn test_empty_url_is_rejected_without_creating_a_job() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 2);

    handle.enqueue(request(1, dir.path())).await.unwrap();
    let before = handle.list().await.unwrap().len();

    let err = handle
        .enqueue(JobRequest::video("", dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, YtdlError::Validation(ValidationError::EmptyUrl)));

    let err = handle
        .enqueue(JobRequest::video("ftp://example.com/file", dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        YtdlError::Validation(ValidationError::InvalidUrl { .. })
    ));

    assert_eq!(handle.list().await.unwrap().len(), before);
    wait_for_starts(&mock, 1).await;
    assert_eq!(mock.starts(), vec![url(1)]);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_enqueue_many_validates_each_request() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 1);

    let results = handle
        .enqueue_many(vec![
            request(1, dir.path()),
            JobRequest::video("   ", dir.path()),
            request(2, dir.path()),
        ])
        .await
        .unwrap();

    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
    assert_eq!(handle.stats().await.unwrap().total(), 2);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_raising_limit_starts_queued_jobs_at_once() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 2);

    let mut ids = Vec::new();
    for n in 1..=4 {
        ids.push(handle.enqueue(request(n, dir.path())).await.unwrap());
    }
    assert_eq!(handle.get(ids[2]).await.unwrap().status, JobStatus::Queued);
    assert_eq!(handle.get(ids[3]).await.unwrap().status, JobStatus::Queued);

    handle.set_concurrency_limit(4).await.unwrap();
    for id in &ids {
        assert_eq!(handle.get(*id).await.unwrap().status, JobStatus::Running);
    }
    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.running, 4);
    assert_eq!(stats.concurrency_limit, 4);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_lowering_limit_lets_running_jobs_finish() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 3);

    let mut ids = Vec::new();
    for n in 1..=4 {
        ids.push(handle.enqueue(request(n, dir.path())).await.unwrap());
    }
    handle.set_concurrency_limit(1).await.unwrap();
    assert_eq!(handle.stats().await.unwrap().running, 3);

    control_for(&mock, &url(1)).await.succeed();
    wait_for_status(&handle, ids[0], JobStatus::Completed).await;
    assert_eq!(handle.get(ids[3]).await.unwrap().status, JobStatus::Queued);

    control_for(&mock, &url(2)).await.succeed();
    wait_for_status(&handle, ids[1], JobStatus::Completed).await;
    assert_eq!(handle.get(ids[3]).await.unwrap().status, JobStatus::Queued);

    control_for(&mock, &url(3)).await.succeed();
    wait_for_status(&handle, ids[2], JobStatus::Completed).await;
    assert_eq!(handle.get(ids[3]).await.unwrap().status, JobStatus::Running);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_limit_out_of_range_is_rejected() {
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 2);

    assert!(matches!(
        handle.set_concurrency_limit(0).await,
        Err(YtdlError::InvalidConcurrencyLimit(0))
    ));
    assert!(matches!(
        handle.set_concurrency_limit(6).await,
        Err(YtdlError::InvalidConcurrencyLimit(6))
    ));
    assert_eq!(handle.stats().await.unwrap().concurrency_limit, 2);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_progress_is_monotonic_and_published() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 1);
    let mut events = handle.subscribe();

    let id = handle.enqueue(request(1, dir.path())).await.unwrap();
    let control = control_for(&mock, &url(1)).await;
    for f in [0.2, 0.5, 0.3, 0.7] {
        control.progress(f);
    }
    wait_for("progress to reach 0.7", || {
        let handle = handle.clone();
        async move { handle.get(id).await.unwrap().progress == 0.7 }
    })
    .await;
    control.succeed();
    wait_for_status(&handle, id, JobStatus::Completed).await;

    let mut kinds = Vec::new();
    let mut fractions = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            QueueEvent::JobQueued { .. } => kinds.push("queued"),
            QueueEvent::JobStarted { .. } => kinds.push("started"),
            QueueEvent::JobProgress { fraction, .. } => fractions.push(fraction),
            QueueEvent::JobCompleted { .. } => kinds.push("completed"),
            _ => {}
        }
    }
    assert_eq!(kinds, vec!["queued", "started", "completed"]);
    // The late 0.3 sample refreshes the rate but cannot move progress back
    assert_eq!(fractions, vec![0.2, 0.5, 0.5, 0.7]);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_pause_holds_dispatch_until_resume() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 2);

    handle.pause().await.unwrap();
    let a = handle.enqueue(request(1, dir.path())).await.unwrap();
    let b = handle.enqueue(request(2, dir.path())).await.unwrap();
    let stats = handle.stats().await.unwrap();
    assert!(stats.paused);
    assert_eq!(stats.queued, 2);
    assert!(mock.starts().is_empty());

    handle.resume().await.unwrap();
    assert_eq!(handle.get(a).await.unwrap().status, JobStatus::Running);
    assert_eq!(handle.get(b).await.unwrap().status, JobStatus::Running);
    finish(handle, task).await;
}

#[tokio::test]
async fn test_cancel_all_and_shutdown_wait_for_teardown() {
    let dir = TempDir::new().unwrap();
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 2);

    for n in 1..=5 {
        handle.enqueue(request(n, dir.path())).await.unwrap();
    }
    wait_for_starts(&mock, 2).await;

    assert_eq!(handle.cancel_all().await.unwrap(), 5);
    let stats = handle.wait_until_idle().await.unwrap();
    assert_eq!(stats.cancelled, 5);
    assert_eq!(mock.cancels(), 2);
    assert_eq!(mock.starts().len(), 2);

    handle.enqueue(request(6, dir.path())).await.unwrap();
    wait_for_starts(&mock, 3).await;
    let other = handle.clone();
    finish(handle, task).await;

    assert_eq!(mock.active(), 0, "shutdown returns after extractors stop");
    assert_eq!(mock.cancels(), 3);
    assert!(matches!(
        other.stats().await,
        Err(YtdlError::SchedulerUnavailable)
    ));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let mock = MockExtractor::new();
    let (handle, task) = spawn(&mock, 1);
    let ghost = ytdl::queue::JobId::new();
    assert!(matches!(handle.get(ghost).await, Err(YtdlError::JobNotFound(_))));
    assert!(matches!(handle.cancel(ghost).await, Err(YtdlError::JobNotFound(_))));
    finish(handle, task).await;
}
