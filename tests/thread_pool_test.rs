//! Integration tests for ThreadPoolExecutor
//!
//! These tests validate:
//! - One worker thread per submission, never the caller's thread
//! - Unbounded and bounded admission
//! - Bounded shutdown polling and abandoning of running threads
//! - Rejection after shutdown
//! - Using the executor through the `Executor` trait object

use prometheus_task_executor::builders::build_executor;
use prometheus_task_executor::config::{BackendKind, ExecutorConfig, ThreadPoolConfig};
use prometheus_task_executor::core::OsWorker;
use prometheus_task_executor::util::init_tracing_with_default;
use prometheus_task_executor::{ExecutorError, ThreadPoolExecutor, WorkerState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn fast_polling(interval_ms: u64) -> ThreadPoolConfig {
    init_tracing_with_default("warn");
    ThreadPoolConfig::new()
        .with_max_workers(4)
        .with_poll_interval(Duration::from_millis(interval_ms))
}

/// Tracks how many tasks run at the same time.
#[derive(Clone, Default)]
struct ConcurrencyProbe {
    current: Arc<AtomicU64>,
    max_seen: Arc<AtomicU64>,
    finished: Arc<AtomicU64>,
}

impl ConcurrencyProbe {
    fn task(&self, work: Duration) -> impl FnOnce() + Send + 'static {
        let probe = self.clone();
        move || {
            let now = probe.current.fetch_add(1, Ordering::SeqCst) + 1;
            probe.max_seen.fetch_max(now, Ordering::SeqCst);
            thread::sleep(work);
            probe.current.fetch_sub(1, Ordering::SeqCst);
            probe.finished.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// EXECUTION
// ============================================================================

#[test]
fn test_each_execute_creates_one_worker() {
    let executor = ThreadPoolExecutor::new(fast_polling(10)).unwrap();
    let caller = thread::current().id();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));
    let (seen_tx, seen_rx) = mpsc::channel();

    for expected in 1..=3 {
        let release_rx = Arc::clone(&release_rx);
        let seen_tx = seen_tx.clone();
        let id = executor
            .execute(move || {
                let me = thread::current();
                seen_tx
                    .send((me.id(), me.name().map(str::to_string)))
                    .unwrap();
                let _ = release_rx.lock().recv();
            })
            .unwrap();

        let workers = executor.workers();
        assert_eq!(workers.len(), expected);
        assert_eq!(workers.last().unwrap().id, id);

        let (thread_id, name) = seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(thread_id, caller, "task ran on the submitting thread");
        let OsWorker::Thread { name: tracked } = &workers.last().unwrap().worker else {
            panic!("thread executor tracked a non-thread worker");
        };
        assert_eq!(name.as_deref(), Some(tracked.as_str()));
    }

    for _ in 0..3 {
        release_tx.send(()).unwrap();
    }
    let report = executor.shutdown(Duration::from_secs(5));
    assert!(report.is_drained());
    assert_eq!(report.completed(), 3);
}

#[test]
fn test_execute_returns_immediately() {
    let executor = ThreadPoolExecutor::new(fast_polling(10)).unwrap();

    let start = Instant::now();
    executor
        .execute(|| thread::sleep(Duration::from_millis(500)))
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(250));

    let report = executor.shutdown(Duration::from_secs(5));
    assert!(report.is_drained());
}

#[test]
fn test_unbounded_by_default() {
    let executor = ThreadPoolExecutor::new(fast_polling(10).with_max_workers(1)).unwrap();
    let probe = ConcurrencyProbe::default();

    let start = Instant::now();
    for _ in 0..4 {
        executor.execute(probe.task(Duration::from_millis(200))).unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(150));
    assert_eq!(executor.workers().len(), 4);
    assert!(!executor.stats().bounded);

    executor.shutdown(Duration::from_secs(5));
    assert_eq!(probe.finished.load(Ordering::SeqCst), 4);
    assert!(probe.max_seen.load(Ordering::SeqCst) > 1);
}

#[test]
fn test_enforced_max_workers_bounds_concurrency() {
    let config = fast_polling(10)
        .with_max_workers(2)
        .with_enforce_max_workers(true);
    let executor = ThreadPoolExecutor::new(config).unwrap();
    let probe = ConcurrencyProbe::default();

    for _ in 0..8 {
        executor.execute(probe.task(Duration::from_millis(30))).unwrap();
        assert!(executor.workers().len() <= 2);
    }

    let report = executor.shutdown(Duration::from_secs(5));
    assert!(report.is_drained());
    assert_eq!(probe.finished.load(Ordering::SeqCst), 8);
    assert!(probe.max_seen.load(Ordering::SeqCst) <= 2);
    assert!(executor.stats().bounded);
}

// ============================================================================
// SHUTDOWN
// ============================================================================

#[test]
fn test_shutdown_pauses_are_bounded() {
    let executor = ThreadPoolExecutor::new(fast_polling(20)).unwrap();
    let id = executor
        .execute(|| thread::sleep(Duration::from_secs(2)))
        .unwrap();

    let start = Instant::now();
    let report = executor.shutdown(Duration::from_millis(100));
    let elapsed = start.elapsed();

    assert_eq!(report.pauses, 5);
    assert_eq!(report.outstanding, vec![id]);
    assert!(elapsed < Duration::from_secs(1), "shutdown took {elapsed:?}");

    // Abandoned threads stay listed; they are not cancelled.
    let workers = executor.workers();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].state, WorkerState::Running);
}

#[test]
fn test_shutdown_without_running_workers_never_pauses() {
    let executor = ThreadPoolExecutor::new(fast_polling(20)).unwrap();
    let (tx, rx) = mpsc::channel();
    executor.execute(move || tx.send(()).unwrap()).unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while executor.workers().iter().any(|w| w.state == WorkerState::Running)
        && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(5));
    }

    let report = executor.shutdown(Duration::from_secs(10));
    assert_eq!(report.pauses, 0);
    assert_eq!(report.reaped.len(), 1);
    assert!(report.is_drained());
}

#[test]
fn test_shutdown_stops_once_workers_finish() {
    let executor = ThreadPoolExecutor::new(fast_polling(20)).unwrap();
    executor
        .execute(|| thread::sleep(Duration::from_millis(50)))
        .unwrap();

    let start = Instant::now();
    let report = executor.shutdown(Duration::from_secs(10));

    assert!(report.is_drained());
    assert!(report.pauses < 20, "took {} pauses", report.pauses);
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_shutdown_with_unbounded_timeout_waits_for_workers() {
    let executor = ThreadPoolExecutor::new(fast_polling(10)).unwrap();
    executor
        .execute(|| thread::sleep(Duration::from_millis(50)))
        .unwrap();

    let report = executor.shutdown(Duration::MAX);

    assert!(report.is_drained());
    assert_eq!(report.completed(), 1);
}

#[test]
fn test_execute_after_shutdown_is_rejected() {
    let executor = ThreadPoolExecutor::new(fast_polling(10)).unwrap();
    executor.shutdown(Duration::from_millis(50));

    let result = executor.execute(|| {});
    assert!(matches!(result, Err(ExecutorError::RejectedExecution)));
    assert!(executor.workers().is_empty());
    assert_eq!(executor.stats().rejected, 1);
    assert_eq!(executor.stats().submitted, 0);
}

#[tokio::test]
async fn test_async_api() {
    let executor = ThreadPoolExecutor::new(fast_polling(10)).unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    executor
        .execute_async(move || {
            let _ = tx.send(21 * 2);
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), 42);

    let report = executor.shutdown_async(Duration::from_secs(5)).await;
    assert!(report.is_drained());
}

// ============================================================================
// EXECUTOR TRAIT
// ============================================================================

#[test]
fn test_build_thread_executor_from_config() {
    let config = ExecutorConfig {
        backend: BackendKind::Thread,
        thread: fast_polling(10),
        ..ExecutorConfig::default()
    };
    let executor = build_executor(&config).unwrap();
    let probe = ConcurrencyProbe::default();

    executor.execute(probe.task(Duration::from_millis(10))).unwrap();
    executor.execute(probe.task(Duration::from_millis(10))).unwrap();

    let report = executor.shutdown(Duration::from_secs(5));
    assert!(report.is_drained());
    assert!(executor.is_shutdown());
    assert_eq!(probe.finished.load(Ordering::SeqCst), 2);
    assert_eq!(executor.stats().completed, 2);
}

#[cfg(unix)]
#[test]
fn test_build_process_executor_from_config() {
    let config = ExecutorConfig::from_json_str(r#"{ "backend": "process", "process": { "max_workers": 1 } }"#)
        .unwrap();
    let executor = build_executor(&config).unwrap();

    executor.execute(|| {}).unwrap();
    let report = executor.shutdown(Duration::from_secs(10));
    assert_eq!(report.completed(), 1);
    assert!(matches!(
        executor.execute(|| {}),
        Err(ExecutorError::RejectedExecution)
    ));
}
