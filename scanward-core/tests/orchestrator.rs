mod support;

use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;
use scanward_core::{
    JobId, JobStore, OrchestratorConfig, OrchestratorError, RateBounds,
    RetentionPolicy, ScanJob, ScanOrchestrator, ScanRequest, ScanState,
    ScannerSettings, SqliteJobStore, ValidationError, job,
    orchestrator::INTERRUPTED_REASON, spawn_retention_worker, validate,
};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use support::{
    Script, ScriptedRunner, TWO_HOSTS, state_rank, temp_store,
    wait_for_terminal, wait_until,
};

struct Fixture {
    orchestrator: Arc<ScanOrchestrator>,
    store: Arc<SqliteJobStore>,
    runner: Arc<ScriptedRunner>,
    _db_dir: TempDir,
    _output_dir: TempDir,
}

async fn start_with(
    config: OrchestratorConfig,
    runner: ScriptedRunner,
    store: Option<(SqliteJobStore, TempDir)>,
) -> Fixture {
    let (store, db_dir) = match store {
        Some(existing) => existing,
        None => temp_store().await,
    };
    let store = Arc::new(store);
    let runner = Arc::new(runner);
    let output_dir = TempDir::new().unwrap();
    let scanner = ScannerSettings {
        output_dir: output_dir.path().to_path_buf(),
        ..ScannerSettings::default()
    };

    let orchestrator = ScanOrchestrator::start(
        config,
        &scanner,
        store.clone(),
        runner.clone(),
        CancellationToken::new(),
    )
    .await
    .expect("orchestrator starts");

    Fixture {
        orchestrator: Arc::new(orchestrator),
        store,
        runner,
        _db_dir: db_dir,
        _output_dir: output_dir,
    }
}

async fn start(runner: ScriptedRunner) -> Fixture {
    start_with(OrchestratorConfig::default(), runner, None).await
}

fn request() -> ScanRequest {
    ScanRequest::new("10.0.0.0/24", "80,443", Some(1000))
}

fn seeded_job(state: ScanState, age: ChronoDuration) -> ScanJob {
    let params = validate(&request(), &RateBounds::default()).unwrap();
    let mut job = ScanJob::new(JobId::new(), &params, job::now() - age);
    if state != ScanState::Starting {
        job.mark_running().unwrap();
    }
    match state {
        ScanState::Completed => job.complete(Vec::new(), job::now()).unwrap(),
        ScanState::Failed => job.fail("boom", job::now()).unwrap(),
        _ => {}
    }
    job
}

#[tokio::test]
async fn submitted_scan_is_visible_immediately_and_completes() {
    let f = start(ScriptedRunner::new(Script::Succeed(TWO_HOSTS.into()))).await;

    let id = f.orchestrator.submit(&request()).await.unwrap();
    let first = f.orchestrator.status(&id).await.unwrap();
    assert_eq!(first.id, id);
    assert_eq!(first.target_spec, "10.0.0.0/24");

    let done = wait_for_terminal(&f.store, &id).await;
    assert_eq!(done.state, ScanState::Completed);
    assert_eq!(done.result.unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_requests_create_nothing() {
    let f = start(ScriptedRunner::new(Script::Succeed(TWO_HOSTS.into()))).await;

    let cases = [
        (ScanRequest::new("", "80", Some(1000)), ValidationError::MissingFields),
        (
            ScanRequest::new("999.1.1.1", "80", Some(1000)),
            ValidationError::InvalidTargets,
        ),
        (
            ScanRequest::new("10.0.0.1", "70000", Some(1000)),
            ValidationError::InvalidPorts,
        ),
        (
            ScanRequest::new("10.0.0.1", "80-70", Some(1000)),
            ValidationError::InvalidPorts,
        ),
        (
            ScanRequest::new("10.0.0.1", "80", Some(99)),
            ValidationError::RateOutOfBounds {
                min: 100,
                max: 100_000,
            },
        ),
        (
            ScanRequest::new("10.0.0.1", "80", Some(100_001)),
            ValidationError::RateOutOfBounds {
                min: 100,
                max: 100_000,
            },
        ),
    ];

    for (req, expected) in cases {
        match f.orchestrator.submit(&req).await {
            Err(OrchestratorError::Validation(err)) => assert_eq!(err, expected),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    assert!(f.orchestrator.recent(None).await.unwrap().is_empty());
    assert_eq!(f.runner.invocation_count().await, 0);
}

#[tokio::test]
async fn failed_scan_records_reason() {
    let f = start(ScriptedRunner::new(Script::Exit(
        1,
        "permission denied".into(),
    )))
    .await;

    let id = f.orchestrator.submit(&request()).await.unwrap();
    let done = wait_for_terminal(&f.store, &id).await;

    assert_eq!(done.state, ScanState::Failed);
    assert!(done.failure_reason.unwrap().contains("permission denied"));
}

#[tokio::test]
async fn unknown_status_is_not_found() {
    let f = start(ScriptedRunner::new(Script::SucceedWithoutOutput)).await;
    let err = f
        .orchestrator
        .status(&JobId::from("unknown-id"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
    assert_eq!(err.to_string(), "Scan unknown-id not found");
}

#[tokio::test]
async fn worker_pool_bounds_concurrency() {
    let gate = Arc::new(Semaphore::new(0));
    let config = OrchestratorConfig {
        workers: 2,
        ..OrchestratorConfig::default()
    };
    let f = start_with(
        config,
        ScriptedRunner::gated(Script::Succeed(TWO_HOSTS.into()), gate.clone()),
        None,
    )
    .await;

    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(f.orchestrator.submit(&request()).await.unwrap());
    }

    let orchestrator = f.orchestrator.clone();
    wait_until(|| orchestrator.stats().dispatcher.in_flight == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.orchestrator.stats().dispatcher.in_flight, 2);
    assert_eq!(f.orchestrator.stats().dispatcher.queued, 3);

    gate.add_permits(5);
    for id in &ids {
        let done = wait_for_terminal(&f.store, id).await;
        assert_eq!(done.state, ScanState::Completed);
    }
    assert!(
        f.runner
            .max_concurrent
            .load(std::sync::atomic::Ordering::SeqCst)
            <= 2
    );
    assert_eq!(f.runner.invocation_count().await, 5);
}

#[tokio::test]
async fn full_queue_refuses_without_persisting() {
    let gate = Arc::new(Semaphore::new(0));
    let config = OrchestratorConfig {
        workers: 1,
        queue_capacity: 1,
        ..OrchestratorConfig::default()
    };
    let f = start_with(
        config,
        ScriptedRunner::gated(Script::Succeed(TWO_HOSTS.into()), gate.clone()),
        None,
    )
    .await;

    let running = f.orchestrator.submit(&request()).await.unwrap();
    let orchestrator = f.orchestrator.clone();
    wait_until(|| orchestrator.stats().dispatcher.in_flight == 1).await;

    let queued = f.orchestrator.submit(&request()).await.unwrap();
    let err = f.orchestrator.submit(&request()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::QueueFull));
    assert_eq!(f.orchestrator.recent(None).await.unwrap().len(), 2);

    gate.add_permits(2);
    assert_eq!(
        wait_for_terminal(&f.store, &running).await.state,
        ScanState::Completed
    );
    assert_eq!(
        wait_for_terminal(&f.store, &queued).await.state,
        ScanState::Completed
    );
}

#[tokio::test]
async fn polled_states_never_go_backwards() {
    let gate = Arc::new(Semaphore::new(0));
    let f = start_with(
        OrchestratorConfig::default(),
        ScriptedRunner::gated(Script::Succeed(TWO_HOSTS.into()), gate.clone()),
        None,
    )
    .await;

    let id = f.orchestrator.submit(&request()).await.unwrap();
    let mut last = 0;
    let mut released = false;
    for round in 0..200 {
        let job = f.orchestrator.status(&id).await.unwrap();
        let rank = state_rank(job.state);
        assert!(rank >= last, "state went backwards to {}", job.state);
        last = rank;
        if job.state.is_terminal() {
            break;
        }
        if round == 5 && !released {
            gate.add_permits(1);
            released = true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(last, 2);
}

#[tokio::test]
async fn recent_is_capped_at_configured_limit() {
    let f = start(ScriptedRunner::new(Script::SucceedWithoutOutput)).await;
    for offset in 0..12 {
        f.store
            .insert(&seeded_job(
                ScanState::Completed,
                ChronoDuration::minutes(offset),
            ))
            .await
            .unwrap();
    }

    let recent = f.orchestrator.recent(None).await.unwrap();
    assert_eq!(recent.len(), 10);
    assert!(
        recent
            .windows(2)
            .all(|pair| pair[0].started_at >= pair[1].started_at)
    );
    assert_eq!(f.orchestrator.recent(Some(3)).await.unwrap().len(), 3);
    assert_eq!(f.orchestrator.recent(Some(50)).await.unwrap().len(), 10);
}

#[tokio::test]
async fn cleanup_removes_only_old_jobs() {
    let f = start(ScriptedRunner::new(Script::Succeed(TWO_HOSTS.into()))).await;
    let old = seeded_job(ScanState::Completed, ChronoDuration::days(45));
    f.store.insert(&old).await.unwrap();

    let fresh = f.orchestrator.submit(&request()).await.unwrap();

    let thirty_days = Duration::from_secs(30 * 24 * 60 * 60);
    assert_eq!(f.orchestrator.cleanup_older_than(thirty_days).await.unwrap(), 1);
    assert_eq!(f.orchestrator.cleanup_older_than(thirty_days).await.unwrap(), 0);

    assert!(f.store.get(&old.id).await.unwrap().is_none());
    assert!(f.orchestrator.status(&fresh).await.is_ok());
}

#[tokio::test]
async fn restart_recovery_requeues_and_interrupts() {
    let (store, dir) = temp_store().await;
    let starting = seeded_job(ScanState::Starting, ChronoDuration::minutes(2));
    let running = seeded_job(ScanState::Running, ChronoDuration::minutes(1));
    let finished = seeded_job(ScanState::Completed, ChronoDuration::minutes(3));
    for job in [&starting, &running, &finished] {
        store.save(job).await.unwrap();
    }

    let f = start_with(
        OrchestratorConfig::default(),
        ScriptedRunner::new(Script::Succeed(TWO_HOSTS.into())),
        Some((store, dir)),
    )
    .await;

    let interrupted = f.orchestrator.status(&running.id).await.unwrap();
    assert_eq!(interrupted.state, ScanState::Failed);
    assert_eq!(
        interrupted.failure_reason.as_deref(),
        Some(INTERRUPTED_REASON)
    );

    let resumed = wait_for_terminal(&f.store, &starting.id).await;
    assert_eq!(resumed.state, ScanState::Completed);
    assert_eq!(f.runner.invocation_count().await, 1);

    let untouched = f.orchestrator.status(&finished.id).await.unwrap();
    assert_eq!(untouched, finished);
}

#[tokio::test]
async fn recovery_backlog_larger_than_queue_does_not_block_start() {
    let (store, dir) = temp_store().await;
    let mut seeded = Vec::new();
    for minutes in 1..=4 {
        let job = seeded_job(ScanState::Starting, ChronoDuration::minutes(minutes));
        store.save(&job).await.unwrap();
        seeded.push(job.id);
    }

    let gate = Arc::new(Semaphore::new(0));
    let config = OrchestratorConfig {
        workers: 1,
        queue_capacity: 1,
        ..OrchestratorConfig::default()
    };
    let f = tokio::time::timeout(
        Duration::from_secs(3),
        start_with(
            config,
            ScriptedRunner::gated(
                Script::Succeed(TWO_HOSTS.into()),
                gate.clone(),
            ),
            Some((store, dir)),
        ),
    )
    .await
    .expect("start returns while recovered scans wait for the pool");

    let mut waiting = 0;
    for id in &seeded {
        if f.orchestrator.status(id).await.unwrap().state == ScanState::Starting {
            waiting += 1;
        }
    }
    assert!(waiting >= 3, "only one recovered scan can hold the worker");

    gate.add_permits(4);
    for id in &seeded {
        let done = wait_for_terminal(&f.store, id).await;
        assert_eq!(done.state, ScanState::Completed);
    }
    assert_eq!(f.runner.invocation_count().await, 4);
}

#[tokio::test]
async fn events_follow_the_lifecycle() {
    let f = start(ScriptedRunner::new(Script::Succeed(TWO_HOSTS.into()))).await;
    let mut events = f.orchestrator.subscribe();

    let id = f.orchestrator.submit(&request()).await.unwrap();

    let mut states = Vec::new();
    while states.last().is_none_or(|state: &ScanState| !state.is_terminal()) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event in time")
            .unwrap();
        assert_eq!(event.id, id);
        states.push(event.state);
    }
    assert_eq!(
        states,
        vec![ScanState::Starting, ScanState::Running, ScanState::Completed]
    );
}

#[tokio::test]
async fn shutdown_refuses_new_work_and_drains() {
    let f = start(ScriptedRunner::new(Script::Succeed(TWO_HOSTS.into()))).await;
    let id = f.orchestrator.submit(&request()).await.unwrap();
    let orchestrator = f.orchestrator.clone();
    wait_until(|| orchestrator.stats().dispatcher.queued == 0).await;

    f.orchestrator.shutdown().await;

    let err = f.orchestrator.submit(&request()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Shutdown));
    let job = f.orchestrator.status(&id).await.unwrap();
    assert!(job.state.is_terminal());
}

#[tokio::test]
async fn retention_worker_runs_on_startup() {
    let f = start(ScriptedRunner::new(Script::SucceedWithoutOutput)).await;
    let old = seeded_job(ScanState::Failed, ChronoDuration::days(60));
    f.store.insert(&old).await.unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_retention_worker(
        f.orchestrator.clone(),
        RetentionPolicy::default(),
        shutdown.clone(),
    );

    let store = f.store.clone();
    let id = old.id.clone();
    let mut gone = false;
    for _ in 0..100 {
        if store.get(&id).await.unwrap().is_none() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "old job removed by startup cleanup");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stops")
        .unwrap();
}
