mod common;

use common::{document, env, Script, ScriptedEngine};
use flowcalc::core::{InsertOutcome, JobState};
use flowcalc::ingest;
use flowcalc::scheduler::{FixedInterval, ReportLimit, Tick, Worker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn marker(env: &common::Env, calculation_id: &str) -> Option<String> {
    env.root.workspace(calculation_id).unwrap().read_marker().map(|s| s.code().to_string())
}

#[tokio::test]
async fn test_idle_when_queue_is_empty() {
    let env = env();
    let worker = Worker::new(env.store.clone(), env.root.clone(), ScriptedEngine::new(Script::Succeed));
    assert_eq!(worker.tick().await.unwrap(), Tick::Idle);
}

#[tokio::test]
async fn test_successful_run_reaches_success() {
    let env = env();
    let engine = ScriptedEngine::new(Script::Succeed);
    ingest::submit(&env.store, &env.root, &document("calc-ok", 2)).unwrap();

    let worker = Worker::new(env.store.clone(), env.root.clone(), engine.clone()).with_id("test");
    let Tick::Finished(job) = worker.tick().await.unwrap() else {
        panic!("expected a job to run");
    };

    assert_eq!(job.state, JobState::Success);
    assert!(job.message.contains("Normal termination"));
    assert_eq!(marker(&env, "calc-ok").as_deref(), Some("200"));

    // The engine saw RUNNING in the marker while it ran.
    assert_eq!(engine.markers_seen.lock().unwrap().as_slice(), &[Some("100".to_string())]);

    assert_eq!(worker.tick().await.unwrap(), Tick::Idle);
}

#[tokio::test]
async fn test_engine_failure_is_failed_with_report() {
    let env = env();
    ingest::submit(&env.store, &env.root, &document("calc-bad", 1)).unwrap();

    let worker = Worker::new(
        env.store.clone(),
        env.root.clone(),
        ScriptedEngine::new(Script::Fail("FAILED TO MEET SOLVER CONVERGENCE".into())),
    );
    let Tick::Finished(job) = worker.tick().await.unwrap() else {
        panic!("expected a job to run");
    };

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.message, "FAILED TO MEET SOLVER CONVERGENCE");
    assert_eq!(marker(&env, "calc-bad").as_deref(), Some("400"));
}

#[tokio::test]
async fn test_engine_error_is_error_with_trace() {
    let env = env();
    ingest::submit(&env.store, &env.root, &document("calc-err", 1)).unwrap();

    let worker = Worker::new(
        env.store.clone(),
        env.root.clone(),
        ScriptedEngine::new(Script::Raise("while writing packages".into())),
    );
    let Tick::Finished(job) = worker.tick().await.unwrap() else {
        panic!("expected a job to run");
    };

    assert_eq!(job.state.code(), 500);
    assert!(job.message.contains("while writing packages"), "{}", job.message);
    assert!(job.message.contains("solver blew up"), "{}", job.message);
    assert_eq!(marker(&env, "calc-err").as_deref(), Some("500"));
}

#[tokio::test]
async fn test_engine_panic_is_error() {
    let env = env();
    ingest::submit(&env.store, &env.root, &document("calc-panic", 1)).unwrap();

    let worker = Worker::new(env.store.clone(), env.root.clone(), ScriptedEngine::new(Script::Panic));
    let Tick::Finished(job) = worker.tick().await.unwrap() else {
        panic!("expected a job to run");
    };

    assert_eq!(job.state, JobState::Error);
    assert!(job.message.contains("engine exploded"), "{}", job.message);
    assert_eq!(marker(&env, "calc-panic").as_deref(), Some("500"));
}

#[tokio::test]
async fn test_missing_configuration_is_error() {
    let env = env();
    // Enqueued without going through ingestion: no workspace, no document.
    let InsertOutcome::Inserted { .. } = env.store.insert_if_absent("calc-orphan").unwrap() else {
        panic!("expected insert");
    };

    let engine = ScriptedEngine::new(Script::Succeed);
    let worker = Worker::new(env.store.clone(), env.root.clone(), engine.clone());
    let Tick::Finished(job) = worker.tick().await.unwrap() else {
        panic!("expected a job to run");
    };

    assert_eq!(job.state, JobState::Error);
    assert!(job.message.contains("configuration"), "{}", job.message);
    assert!(engine.markers_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_long_reports_are_summarized() {
    let env = env();
    ingest::submit(&env.store, &env.root, &document("calc-long", 1)).unwrap();

    let report = (0..60).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
    let worker = Worker::new(env.store.clone(), env.root.clone(), ScriptedEngine::new(Script::Fail(report)))
        .with_report_limit(ReportLimit { head: 3, tail: 2 });
    let Tick::Finished(job) = worker.tick().await.unwrap() else {
        panic!("expected a job to run");
    };

    assert_eq!(job.message, "line 0\nline 1\nline 2\n\n...\n\nline 58\nline 59");
}

#[tokio::test]
async fn test_run_drains_queue_until_stopped() {
    let env = env();
    for id in ["c1", "c2"] {
        ingest::submit(&env.store, &env.root, &document(id, 1)).unwrap();
    }

    let worker = Arc::new(
        Worker::new(env.store.clone(), env.root.clone(), ScriptedEngine::new(Script::Succeed))
            .with_wait_strategy(FixedInterval(Duration::from_millis(10))),
    );
    let stop = Arc::new(AtomicBool::new(false));

    let handle = {
        let worker = worker.clone();
        let stop = stop.clone();
        tokio::spawn(async move { worker.run(stop).await })
    };

    for _ in 0..200 {
        if env.store.count_by_state(JobState::Success).unwrap() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    stop.store(true, Ordering::SeqCst);
    handle.await.unwrap().unwrap();

    assert_eq!(env.store.count_by_state(JobState::Success).unwrap(), 2);
    assert_eq!(env.store.count_by_state(JobState::Queued).unwrap(), 0);
}
