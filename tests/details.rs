mod common;

use common::{document, env, write_head_file, write_outputs};
use flowcalc::core::{InsertOutcome, JobState, ResultKind};
use flowcalc::details::DetailsCache;
use flowcalc::ingest;
use flowcalc::workspace::{Workspace, DETAILS_FILE, ENGINE_LOG};
use std::sync::Barrier;

/// Submits and drives a calculation to SUCCESS by hand, with artifacts.
fn finished(env: &common::Env, calculation_id: &str, nlay: usize) -> Workspace {
    let InsertOutcome::Inserted { id } =
        ingest::submit(&env.store, &env.root, &document(calculation_id, nlay)).unwrap()
    else {
        panic!("expected insert");
    };
    let workspace = env.root.workspace(calculation_id).unwrap();
    env.store.set_state(id, JobState::Running, "").unwrap();
    write_outputs(workspace.path(), 2);
    env.store.set_state(id, JobState::Success, "Normal termination").unwrap();
    workspace.write_marker(JobState::Success).unwrap();
    workspace
}

#[test]
fn test_unknown_calculation_has_no_details() {
    let env = env();
    let workspace = env.root.workspace("nobody").unwrap();
    assert!(DetailsCache::default().get(&workspace, None).unwrap().is_none());
}

#[test]
fn test_queued_job_gets_degraded_details() {
    let env = env();
    ingest::submit(&env.store, &env.root, &document("calc-q", 2)).unwrap();
    let workspace = env.root.workspace("calc-q").unwrap();
    let job = env.store.latest_for("calc-q").unwrap();

    let details = DetailsCache::default()
        .get(&workspace, job.as_ref())
        .unwrap()
        .expect("details");

    assert_eq!(details.state, 0);
    assert_eq!(details.files, vec!["configuration.json"]);
    assert!(details.times.total_times.is_empty());
    assert_eq!(details.times.head.layers, 0);
    assert!(details.layer_values.is_empty());
    assert!(!workspace.path().join(DETAILS_FILE).exists());
}

#[test]
fn test_failed_job_reports_engine_log() {
    let env = env();
    let InsertOutcome::Inserted { id } =
        ingest::submit(&env.store, &env.root, &document("calc-f", 1)).unwrap()
    else {
        panic!("expected insert");
    };
    let workspace = env.root.workspace("calc-f").unwrap();
    env.store.set_state(id, JobState::Running, "").unwrap();
    env.store.set_state(id, JobState::Failed, "short").unwrap();
    std::fs::write(workspace.path().join(ENGINE_LOG), "full engine output").unwrap();

    let job = env.store.latest_for("calc-f").unwrap();
    let details = DetailsCache::default().get(&workspace, job.as_ref()).unwrap().unwrap();

    assert_eq!(details.state, 400);
    assert_eq!(details.message, "full engine output");
    assert!(!workspace.path().join(DETAILS_FILE).exists());
}

#[test]
fn test_marker_wins_over_store() {
    let env = env();
    ingest::submit(&env.store, &env.root, &document("calc-m", 1)).unwrap();
    let workspace = env.root.workspace("calc-m").unwrap();
    workspace.write_marker(JobState::Running).unwrap();

    let job = env.store.latest_for("calc-m").unwrap();
    let details = DetailsCache::default().get(&workspace, job.as_ref()).unwrap().unwrap();
    assert_eq!(details.state, 100);
}

#[test]
fn test_success_details_are_computed_and_persisted() {
    let env = env();
    let workspace = finished(&env, "calc-ok", 3);
    let job = env.store.latest_for("calc-ok").unwrap();
    let cache = DetailsCache::default();

    let details = cache.get(&workspace, job.as_ref()).unwrap().unwrap();

    assert_eq!(details.state, 200);
    assert_eq!(details.message, "Normal termination");
    assert_eq!(details.times.start_date_time.as_deref(), Some("2024-01-01"));
    assert_eq!(details.times.time_unit, Some(4));
    assert_eq!(details.times.total_times, vec![1.0, 31.0, 59.0, 90.0, 120.0, 151.0]);
    assert_eq!(details.times.head.idx, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(details.times.head.kstpkper[5], (0, 5));
    assert_eq!(details.times.head.layers, 2);
    assert_eq!(details.times.budget.total_times.len(), 6);
    assert_eq!(details.times.concentration.layers, 2);
    assert_eq!(details.times.drawdown.total_times.len(), 6);
    assert!(!details.files.contains(&DETAILS_FILE.to_string()));

    // dis.nlay is 3 but outputs only carry 2 layers.
    assert_eq!(details.layer_values.len(), 3);
    assert_eq!(
        details.layer_values[0],
        vec![
            ResultKind::Head,
            ResultKind::Budget,
            ResultKind::Concentration,
            ResultKind::Drawdown
        ]
    );
    assert_eq!(details.layer_values[2], vec![ResultKind::Budget]);

    let on_disk = std::fs::read(workspace.path().join(DETAILS_FILE)).unwrap();
    assert_eq!(on_disk, serde_json::to_vec_pretty(&details).unwrap());

    // Second read comes from the persisted file.
    assert_eq!(cache.get(&workspace, job.as_ref()).unwrap().unwrap(), details);
}

#[test]
fn test_concurrent_first_reads_persist_once() {
    let env = env();
    let workspace = finished(&env, "calc-race", 2);
    let job = env.store.latest_for("calc-race").unwrap();
    let cache = DetailsCache::default();
    let barrier = Barrier::new(2);

    let results: Vec<Vec<u8>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    let details = cache.get(&workspace, job.as_ref()).unwrap().unwrap();
                    serde_json::to_vec_pretty(&details).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results[0], results[1]);
    let on_disk = std::fs::read(workspace.path().join(DETAILS_FILE)).unwrap();
    assert_eq!(on_disk, results[0]);

    let leftovers: Vec<_> = std::fs::read_dir(workspace.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(".tmp-") || n.starts_with(DETAILS_FILE))
        .collect();
    assert_eq!(leftovers, vec![DETAILS_FILE.to_string()]);
}

#[test]
fn test_per_type_times_are_whole_units() {
    let env = env();
    let InsertOutcome::Inserted { id } =
        ingest::submit(&env.store, &env.root, &document("calc-frac", 1)).unwrap()
    else {
        panic!("expected insert");
    };
    let workspace = env.root.workspace("calc-frac").unwrap();
    env.store.set_state(id, JobState::Running, "").unwrap();
    write_head_file(&workspace.path().join("mf.hds"), "HEAD", &[0.4, 2.5, 30.75], 1, 1, 2, |_, _, _, _| 5.0);
    env.store.set_state(id, JobState::Success, "").unwrap();
    workspace.write_marker(JobState::Success).unwrap();

    let job = env.store.latest_for("calc-frac").unwrap();
    let details = DetailsCache::default().get(&workspace, job.as_ref()).unwrap().unwrap();

    assert_eq!(details.times.head.total_times, vec![0.0, 2.0, 31.0]);
    // The global axis keeps the raw values.
    assert_eq!(details.times.total_times, vec![0.4f32 as f64, 2.5, 30.75]);
}
