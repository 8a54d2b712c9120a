mod common;

use std::time::Duration;

use cityaccess_lib::matrix::StagingArea;
use cityaccess_lib::{run_fetch, run_prefilter, RetryPolicy, TravelDuration};
use common::{
    destination, fetch_options, origin, walking, FailingSource, FlakySource, MapSource, TestStore,
};

fn prefiltered() -> TestStore {
    let mut env = TestStore::seeded();
    run_prefilter(&mut env.store, 1000).expect("prefilter");
    env
}

fn both_reachable() -> MapSource {
    MapSource::new()
        .with("A", "D1", Some(600.0))
        .with("B", "D1", Some(2000.0))
}

#[test]
fn fetch_writes_durations_under_the_limit() {
    let mut env = prefiltered();
    let source = both_reachable();
    let summary = run_fetch(&mut env.store, &source, &fetch_options(2, 100)).expect("fetch");

    assert_eq!(summary.units, 2);
    assert_eq!(summary.pairs_requested, 2);
    assert_eq!(summary.durations_written, 2);
    assert_eq!(summary.gap_pairs, 0);
    assert_eq!(
        env.store.duration_between(&walking(), "A", "D1").unwrap(),
        Some(600.0)
    );
    assert_eq!(env.store.duration_between(&walking(), "A", "D2").unwrap(), None);
}

#[test]
fn second_fetch_requests_nothing() {
    let mut env = prefiltered();
    let source = both_reachable();
    run_fetch(&mut env.store, &source, &fetch_options(2, 100)).expect("first");
    let calls = source.calls();

    let second = run_fetch(&mut env.store, &source, &fetch_options(2, 100)).expect("second");
    assert_eq!(second.units, 0);
    assert_eq!(second.pairs_already_present, 2);
    assert_eq!(second.durations_written, 0);
    assert_eq!(source.calls(), calls);
    assert_eq!(env.store.count_rows("walking").unwrap(), 2);
}

#[test]
fn no_route_is_a_gap_not_a_zero() {
    let mut env = prefiltered();
    let source = MapSource::new().with("A", "D1", Some(600.0)).with("B", "D1", None);
    let summary = run_fetch(&mut env.store, &source, &fetch_options(1, 100)).unwrap();

    assert_eq!(summary.gap_pairs, 1);
    assert_eq!(summary.durations_written, 1);
    assert_eq!(env.store.duration_between(&walking(), "B", "D1").unwrap(), None);

    // gaps stay pending and are requested again
    let again = run_fetch(&mut env.store, &source, &fetch_options(1, 100)).unwrap();
    assert_eq!(again.pairs_requested, 1);
}

#[test]
fn failed_units_are_recorded_and_the_run_completes() {
    let mut env = prefiltered();
    let source = FailingSource::default();
    let mut options = fetch_options(2, 100);
    options.retry = RetryPolicy::new(1, Duration::from_millis(1));

    let summary = run_fetch(&mut env.store, &source, &options).expect("run completes");
    assert_eq!(summary.failed_units, 2);
    assert_eq!(summary.gap_pairs, 2);
    assert_eq!(summary.retries, 2);
    assert_eq!(source.calls(), 4);
    assert_eq!(env.store.count_rows("walking").unwrap(), 0);
}

#[test]
fn transient_failures_are_retried() {
    let mut env = prefiltered();
    let source = FlakySource::new(2, both_reachable());
    let mut options = fetch_options(1, 100);
    options.retry = RetryPolicy::new(3, Duration::from_millis(1));

    let summary = run_fetch(&mut env.store, &source, &options).unwrap();
    assert_eq!(summary.retries, 2);
    assert_eq!(summary.failed_units, 0);
    assert_eq!(summary.durations_written, 2);
}

#[test]
fn without_retries_a_failure_is_final() {
    let mut env = prefiltered();
    let source = FlakySource::new(1, both_reachable());
    let summary = run_fetch(&mut env.store, &source, &fetch_options(1, 100)).unwrap();

    assert_eq!(summary.failed_units, 1);
    assert_eq!(summary.retries, 0);
    assert_eq!(summary.durations_written, 1);
}

#[test]
fn many_workers_stage_every_row() {
    let mut env = TestStore::new();
    let origins: Vec<_> = (0..40)
        .map(|i| origin(&format!("O{i:02}"), -122.33 + i as f64 * 0.0001, 47.61))
        .collect();
    let destinations: Vec<_> = (0..5)
        .map(|i| destination(&format!("D{i}"), -122.32, 47.61 + i as f64 * 0.0005))
        .collect();
    env.store.insert_origins(&origins).unwrap();
    env.store.insert_destinations(&destinations).unwrap();
    run_prefilter(&mut env.store, 50).unwrap();

    let mut source = MapSource::new();
    for o in &origins {
        for d in &destinations {
            source = source.with(&o.id, &d.id, Some(300.0));
        }
    }
    let summary = run_fetch(&mut env.store, &source, &fetch_options(4, 2)).unwrap();

    // 5 destinations per origin in units of at most 2
    assert_eq!(summary.units, 40 * 3);
    assert_eq!(summary.durations_written, 200);
    assert_eq!(env.store.count_rows("walking").unwrap(), 200);
}

#[test]
fn leftover_staging_rows_are_recovered() {
    let mut env = prefiltered();
    let staging_dir = env.staging_dir();
    {
        let area = StagingArea::persistent(&staging_dir).unwrap();
        let mut writer = area.writer(0).unwrap();
        writer
            .append(&[TravelDuration {
                origin_id: "A".to_string(),
                destination_id: "D1".to_string(),
                seconds: 123.0,
            }])
            .unwrap();
    }

    let source = both_reachable();
    let mut options = fetch_options(2, 100);
    options.staging_dir = Some(staging_dir.clone());
    let summary = run_fetch(&mut env.store, &source, &options).unwrap();

    assert_eq!(summary.recovered_from_staging, 1);
    assert_eq!(summary.pairs_requested, 1);
    assert_eq!(summary.durations_written, 2);
    assert_eq!(
        env.store.duration_between(&walking(), "A", "D1").unwrap(),
        Some(123.0)
    );
    let area = StagingArea::persistent(&staging_dir).unwrap();
    assert!(area.files().unwrap().is_empty());
}

#[test]
fn fetch_requires_candidate_table() {
    let mut env = TestStore::seeded();
    let error = run_fetch(&mut env.store, &MapSource::new(), &fetch_options(1, 10))
        .expect_err("no origxdest");
    assert!(error.to_string().contains("origxdest"));
}
