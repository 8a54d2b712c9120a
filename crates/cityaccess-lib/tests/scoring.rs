mod common;

use cityaccess_lib::db::{ColumnType, ORIGIN_TABLE};
use cityaccess_lib::{
    run_fetch, run_prefilter, run_scoring, Identifier, PipelineConfig, TravelDuration,
};
use common::{contract, destination, fetch_options, origin, walking, MapSource, TestStore};
use rusqlite::params;

fn set_population(env: &TestStore, values: &[(&str, f64)]) {
    let column = Identifier::new("pop_over_65").unwrap();
    env.store
        .add_column(ORIGIN_TABLE, &column, ColumnType::Real)
        .unwrap();
    for (id, value) in values {
        env.store
            .connection()
            .execute(
                "UPDATE orig SET pop_over_65 = ?1 WHERE orig_id = ?2",
                params![value, id],
            )
            .unwrap();
    }
}

fn outputs(env: &TestStore) -> Vec<(String, f64, f64)> {
    env.store
        .query_rows(
            "SELECT orig_id, HSSAscore, investment FROM orig ORDER BY orig_id",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap()
}

#[test]
fn end_to_end_single_contract() {
    let mut env = TestStore::seeded();
    set_population(&env, &[("A", 10.0), ("B", 30.0)]);
    env.store
        .insert_contracts(&[contract("C1", "Meals", 200.0, "D1")])
        .unwrap();
    run_prefilter(&mut env.store, 1000).unwrap();
    let source = MapSource::new()
        .with("A", "D1", Some(600.0))
        .with("B", "D1", Some(2000.0));
    run_fetch(&mut env.store, &source, &fetch_options(2, 100)).unwrap();

    let summary = run_scoring(&mut env.store, &PipelineConfig::default()).expect("score");
    assert_eq!(summary.origins, 2);
    assert_eq!(summary.origins_with_services, 1);
    assert_eq!(summary.contracts, 1);
    assert_eq!(summary.reachable_pairs, 1);

    // only A's population is served, so A receives the whole budget
    assert_eq!(
        outputs(&env),
        vec![
            ("A".to_string(), 100.0, 200.0),
            ("B".to_string(), 0.0, 0.0),
        ]
    );
}

#[test]
fn budget_is_conserved_across_origins() {
    let mut env = TestStore::seeded();
    set_population(&env, &[("A", 10.0), ("B", 30.0)]);
    env.store
        .insert_contracts(&[contract("C1", "Meals", 1000.0, "D1")])
        .unwrap();
    env.store
        .insert_durations(
            &walking(),
            &[
                TravelDuration {
                    origin_id: "A".into(),
                    destination_id: "D1".into(),
                    seconds: 600.0,
                },
                TravelDuration {
                    origin_id: "B".into(),
                    destination_id: "D1".into(),
                    seconds: 1200.0,
                },
            ],
        )
        .unwrap();

    run_scoring(&mut env.store, &PipelineConfig::default()).unwrap();
    let rows = outputs(&env);
    assert_eq!(rows[0].2, 250.0);
    assert_eq!(rows[1].2, 750.0);
    // closer origin scores higher
    assert_eq!(rows[0].1, 100.0);
    assert!((rows[1].1 - 50.0).abs() < 1e-9);
}

#[test]
fn rescoring_overwrites_previous_values() {
    let mut env = TestStore::seeded();
    set_population(&env, &[("A", 5.0), ("B", 5.0)]);
    env.store
        .insert_contracts(&[contract("C1", "Meals", 100.0, "D1")])
        .unwrap();
    env.store
        .insert_durations(
            &walking(),
            &[TravelDuration {
                origin_id: "A".into(),
                destination_id: "D1".into(),
                seconds: 600.0,
            }],
        )
        .unwrap();

    run_scoring(&mut env.store, &PipelineConfig::default()).unwrap();
    let config = PipelineConfig {
        max_walk_duration_seconds: 300.0,
        ..PipelineConfig::default()
    };
    run_scoring(&mut env.store, &config).unwrap();

    assert_eq!(
        outputs(&env),
        vec![("A".to_string(), 0.0, 0.0), ("B".to_string(), 0.0, 0.0)]
    );
}

#[test]
fn contracts_at_unknown_destinations_are_skipped() {
    let mut env = TestStore::seeded();
    set_population(&env, &[("A", 1.0), ("B", 1.0)]);
    env.store
        .insert_contracts(&[
            contract("C1", "Meals", 100.0, "D1"),
            contract("C2", "Housing", 100.0, "MISSING"),
        ])
        .unwrap();
    env.store
        .insert_destinations(&[destination("D3", -122.331, 47.609)])
        .unwrap();
    env.store
        .insert_origins(&[origin("C", -122.336, 47.607)])
        .unwrap();

    let summary = run_scoring(&mut env.store, &PipelineConfig::default()).unwrap();
    assert_eq!(summary.contracts, 1);
    assert_eq!(summary.unknown_destination_rows, 1);
    assert_eq!(summary.origins, 3);
}

#[test]
fn missing_population_column_is_an_error() {
    let mut env = TestStore::seeded();
    let error = run_scoring(&mut env.store, &PipelineConfig::default()).expect_err("no column");
    assert!(error.to_string().contains("pop_over_65"));
}
