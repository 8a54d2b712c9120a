//! Common test utilities and fixture helpers.
//!
//! Provides a file-backed store in a temporary directory, a small Seattle-area
//! dataset, and in-process routing fakes implementing `DurationSource`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use cityaccess_lib::{
    Contract, Coordinate, Destination, DurationSource, Error, FetchOptions, Identifier, Origin,
    RequestUnit, Result, RetryPolicy, Store,
};
use tempfile::TempDir;

/// A store living in its own temporary directory.
#[allow(dead_code)]
pub struct TestStore {
    /// Temp directory (dropped on struct drop)
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub store: Store,
}

#[allow(dead_code)]
impl TestStore {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let db_path = dir.path().join("access.db");
        let store = Store::open(&db_path).expect("open store");
        store.init_schema().expect("schema");
        Self {
            dir,
            db_path,
            store,
        }
    }

    /// Two origins and two destinations; only `D1` is within 2 km of both.
    pub fn seeded() -> Self {
        let mut env = Self::new();
        env.store
            .insert_origins(&[
                origin("A", -122.3350, 47.6080),
                origin("B", -122.3420, 47.6150),
            ])
            .expect("origins");
        env.store
            .insert_destinations(&[
                destination("D1", -122.3300, 47.6100),
                destination("D2", -122.0000, 47.9000),
            ])
            .expect("destinations");
        env
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.dir.path().join("staging")
    }
}

#[allow(dead_code)]
pub fn origin(id: &str, lon: f64, lat: f64) -> Origin {
    Origin {
        id: id.to_string(),
        position: Coordinate::new(lon, lat),
    }
}

#[allow(dead_code)]
pub fn destination(id: &str, lon: f64, lat: f64) -> Destination {
    Destination {
        id: id.to_string(),
        position: Coordinate::new(lon, lat),
    }
}

#[allow(dead_code)]
pub fn contract(number: &str, project: &str, budget: f64, destination_id: &str) -> Contract {
    Contract {
        number: number.to_string(),
        project: project.to_string(),
        line_of_business: None,
        total_budget: Some(budget),
        destination_id: destination_id.to_string(),
    }
}

/// Fetch options for the walking table with a 2 km limit.
#[allow(dead_code)]
pub fn fetch_options(workers: usize, batch_size: usize) -> FetchOptions {
    FetchOptions {
        limit_meters: 2000.0,
        batch_size,
        workers,
        retry: RetryPolicy::none(),
        staging_dir: None,
        duration_table: walking(),
    }
}

#[allow(dead_code)]
pub fn walking() -> Identifier {
    Identifier::new("walking").expect("identifier")
}

/// Answers from a fixed `(origin, destination) -> seconds` table. Pairs not in
/// the table come back as "no route".
#[allow(dead_code)]
#[derive(Default)]
pub struct MapSource {
    durations: HashMap<(String, String), Option<f64>>,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, origin: &str, destination: &str, seconds: Option<f64>) -> Self {
        self.durations
            .insert((origin.to_string(), destination.to_string()), seconds);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DurationSource for MapSource {
    fn durations(&self, unit: &RequestUnit) -> Result<Vec<Option<f64>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(unit
            .destinations
            .iter()
            .map(|(destination, _)| {
                self.durations
                    .get(&(unit.origin_id.clone(), destination.clone()))
                    .copied()
                    .flatten()
            })
            .collect())
    }
}

/// Fails every request with a retryable error.
#[allow(dead_code)]
#[derive(Default)]
pub struct FailingSource {
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FailingSource {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DurationSource for FailingSource {
    fn durations(&self, _unit: &RequestUnit) -> Result<Vec<Option<f64>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::MalformedResponse {
            message: "connection reset".to_string(),
        })
    }
}

/// Fails the first `failures` requests, then defers to `inner`.
#[allow(dead_code)]
pub struct FlakySource {
    failures: AtomicUsize,
    inner: MapSource,
}

#[allow(dead_code)]
impl FlakySource {
    pub fn new(failures: usize, inner: MapSource) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            inner,
        }
    }
}

impl DurationSource for FlakySource {
    fn durations(&self, unit: &RequestUnit) -> Result<Vec<Option<f64>>> {
        let remaining = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if remaining.is_ok() {
            return Err(Error::RoutingStatus {
                status: 503,
                url: "http://localhost:5000/table/v1/walking".to_string(),
            });
        }
        self.inner.durations(unit)
    }
}
