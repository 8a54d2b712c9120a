//! Travel-duration acquisition from an external routing service.
//!
//! A single producer streams pending candidate pairs out of the store,
//! grouped by origin into [`RequestUnit`]s, and pushes them into a bounded
//! queue. A fixed pool of scoped worker threads pulls units, performs one
//! blocking routing request each (with optional retry), and appends results
//! to its own staging file. Once the queue is drained and every worker is
//! joined, the calling thread merges all staging files into the duration
//! table in one transaction.
//!
//! Only the calling thread touches the store. Pairs already present in the
//! duration table are never requested again, so the fetch can be re-run.

pub mod client;
pub mod staging;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::db::{Identifier, Store, TravelDuration, CANDIDATE_TABLE};
use crate::error::{Error, Result};
use crate::geo::Coordinate;

pub use client::{
    parse_route_response, parse_table_response, DurationSource, OsrmClient, RequestUnit,
};
pub use staging::{StagedRows, StagingArea, StagingWriter};

/// Bounded retry with exponential backoff for failed routing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Drop a unit after its first failure.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base × 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Parameters of one fetch run.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Only pairs with `euclidean < limit_meters` are routed.
    pub limit_meters: f64,
    /// Maximum destinations per request unit.
    pub batch_size: usize,
    pub workers: usize,
    pub retry: RetryPolicy,
    pub staging_dir: Option<PathBuf>,
    pub duration_table: Identifier,
}

impl FetchOptions {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            limit_meters: config.euclidean_limit_meters,
            batch_size: config.effective_batch_size(),
            workers: config.worker_pool_size,
            retry: RetryPolicy::new(
                config.retry_count,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            staging_dir: config.staging_dir.clone(),
            duration_table: config.duration_table()?,
        })
    }
}

/// Counts reported at the end of a fetch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchSummary {
    /// Request units scheduled (one origin, up to `batch_size` destinations).
    pub units: usize,
    /// Pairs scheduled for routing.
    pub pairs_requested: usize,
    /// Pairs under the limit skipped because a duration was already stored.
    pub pairs_already_present: usize,
    /// New rows committed to the duration table, including recovered ones.
    pub durations_written: usize,
    /// Rows merged from an earlier interrupted run's staging files.
    pub recovered_from_staging: usize,
    /// Pairs without a duration after this run (no route or failed request).
    pub gap_pairs: usize,
    /// Units abandoned after exhausting retries.
    pub failed_units: usize,
    pub retries: usize,
    /// Staged rows ignored at merge because the pair was already stored.
    pub duplicate_rows: usize,
    /// Undecodable staging lines skipped at merge.
    pub corrupt_staging_lines: usize,
}

#[derive(Debug, Default)]
struct WorkerStats {
    gap_pairs: usize,
    failed_units: usize,
    retries: usize,
}

/// Fetch durations for every pending candidate pair under the limit.
pub fn run_fetch(
    store: &mut Store,
    source: &dyn DurationSource,
    options: &FetchOptions,
) -> Result<FetchSummary> {
    store.require_table(CANDIDATE_TABLE)?;
    store.ensure_duration_table(&options.duration_table)?;
    let batch_size = options.batch_size.max(1);
    let workers = options.workers.max(1);

    let staging = match &options.staging_dir {
        Some(dir) => StagingArea::persistent(dir)?,
        None => StagingArea::temporary()?,
    };

    let mut summary = FetchSummary::default();
    let leftovers = merge_staging(store, &options.duration_table, &staging)?;
    if leftovers.inserted > 0 {
        info!(
            rows = leftovers.inserted,
            dir = %staging.dir().display(),
            "recovered durations from an interrupted run"
        );
    }
    summary.recovered_from_staging = leftovers.inserted;
    summary.durations_written += leftovers.inserted;
    summary.duplicate_rows += leftovers.duplicates;
    summary.corrupt_staging_lines += leftovers.corrupt;

    let plan = plan_units(store, &options.duration_table, options.limit_meters, batch_size)?;
    summary.units = plan.units;
    summary.pairs_requested = plan.pending_pairs;
    summary.pairs_already_present = plan.present_pairs;

    if plan.units == 0 {
        info!(
            already_present = plan.present_pairs,
            "no pending candidate pairs; nothing to fetch"
        );
        return Ok(summary);
    }

    info!(
        units = plan.units,
        pairs = plan.pending_pairs,
        already_present = plan.present_pairs,
        workers,
        batch_size,
        "started querying routing service"
    );

    let writers = (0..workers)
        .map(|worker| staging.writer(worker))
        .collect::<Result<Vec<_>>>()?;
    let progress = Progress::new(plan.units);
    let (sender, receiver) = bounded::<RequestUnit>(workers * 2);

    let (produced, stats) = thread::scope(|scope| {
        let handles: Vec<_> = writers
            .into_iter()
            .enumerate()
            .map(|(worker, writer)| {
                let receiver = receiver.clone();
                let progress = &progress;
                let retry = options.retry;
                scope.spawn(move || run_worker(worker, receiver, writer, source, retry, progress))
            })
            .collect();
        drop(receiver);

        let produced = produce_units(store, options, batch_size, &sender);
        drop(sender);

        let mut stats = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.join() {
                Ok(worker_stats) => stats.push(worker_stats),
                Err(_) => error!("fetch worker panicked; its in-flight unit is lost"),
            }
        }
        (produced, stats)
    });
    let produced = produced?;
    if produced != plan.units {
        warn!(
            planned = plan.units,
            produced,
            "produced unit count differs from plan"
        );
    }
    info!("done querying routing service");

    for worker in &stats {
        summary.gap_pairs += worker.gap_pairs;
        summary.failed_units += worker.failed_units;
        summary.retries += worker.retries;
    }

    let merged = merge_staging(store, &options.duration_table, &staging)?;
    summary.durations_written += merged.inserted;
    summary.duplicate_rows += merged.duplicates;
    summary.corrupt_staging_lines += merged.corrupt;

    if summary.failed_units > 0 || summary.gap_pairs > 0 {
        warn!(
            failed_units = summary.failed_units,
            gap_pairs = summary.gap_pairs,
            "some pairs have no duration; they are treated as unreachable"
        );
    }
    info!(
        written = summary.durations_written,
        units = summary.units,
        retries = summary.retries,
        "fetch complete"
    );
    Ok(summary)
}

struct UnitPlan {
    units: usize,
    pending_pairs: usize,
    present_pairs: usize,
}

fn pending_filter(table: &Identifier) -> String {
    format!(
        "x.euclidean < ?1 AND NOT EXISTS (
             SELECT 1 FROM {} w WHERE w.orig_id = x.orig_id AND w.dest_id = x.dest_id
         )",
        table.quoted()
    )
}

fn plan_units(
    store: &Store,
    table: &Identifier,
    limit_meters: f64,
    batch_size: usize,
) -> Result<UnitPlan> {
    let sql = format!(
        "SELECT COUNT(*) FROM origxdest x
         JOIN orig o ON o.orig_id = x.orig_id
         JOIN dest d ON d.dest_id = x.dest_id
         WHERE {}
         GROUP BY x.orig_id",
        pending_filter(table)
    );
    let per_origin: Vec<i64> = store.query_rows(&sql, params![limit_meters], |row| row.get(0))?;
    let pending_pairs: usize = per_origin.iter().map(|n| *n as usize).sum();
    let units = per_origin
        .iter()
        .map(|n| (*n as usize).div_ceil(batch_size))
        .sum();

    let under_limit: i64 = store.connection().query_row(
        "SELECT COUNT(*) FROM origxdest x
         JOIN orig o ON o.orig_id = x.orig_id
         JOIN dest d ON d.dest_id = x.dest_id
         WHERE x.euclidean < ?1",
        params![limit_meters],
        |row| row.get(0),
    )?;

    Ok(UnitPlan {
        units,
        pending_pairs,
        present_pairs: (under_limit as usize).saturating_sub(pending_pairs),
    })
}

/// Stream pending pairs in origin order, cutting a unit at each origin
/// change or at `batch_size` destinations.
fn produce_units(
    store: &Store,
    options: &FetchOptions,
    batch_size: usize,
    sender: &Sender<RequestUnit>,
) -> Result<usize> {
    let sql = format!(
        "SELECT x.orig_id, x.dest_id, o.orig_lon, o.orig_lat, d.dest_lon, d.dest_lat
         FROM origxdest x
         JOIN orig o ON o.orig_id = x.orig_id
         JOIN dest d ON d.dest_id = x.dest_id
         WHERE {}
         ORDER BY x.orig_id, x.dest_id",
        pending_filter(&options.duration_table)
    );
    let mut stmt = store.connection().prepare(&sql)?;
    let mut rows = stmt.query(params![options.limit_meters])?;

    let mut sent = 0usize;
    let mut current: Option<RequestUnit> = None;
    while let Some(row) = rows.next()? {
        let origin_id: String = row.get(0)?;
        let destination_id: String = row.get(1)?;
        let origin = Coordinate::new(row.get(2)?, row.get(3)?);
        let destination = Coordinate::new(row.get(4)?, row.get(5)?);

        let flush = current
            .as_ref()
            .is_some_and(|unit| unit.origin_id != origin_id || unit.len() >= batch_size);
        if flush {
            if let Some(unit) = current.take() {
                if sender.send(unit).is_err() {
                    return Err(workers_gone());
                }
                sent += 1;
            }
        }
        current
            .get_or_insert_with(|| RequestUnit {
                origin_id,
                origin,
                destinations: Vec::with_capacity(batch_size),
            })
            .destinations
            .push((destination_id, destination));
    }
    if let Some(unit) = current.take() {
        if sender.send(unit).is_err() {
            return Err(workers_gone());
        }
        sent += 1;
    }
    Ok(sent)
}

fn workers_gone() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "all fetch workers exited before the queue was drained",
    ))
}

fn run_worker(
    worker: usize,
    receiver: Receiver<RequestUnit>,
    mut writer: StagingWriter,
    source: &dyn DurationSource,
    retry: RetryPolicy,
    progress: &Progress,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    for unit in receiver.iter() {
        match fetch_with_retry(source, &unit, retry, &mut stats) {
            Ok(durations) => {
                let mut rows = Vec::with_capacity(unit.len());
                for ((destination_id, _), duration) in unit.destinations.iter().zip(durations) {
                    match duration {
                        Some(seconds) => rows.push(TravelDuration {
                            origin_id: unit.origin_id.clone(),
                            destination_id: destination_id.clone(),
                            seconds,
                        }),
                        None => stats.gap_pairs += 1,
                    }
                }
                if let Err(err) = writer.append(&rows) {
                    error!(
                        worker,
                        origin = %unit.origin_id,
                        path = %writer.path().display(),
                        error = %err,
                        "failed to stage durations"
                    );
                    stats.failed_units += 1;
                    stats.gap_pairs += rows.len();
                }
            }
            Err(err) => {
                warn!(
                    worker,
                    origin = %unit.origin_id,
                    destinations = unit.len(),
                    error = %err,
                    "routing request failed; recording gap"
                );
                stats.failed_units += 1;
                stats.gap_pairs += unit.len();
            }
        }
        progress.record();
    }
    debug!(worker, rows = writer.rows_written(), "fetch worker finished");
    stats
}

fn fetch_with_retry(
    source: &dyn DurationSource,
    unit: &RequestUnit,
    retry: RetryPolicy,
    stats: &mut WorkerStats,
) -> Result<Vec<Option<f64>>> {
    let mut attempt = 0u32;
    loop {
        let result = source.durations(unit).and_then(|durations| {
            if durations.len() == unit.len() {
                Ok(durations)
            } else {
                Err(Error::MalformedResponse {
                    message: format!(
                        "expected {} durations, got {}",
                        unit.len(),
                        durations.len()
                    ),
                })
            }
        });
        match result {
            Ok(durations) => return Ok(durations),
            Err(err) if err.is_retryable() && attempt < retry.max_retries => {
                attempt += 1;
                stats.retries += 1;
                let delay = retry.delay_for(attempt);
                debug!(
                    origin = %unit.origin_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying routing request"
                );
                thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

struct MergeOutcome {
    inserted: usize,
    duplicates: usize,
    corrupt: usize,
}

fn merge_staging(
    store: &mut Store,
    table: &Identifier,
    staging: &StagingArea,
) -> Result<MergeOutcome> {
    let staged = staging.read_all()?;
    let inserted = if staged.rows.is_empty() {
        0
    } else {
        store.insert_durations(table, &staged.rows)?
    };
    staging.remove(&staged.files)?;
    Ok(MergeOutcome {
        inserted,
        duplicates: staged.rows.len() - inserted,
        corrupt: staged.corrupt_lines,
    })
}

/// Completed-unit counter shared by the workers; logs every 5%.
#[derive(Debug)]
struct Progress {
    total: usize,
    completed: AtomicUsize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
        }
    }

    fn record(&self) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(percent) = milestone(done, self.total) {
            info!(
                percent,
                completed = done,
                total = self.total,
                "percent completed querying task"
            );
        }
    }
}

/// Percentage milestone (5, 10, …, 95) reached exactly at `done` units.
fn milestone(done: usize, total: usize) -> Option<usize> {
    (1..20usize)
        .rev()
        .find(|i| ((total * i) as f64 / 20.0).round() as usize == done && done > 0)
        .map(|i| i * 5)
}
