//! Straight-line distance for every origin × destination pair.
//!
//! The cross join runs inside SQLite with `haversine` registered as a scalar
//! function, so each pair costs one native call rather than a round trip
//! through Rust. Rows are committed in fixed-size batches into a scratch
//! table which is renamed to `origxdest` only after the last batch, so
//! readers never observe a half-built candidate table.

use rusqlite::functions::FunctionFlags;
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{Store, CANDIDATE_TABLE, DESTINATION_TABLE, ORIGIN_TABLE};
use crate::error::Result;
use crate::geo::haversine;

const SCRATCH_TABLE: &str = "origxdest_build";

/// Outcome of a prefilter pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefilterSummary {
    /// Candidate pairs written (zero when skipped).
    pub pairs: u64,
    /// Write transactions committed.
    pub batches: usize,
    /// True when `origxdest` already existed and nothing was computed.
    pub skipped: bool,
}

/// Register the `haversine(lon1, lat1, lon2, lat2)` SQL function.
pub fn register_haversine(store: &Store) -> Result<()> {
    store.connection().create_scalar_function(
        "haversine",
        4,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let orig_lon: f64 = ctx.get(0)?;
            let orig_lat: f64 = ctx.get(1)?;
            let dest_lon: f64 = ctx.get(2)?;
            let dest_lat: f64 = ctx.get(3)?;
            Ok(haversine(orig_lon, orig_lat, dest_lon, dest_lat))
        },
    )?;
    Ok(())
}

/// Build `origxdest` unless it already exists.
///
/// `batch_size` bounds both the rows held in memory and the rows per commit.
pub fn run_prefilter(store: &mut Store, batch_size: usize) -> Result<PrefilterSummary> {
    if store.table_exists(CANDIDATE_TABLE)? {
        info!("candidate pair table already exists; skipping prefilter");
        return Ok(PrefilterSummary {
            skipped: true,
            ..PrefilterSummary::default()
        });
    }
    store.require_table(ORIGIN_TABLE)?;
    store.require_table(DESTINATION_TABLE)?;
    let batch_size = batch_size.max(1);

    register_haversine(store)?;
    store.drop_table(SCRATCH_TABLE)?;
    store.connection().execute(
        "CREATE TABLE origxdest_build(
             orig_id TEXT NOT NULL,
             dest_id TEXT NOT NULL,
             euclidean INTEGER,
             PRIMARY KEY (orig_id, dest_id)
         )",
        [],
    )?;

    let origin_rowids: Vec<i64> =
        store.query_rows("SELECT rowid FROM orig ORDER BY rowid", [], |row| row.get(0))?;
    let destination_count = store.count_rows(DESTINATION_TABLE)? as usize;
    if origin_rowids.is_empty() || destination_count == 0 {
        warn!(
            origins = origin_rowids.len(),
            destinations = destination_count,
            "empty origin or destination set; candidate table will be empty"
        );
    }
    info!(
        origins = origin_rowids.len(),
        destinations = destination_count,
        batch_size,
        "computing straight-line distances"
    );

    // Each page covers whole origins so the rowid range query stays indexed.
    let origins_per_page = (batch_size / destination_count.max(1)).max(1);
    let mut summary = PrefilterSummary::default();

    for page in origin_rowids.chunks(origins_per_page) {
        let (first, last) = match (page.first(), page.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => continue,
        };
        let rows: Vec<(String, String, Option<f64>)> = store.query_rows(
            "SELECT o.orig_id, d.dest_id,
                    haversine(o.orig_lon, o.orig_lat, d.dest_lon, d.dest_lat)
             FROM orig o CROSS JOIN dest d
             WHERE o.rowid BETWEEN ?1 AND ?2
             ORDER BY o.rowid, d.rowid",
            params![first, last],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        for batch in rows.chunks(batch_size) {
            let tx = store.connection_mut().transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO origxdest_build(orig_id, dest_id, euclidean)
                     VALUES (?1, ?2, ?3)",
                )?;
                for (orig_id, dest_id, euclidean) in batch {
                    stmt.execute(params![orig_id, dest_id, euclidean])?;
                }
            }
            tx.commit()?;
            summary.pairs += batch.len() as u64;
            summary.batches += 1;
        }
        debug!(pairs = summary.pairs, "prefilter progress");
    }

    let tx = store.connection_mut().transaction()?;
    tx.execute("ALTER TABLE origxdest_build RENAME TO origxdest", [])?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS origxdest_euclidean ON origxdest(euclidean)",
        [],
    )?;
    tx.commit()?;

    info!(
        pairs = summary.pairs,
        batches = summary.batches,
        "candidate pair table complete"
    );
    Ok(summary)
}
