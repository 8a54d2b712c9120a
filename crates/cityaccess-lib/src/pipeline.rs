//! Scoring run: from fetched durations to `HSSAscore` and `investment`.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::db::{OriginScore, Store};
use crate::error::Result;
use crate::funding;
use crate::reach::{resolve_reachable, ContractCatalog, ReachableSet};
use crate::score::{normalize_budgets, normalize_scores, score_origin};

/// Counts reported at the end of a scoring run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoringSummary {
    pub origins: usize,
    pub origins_with_services: usize,
    pub contracts: usize,
    pub reachable_pairs: usize,
    pub unknown_destination_rows: usize,
    /// `destsubset` rows whose origin is not in `orig`.
    pub unknown_origin_rows: usize,
    pub max_raw_score: f64,
    pub total_investment: f64,
}

/// Score every origin and write the results back to the store.
///
/// Origins that reach nothing still receive a row with score 0 and
/// investment 0.
pub fn run_scoring(store: &mut Store, config: &PipelineConfig) -> Result<ScoringSummary> {
    config.validate()?;
    let duration_table = config.duration_table()?;
    let population_column = config.population_column()?;
    let threshold = config.max_walk_duration_seconds;

    store.ensure_duration_table(&duration_table)?;
    let reachable_pairs = store.rebuild_destination_subset(&duration_table, threshold)?;

    let known_destinations: HashSet<String> = store
        .list_destinations()?
        .into_iter()
        .map(|d| d.id)
        .collect();
    let catalog = ContractCatalog::build(&store.list_contracts()?, Some(&known_destinations));
    let budget_weights = normalize_budgets(&catalog);

    let populations = store.origin_populations(&population_column)?;
    let mut by_origin: HashMap<String, Vec<(String, f64)>> = HashMap::new();
    for row in store.list_destination_subset()? {
        by_origin
            .entry(row.origin_id)
            .or_default()
            .push((row.destination_id, row.seconds));
    }

    let reachable: Vec<ReachableSet> = populations
        .par_iter()
        .map(|(origin_id, _)| match by_origin.get(origin_id) {
            Some(rows) => resolve_reachable(
                &catalog,
                rows.iter().map(|(dest, seconds)| (dest.as_str(), *seconds)),
                threshold,
            ),
            None => ReachableSet::new(),
        })
        .collect();

    let raw: Vec<f64> = reachable
        .par_iter()
        .map(|set| score_origin(set, &catalog, &budget_weights, threshold))
        .collect();
    let scores = normalize_scores(&raw);

    let population_values: Vec<f64> = populations.iter().map(|(_, p)| *p).collect();
    let investment = funding::allocate(&catalog, &reachable, &population_values);

    let known_origins: HashSet<&str> = populations.iter().map(|(id, _)| id.as_str()).collect();
    let unknown_origin_rows: usize = by_origin
        .iter()
        .filter(|(origin, _)| !known_origins.contains(origin.as_str()))
        .map(|(_, rows)| rows.len())
        .sum();
    if unknown_origin_rows > 0 {
        warn!(
            rows = unknown_origin_rows,
            "reachable durations reference unknown origins and were ignored"
        );
    }

    let results: Vec<OriginScore> = populations
        .iter()
        .zip(scores.iter().zip(&investment))
        .map(|((origin_id, _), (&hssa_score, &investment))| OriginScore {
            origin_id: origin_id.clone(),
            hssa_score,
            investment,
        })
        .collect();
    store.write_scores(&results)?;

    let summary = ScoringSummary {
        origins: results.len(),
        origins_with_services: reachable.iter().filter(|set| !set.is_empty()).count(),
        contracts: catalog.len(),
        reachable_pairs,
        unknown_destination_rows: catalog.unknown_destination_rows,
        unknown_origin_rows,
        max_raw_score: raw.iter().copied().fold(0.0, f64::max),
        total_investment: investment.iter().sum(),
    };
    info!(
        origins = summary.origins,
        with_services = summary.origins_with_services,
        contracts = summary.contracts,
        total_investment = summary.total_investment,
        "scoring complete"
    );
    Ok(summary)
}
