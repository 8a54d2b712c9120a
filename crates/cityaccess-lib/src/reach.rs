//! Which contracts each origin can reach, and how quickly.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::db::Contract;

/// One service contract after collapsing duplicate table rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractInfo {
    pub number: String,
    pub project: String,
    pub line_of_business: Option<String>,
    /// Sum of the budgets of the distinct rows sharing this contract number.
    pub total_budget: f64,
    /// Destinations hosting the contract, in first-seen order.
    pub destinations: Vec<String>,
}

/// Contracts keyed by number, in first-seen table order.
#[derive(Debug, Clone, Default)]
pub struct ContractCatalog {
    contracts: Vec<ContractInfo>,
    index: HashMap<String, usize>,
    by_destination: HashMap<String, Vec<usize>>,
    /// Rows dropped because their destination is not a known location.
    pub unknown_destination_rows: usize,
    /// Rows whose budget was NULL (counted as zero).
    pub missing_budget_rows: usize,
    /// Rows whose budget was below zero (counted as zero).
    pub negative_budget_rows: usize,
}

impl ContractCatalog {
    /// Build the catalog from raw contract rows.
    ///
    /// Identical rows count once; distinct rows with the same contract number
    /// add their budgets and destinations to a single contract. This differs
    /// from summing every row per contract number: an exact duplicate row does
    /// not double the budget. When `known_destinations` is given, rows pointing
    /// elsewhere are skipped. Negative budgets count as zero.
    pub fn build(rows: &[Contract], known_destinations: Option<&HashSet<String>>) -> Self {
        let mut catalog = ContractCatalog::default();
        let mut seen_rows: HashSet<(String, String, String, Option<u64>)> = HashSet::new();

        for row in rows {
            if let Some(known) = known_destinations {
                if !known.contains(&row.destination_id) {
                    catalog.unknown_destination_rows += 1;
                    continue;
                }
            }
            let key = (
                row.number.clone(),
                row.destination_id.clone(),
                row.project.clone(),
                row.total_budget.map(f64::to_bits),
            );
            if !seen_rows.insert(key) {
                continue;
            }
            if row.total_budget.is_none() {
                catalog.missing_budget_rows += 1;
            }
            let budget = match row.total_budget {
                Some(budget) if budget < 0.0 => {
                    catalog.negative_budget_rows += 1;
                    0.0
                }
                Some(budget) => budget,
                None => 0.0,
            };

            let position = match catalog.index.get(&row.number) {
                Some(&position) => {
                    let contract = &mut catalog.contracts[position];
                    contract.total_budget += budget;
                    if !contract.destinations.contains(&row.destination_id) {
                        contract.destinations.push(row.destination_id.clone());
                    } else {
                        continue;
                    }
                    position
                }
                None => {
                    let position = catalog.contracts.len();
                    catalog.contracts.push(ContractInfo {
                        number: row.number.clone(),
                        project: row.project.clone(),
                        line_of_business: row.line_of_business.clone(),
                        total_budget: budget,
                        destinations: vec![row.destination_id.clone()],
                    });
                    catalog.index.insert(row.number.clone(), position);
                    position
                }
            };
            catalog
                .by_destination
                .entry(row.destination_id.clone())
                .or_default()
                .push(position);
        }

        if catalog.unknown_destination_rows > 0 {
            warn!(
                rows = catalog.unknown_destination_rows,
                "contracts reference unknown destinations and were skipped"
            );
        }
        if catalog.missing_budget_rows > 0 {
            warn!(
                rows = catalog.missing_budget_rows,
                "contracts without a budget counted as zero"
            );
        }
        if catalog.negative_budget_rows > 0 {
            warn!(
                rows = catalog.negative_budget_rows,
                "contracts with a negative budget counted as zero"
            );
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn contracts(&self) -> &[ContractInfo] {
        &self.contracts
    }

    pub fn get(&self, position: usize) -> Option<&ContractInfo> {
        self.contracts.get(position)
    }

    /// Catalog positions of the contracts hosted at `destination_id`.
    pub fn at_destination(&self, destination_id: &str) -> &[usize] {
        self.by_destination
            .get(destination_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// A contract reachable from one origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReachableService {
    /// Position in the [`ContractCatalog`].
    pub contract: usize,
    /// Shortest duration to any destination hosting the contract.
    pub duration: f64,
}

/// Deduplicated reachable contracts of one origin, in catalog order.
pub type ReachableSet = Vec<ReachableService>;

/// Resolve the contracts reachable within `threshold` seconds.
///
/// `durations` are `(destination_id, seconds)` rows for a single origin and may
/// contain the same destination more than once. Each contract appears at most
/// once, carrying the minimum duration over all of its destinations.
pub fn resolve_reachable<'a, I>(
    catalog: &ContractCatalog,
    durations: I,
    threshold: f64,
) -> ReachableSet
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut best: HashMap<usize, f64> = HashMap::new();
    for (destination_id, seconds) in durations {
        if !seconds.is_finite() || seconds > threshold {
            continue;
        }
        for &contract in catalog.at_destination(destination_id) {
            best.entry(contract)
                .and_modify(|current| {
                    if seconds < *current {
                        *current = seconds;
                    }
                })
                .or_insert(seconds);
        }
    }

    let mut reachable: ReachableSet = best
        .into_iter()
        .map(|(contract, duration)| ReachableService { contract, duration })
        .collect();
    reachable.sort_by_key(|service| service.contract);
    reachable
}
