//! Per-capita contract spending redistributed to origins as investment.
//!
//! Unlike the HSSA score, investment is not normalised: it stays in the
//! currency unit of the contract budgets.

use crate::reach::{ContractCatalog, ReachableService};

/// People each contract serves, indexed by catalog position.
///
/// An origin counts once per contract; `reachable` sets are already
/// deduplicated by contract. `populations[i]` belongs to `reachable[i]`.
pub fn people_served(
    catalog: &ContractCatalog,
    reachable: &[Vec<ReachableService>],
    populations: &[f64],
) -> Vec<f64> {
    let mut served = vec![0.0; catalog.len()];
    for (set, population) in reachable.iter().zip(populations) {
        for service in set {
            if let Some(total) = served.get_mut(service.contract) {
                *total += population;
            }
        }
    }
    served
}

/// Budget divided by people served; zero when nobody is served.
pub fn per_capita_spend(catalog: &ContractCatalog, people_served: &[f64]) -> Vec<f64> {
    catalog
        .contracts()
        .iter()
        .zip(people_served)
        .map(|(contract, &people)| {
            if people > 0.0 {
                contract.total_budget / people
            } else {
                0.0
            }
        })
        .collect()
}

/// Investment of one origin: its share of every contract it reaches.
pub fn origin_investment(
    reachable: &[ReachableService],
    per_capita: &[f64],
    population: f64,
) -> f64 {
    reachable
        .iter()
        .map(|service| per_capita.get(service.contract).copied().unwrap_or(0.0) * population)
        .sum()
}

/// Investment for every origin, in the order of `reachable`.
pub fn allocate(
    catalog: &ContractCatalog,
    reachable: &[Vec<ReachableService>],
    populations: &[f64],
) -> Vec<f64> {
    let served = people_served(catalog, reachable, populations);
    let per_capita = per_capita_spend(catalog, &served);
    reachable
        .iter()
        .zip(populations)
        .map(|(set, &population)| origin_investment(set, &per_capita, population))
        .collect()
}
