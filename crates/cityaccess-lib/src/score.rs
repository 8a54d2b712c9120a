//! Health and Social Service Accessibility (HSSA) score.
//!
//! Each reachable contract contributes
//! `variety_weight × distance_weight × budget_weight`. Variety weights fall off
//! with every additional contract of the same `Project` category, distance
//! weights decay linearly to zero at the travel-time threshold, and budget
//! weights are z-scored budgets shifted to be non-negative.

use std::collections::HashMap;

use crate::reach::{ContractCatalog, ReachableService};

/// Weights handed out to the first five contracts of one category, in order.
pub const VARIETY_WEIGHTS: [f64; 5] = [1.0, 0.75, 0.5, 0.25, 0.1];

/// Per-origin tracker of how many contracts of each category were scored.
///
/// Created fresh for every origin; nothing carries over between origins or
/// runs.
#[derive(Debug, Default)]
pub struct VarietyWeights {
    seen: HashMap<String, usize>,
}

impl VarietyWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weight for the next contract in `category`; zero from the sixth on.
    pub fn weight_for(&mut self, category: &str) -> f64 {
        let count = self.seen.entry(category.to_string()).or_insert(0);
        let weight = VARIETY_WEIGHTS.get(*count).copied().unwrap_or(0.0);
        *count += 1;
        weight
    }
}

/// Linear decay: 1 at zero seconds, 0 at and beyond `threshold`.
pub fn distance_weight(duration: f64, threshold: f64) -> f64 {
    if duration > threshold {
        0.0
    } else {
        (threshold - duration) / threshold
    }
}

/// Budget weight per catalog position.
///
/// Budgets are z-scored against the population mean and standard deviation
/// of all contracts, then shifted by `|min z|` so the poorest contract weighs
/// zero. If every budget is equal (including a single contract) the standard
/// deviation is zero and every contract weighs 1.
pub fn normalize_budgets(catalog: &ContractCatalog) -> Vec<f64> {
    let budgets: Vec<f64> = catalog
        .contracts()
        .iter()
        .map(|c| c.total_budget)
        .collect();
    let finite: Vec<f64> = budgets.iter().copied().filter(|b| b.is_finite()).collect();
    if finite.is_empty() {
        return vec![0.0; budgets.len()];
    }

    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let variance = finite.iter().map(|b| (b - mean).powi(2)).sum::<f64>() / n;
    let sd = variance.sqrt();
    if sd == 0.0 || !sd.is_finite() {
        return budgets
            .iter()
            .map(|b| if b.is_finite() { 1.0 } else { 0.0 })
            .collect();
    }

    let z: Vec<f64> = budgets.iter().map(|b| (b - mean) / sd).collect();
    let shift = z
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::INFINITY, f64::min)
        .abs();
    z.into_iter()
        .map(|v| if v.is_finite() { v + shift } else { 0.0 })
        .collect()
}

/// Raw (unnormalised) score of one origin.
pub fn score_origin(
    reachable: &[ReachableService],
    catalog: &ContractCatalog,
    budget_weights: &[f64],
    threshold: f64,
) -> f64 {
    let mut variety = VarietyWeights::new();
    reachable
        .iter()
        .filter_map(|service| {
            let contract = catalog.get(service.contract)?;
            let variety_weight = variety.weight_for(&contract.project);
            let distance = distance_weight(service.duration, threshold);
            let budget = budget_weights.get(service.contract).copied().unwrap_or(0.0);
            Some(variety_weight * distance * budget)
        })
        .sum()
}

/// Scale raw scores to 0–100 against the best origin.
///
/// When no origin scores above zero, every result is zero.
pub fn normalize_scores(raw: &[f64]) -> Vec<f64> {
    let max = raw
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return vec![0.0; raw.len()];
    }
    raw.iter()
        .map(|v| if v.is_finite() { v / max * 100.0 } else { 0.0 })
        .collect()
}
