//! `score`: HSSA scores and investment for every origin.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use cityaccess_lib::{run_scoring, PipelineConfig};

use super::open_store;

/// Flags overriding the scoring configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct ScoreArgs {
    /// Travel-time threshold in seconds.
    #[arg(long)]
    pub max_duration: Option<f64>,
    /// Origin column holding the population used for funding.
    #[arg(long)]
    pub population_column: Option<String>,
}

impl ScoreArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(seconds) = self.max_duration {
            config.max_walk_duration_seconds = seconds;
        }
        if let Some(column) = &self.population_column {
            config.population_column = column.clone();
        }
    }
}

pub fn handle_score(db: &Path, config: &PipelineConfig) -> Result<()> {
    let mut store = open_store(db)?;
    let summary = run_scoring(&mut store, config).context("failed to score origins")?;
    println!(
        "score: {} origins scored, {} with reachable services, {} contracts, total investment {:.2}",
        summary.origins,
        summary.origins_with_services,
        summary.contracts,
        summary.total_investment
    );
    Ok(())
}
