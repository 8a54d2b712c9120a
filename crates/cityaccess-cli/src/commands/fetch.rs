//! `fetch`: travel durations from the routing service.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use cityaccess_lib::{run_fetch, FetchOptions, OsrmClient, PipelineConfig, RequestStyle};

use super::open_store;

/// Flags overriding the fetch-related configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct FetchArgs {
    /// Only route pairs closer than this many meters.
    #[arg(long)]
    pub limit: Option<f64>,
    /// Routing profile; also names the duration table.
    #[arg(long)]
    pub mode: Option<String>,
    /// Routing service address, e.g. `localhost:5000`.
    #[arg(long)]
    pub host_port: Option<String>,
    #[arg(long)]
    pub workers: Option<usize>,
    /// Destinations per request.
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Retries per failed request.
    #[arg(long)]
    pub retries: Option<u32>,
    /// Per-request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// `table` (one-to-many) or `route` (one-to-one) requests.
    #[arg(long)]
    pub style: Option<RequestStyle>,
    /// Keep staging files here so an interrupted fetch can be resumed.
    #[arg(long)]
    pub staging_dir: Option<PathBuf>,
}

impl FetchArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(limit) = self.limit {
            config.euclidean_limit_meters = limit;
        }
        if let Some(mode) = &self.mode {
            config.routing_mode = mode.clone();
        }
        if let Some(host_port) = &self.host_port {
            config.service_host_port = host_port.clone();
        }
        if let Some(workers) = self.workers {
            config.worker_pool_size = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size_per_request = batch_size;
        }
        if let Some(retries) = self.retries {
            config.retry_count = retries;
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout = timeout;
        }
        if let Some(style) = self.style {
            config.request_style = style;
        }
        if let Some(dir) = &self.staging_dir {
            config.staging_dir = Some(dir.clone());
        }
    }
}

pub fn handle_fetch(db: &Path, config: &PipelineConfig) -> Result<()> {
    let mut store = open_store(db)?;
    let options = FetchOptions::from_config(config)?;
    let client = OsrmClient::from_config(config).context("failed to build routing client")?;
    let summary = run_fetch(&mut store, &client, &options).with_context(|| {
        format!(
            "failed to fetch durations from {}",
            config.service_host_port
        )
    })?;
    println!(
        "fetch: {} durations written for {} pairs in {} units ({} gaps, {} failed units, {} already present)",
        summary.durations_written,
        summary.pairs_requested,
        summary.units,
        summary.gap_pairs,
        summary.failed_units,
        summary.pairs_already_present
    );
    Ok(())
}
