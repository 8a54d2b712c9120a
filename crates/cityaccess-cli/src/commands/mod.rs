//! Command handlers for the CLI subcommands.
//!
//! `main.rs` parses arguments and dispatches here; each handler opens the
//! store, calls into `cityaccess_lib`, and prints a one-line summary.

pub mod fetch;
pub mod init;
pub mod prefilter;
pub mod run;
pub mod score;

use std::path::Path;

use anyhow::{Context, Result};

use cityaccess_lib::{PipelineConfig, Store};

/// Build the pipeline configuration: defaults, then the optional JSON file,
/// then `CITYACCESS_*` environment variables. Flags are applied by the caller.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config
        .apply_env()
        .context("invalid CITYACCESS_* environment variable")?;
    Ok(config)
}

/// Open the SQLite store at `path`, creating it if needed.
pub fn open_store(path: &Path) -> Result<Store> {
    Store::open(path).with_context(|| format!("failed to open store at {}", path.display()))
}
