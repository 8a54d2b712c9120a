//! `prefilter`: straight-line distances for every origin × destination pair.

use std::path::Path;

use anyhow::{Context, Result};

use cityaccess_lib::{run_prefilter, PipelineConfig};

use super::open_store;

pub fn handle_prefilter(db: &Path, config: &PipelineConfig) -> Result<()> {
    let mut store = open_store(db)?;
    let summary = run_prefilter(&mut store, config.prefilter_batch_size)
        .context("failed to build candidate pairs")?;
    if summary.skipped {
        println!("prefilter: candidate pairs already present, nothing to do");
    } else {
        println!(
            "prefilter: {} candidate pairs in {} batches",
            summary.pairs, summary.batches
        );
    }
    Ok(())
}
