//! `run`: prefilter, fetch and score in sequence.

use std::path::Path;

use anyhow::Result;

use cityaccess_lib::PipelineConfig;

use super::{fetch, prefilter, score};

pub fn handle_run(db: &Path, config: &PipelineConfig) -> Result<()> {
    prefilter::handle_prefilter(db, config)?;
    fetch::handle_fetch(db, config)?;
    score::handle_score(db, config)
}
