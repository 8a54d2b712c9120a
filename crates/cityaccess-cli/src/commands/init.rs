//! `init`: create the schema and import input CSV files.

use std::path::Path;

use anyhow::{Context, Result};

use cityaccess_lib::{import_contracts, import_destinations, import_origins};

use super::open_store;

/// Handle the init subcommand.
pub fn handle_init(
    db: &Path,
    origins: &Path,
    destinations: &Path,
    contracts: Option<&Path>,
) -> Result<()> {
    let mut store = open_store(db)?;
    store.init_schema().context("failed to create schema")?;

    let origins = import_origins(&mut store, origins)
        .with_context(|| format!("failed to import origins from {}", origins.display()))?;
    let destinations = import_destinations(&mut store, destinations).with_context(|| {
        format!(
            "failed to import destinations from {}",
            destinations.display()
        )
    })?;
    let contracts = match contracts {
        Some(path) => Some(
            import_contracts(&mut store, path)
                .with_context(|| format!("failed to import contracts from {}", path.display()))?,
        ),
        None => None,
    };

    let mut line = format!(
        "init: {} origins, {} destinations",
        origins.inserted, destinations.inserted
    );
    if let Some(contracts) = contracts {
        line.push_str(&format!(", {} contracts", contracts.inserted));
    }
    if !origins.extra_columns.is_empty() {
        line.push_str(&format!(
            " (origin attributes: {})",
            origins.extra_columns.join(", ")
        ));
    }
    println!("{line}");
    Ok(())
}
