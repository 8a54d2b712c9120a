//! CSV ingestion for origins, destinations and contracts.
//!
//! Every import runs in a single transaction and skips rows whose key is
//! already present, so importing the same file twice is harmless.

use std::path::Path;

use rusqlite::types::Value;
use serde::Serialize;
use tracing::info;

use crate::db::{
    ColumnType, Identifier, Store, CONTRACT_TABLE, DESTINATION_TABLE, ORIGIN_TABLE,
};
use crate::error::{Error, Result};

/// Rows read and inserted by one import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub rows: usize,
    pub inserted: usize,
    /// Demographic columns taken from the file (origins only).
    pub extra_columns: Vec<String>,
}

const ORIGIN_COLUMNS: [&str; 3] = ["orig_id", "orig_lon", "orig_lat"];
const DESTINATION_COLUMNS: [&str; 3] = ["dest_id", "dest_lon", "dest_lat"];
const CONTRACT_COLUMNS: [&str; 5] = ["ContractNo", "Project", "LineofBiz", "TotalBudgt", "dest_id"];

/// Import origins. Columns beyond `orig_id,orig_lon,orig_lat` are treated as
/// numeric demographic attributes and stored as REAL columns on `orig`.
pub fn import_origins(store: &mut Store, path: &Path) -> Result<ImportSummary> {
    store.init_schema()?;
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let key_positions = locate(&headers, &ORIGIN_COLUMNS, path)?;

    let mut extras = Vec::new();
    for (position, name) in headers.iter().enumerate() {
        if key_positions.contains(&position) {
            continue;
        }
        extras.push((position, Identifier::new(name.trim())?));
    }
    for (_, column) in &extras {
        store.add_column(ORIGIN_TABLE, column, ColumnType::Real)?;
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = line_of(&record);
        let mut values = vec![
            Value::Text(text(&record, key_positions[0])),
            Value::Real(number(&record, key_positions[1], ORIGIN_COLUMNS[1], path, line)?),
            Value::Real(number(&record, key_positions[2], ORIGIN_COLUMNS[2], path, line)?),
        ];
        for (position, column) in &extras {
            let value = optional_number(&record, *position, column.as_str(), path, line)?;
            values.push(value.map_or(Value::Null, Value::Real));
        }
        rows.push(values);
    }

    let mut columns: Vec<&str> = ORIGIN_COLUMNS.to_vec();
    columns.extend(extras.iter().map(|(_, c)| c.as_str()));
    let total = rows.len();
    let inserted = store.append_rows(ORIGIN_TABLE, &columns, rows)?;
    let extra_columns: Vec<String> = extras.iter().map(|(_, c)| c.to_string()).collect();
    info!(path = %path.display(), rows = total, inserted, extra = ?extra_columns, "imported origins");
    Ok(ImportSummary {
        rows: total,
        inserted,
        extra_columns,
    })
}

pub fn import_destinations(store: &mut Store, path: &Path) -> Result<ImportSummary> {
    store.init_schema()?;
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let positions = locate(&headers, &DESTINATION_COLUMNS, path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = line_of(&record);
        rows.push(vec![
            Value::Text(text(&record, positions[0])),
            Value::Real(number(&record, positions[1], DESTINATION_COLUMNS[1], path, line)?),
            Value::Real(number(&record, positions[2], DESTINATION_COLUMNS[2], path, line)?),
        ]);
    }

    let total = rows.len();
    let inserted = store.append_rows(DESTINATION_TABLE, &DESTINATION_COLUMNS, rows)?;
    info!(path = %path.display(), rows = total, inserted, "imported destinations");
    Ok(ImportSummary {
        rows: total,
        inserted,
        extra_columns: Vec::new(),
    })
}

/// Import contracts. Budgets may be written as currency (`$1,250.00`); an
/// empty budget is stored as NULL and a negative one rejects the file.
pub fn import_contracts(store: &mut Store, path: &Path) -> Result<ImportSummary> {
    store.init_schema()?;
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let positions = locate(&headers, &CONTRACT_COLUMNS, path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = line_of(&record);
        let line_of_business = text(&record, positions[2]);
        let budget = optional_number(&record, positions[3], CONTRACT_COLUMNS[3], path, line)?;
        if let Some(value) = budget.filter(|b| *b < 0.0) {
            return Err(Error::ImportNegative {
                path: path.to_path_buf(),
                line,
                column: CONTRACT_COLUMNS[3].to_string(),
                value,
            });
        }
        rows.push(vec![
            Value::Text(text(&record, positions[0])),
            Value::Text(text(&record, positions[1])),
            if line_of_business.is_empty() {
                Value::Null
            } else {
                Value::Text(line_of_business)
            },
            budget.map_or(Value::Null, Value::Real),
            Value::Text(text(&record, positions[4])),
        ]);
    }

    let total = rows.len();
    let inserted = store.append_rows(CONTRACT_TABLE, &CONTRACT_COLUMNS, rows)?;
    info!(path = %path.display(), rows = total, inserted, "imported contracts");
    Ok(ImportSummary {
        rows: total,
        inserted,
        extra_columns: Vec::new(),
    })
}

fn locate(headers: &csv::StringRecord, required: &[&str], path: &Path) -> Result<Vec<usize>> {
    required
        .iter()
        .map(|name| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| Error::ImportColumnMissing {
                    path: path.to_path_buf(),
                    column: name.to_string(),
                })
        })
        .collect()
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

fn text(record: &csv::StringRecord, position: usize) -> String {
    record.get(position).unwrap_or_default().trim().to_string()
}

fn number(
    record: &csv::StringRecord,
    position: usize,
    column: &str,
    path: &Path,
    line: u64,
) -> Result<f64> {
    optional_number(record, position, column, path, line)?.ok_or_else(|| Error::ImportValue {
        path: path.to_path_buf(),
        line,
        column: column.to_string(),
        value: String::new(),
    })
}

fn optional_number(
    record: &csv::StringRecord,
    position: usize,
    column: &str,
    path: &Path,
    line: u64,
) -> Result<Option<f64>> {
    let raw = record.get(position).unwrap_or_default().trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let cleaned: String = raw
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(Error::ImportValue {
            path: path.to_path_buf(),
            line,
            column: column.to_string(),
            value: raw.to_string(),
        }),
    }
}
