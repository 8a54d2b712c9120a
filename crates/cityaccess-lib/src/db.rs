use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::geo::Coordinate;

pub const ORIGIN_TABLE: &str = "orig";
pub const DESTINATION_TABLE: &str = "dest";
pub const CANDIDATE_TABLE: &str = "origxdest";
pub const CONTRACT_TABLE: &str = "contracts";
pub const SUBSET_TABLE: &str = "destsubset";

pub const SCORE_COLUMN: &str = "HSSAscore";
pub const INVESTMENT_COLUMN: &str = "investment";

/// A validated SQL identifier (table or column name).
///
/// Only `[A-Za-z_][A-Za-z0-9_]*` is accepted, so a quoted identifier can be
/// placed in SQL text without escaping. Values are always bound as parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: &str) -> Result<Self> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidIdentifier {
                name: name.to_string(),
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for use in SQL text.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared type of a store column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }
}

/// Column list and optional composite primary key for [`Store::create_table`].
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub columns: Vec<(Identifier, ColumnType)>,
    pub primary_key: Vec<Identifier>,
}

/// A census block (or similar unit) people travel from.
#[derive(Debug, Clone, PartialEq)]
pub struct Origin {
    pub id: String,
    pub position: Coordinate,
}

/// A location that may host service contracts.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub id: String,
    pub position: Coordinate,
}

/// Straight-line distance between one origin and one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePair {
    pub origin_id: String,
    pub destination_id: String,
    pub euclidean_meters: f64,
}

/// Routed travel time for one origin-destination pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TravelDuration {
    pub origin_id: String,
    pub destination_id: String,
    pub seconds: f64,
}

/// One row of the `contracts` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub number: String,
    pub project: String,
    pub line_of_business: Option<String>,
    pub total_budget: Option<f64>,
    pub destination_id: String,
}

/// Final per-origin outputs written back to `orig`.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginScore {
    pub origin_id: String,
    pub hssa_score: f64,
    pub investment: f64,
}

/// Typed access to the SQLite dataset shared by every pipeline stage.
///
/// Reads may happen from any stage; writes are grouped so each logical phase
/// commits once (or once per fixed-size batch for the prefilter).
#[derive(Debug)]
pub struct Store {
    connection: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) a store backed by a file.
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)?;
        connection.busy_timeout(Duration::from_secs(30))?;
        debug!(path = %path.display(), "opened store");
        Ok(Self {
            connection,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory store, mostly useful in tests.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            connection: Connection::open_in_memory()?,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Create the input tables if they do not exist yet.
    pub fn init_schema(&self) -> Result<()> {
        self.connection.execute_batch(
            "BEGIN;
             CREATE TABLE IF NOT EXISTS orig(
                 orig_id TEXT PRIMARY KEY NOT NULL,
                 orig_lon REAL NOT NULL,
                 orig_lat REAL NOT NULL
             );
             CREATE TABLE IF NOT EXISTS dest(
                 dest_id TEXT PRIMARY KEY NOT NULL,
                 dest_lon REAL NOT NULL,
                 dest_lat REAL NOT NULL
             );
             CREATE TABLE IF NOT EXISTS contracts(
                 ContractNo TEXT NOT NULL,
                 Project TEXT,
                 LineofBiz TEXT,
                 TotalBudgt REAL,
                 dest_id TEXT
             );
             COMMIT;",
        )?;
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let mut stmt = self
            .connection
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1")?;
        let mut rows = stmt.query([table])?;
        Ok(rows.next()?.is_some())
    }

    /// Column names of `table` in declaration order.
    pub fn column_names(&self, table: &str) -> Result<Vec<String>> {
        let table = Identifier::new(table)?;
        let pragma = format!("PRAGMA table_info({})", table.quoted());
        let mut stmt = self.connection.prepare(&pragma)?;
        let mut rows = stmt.query([])?;

        let mut columns = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            columns.push(name);
        }
        Ok(columns)
    }

    pub fn require_table(&self, table: &str) -> Result<()> {
        if self.table_exists(table)? {
            Ok(())
        } else {
            Err(Error::MissingTable {
                table: table.to_string(),
            })
        }
    }

    /// Fail with [`Error::MissingColumn`] unless `table` has `column`.
    pub fn require_column(&self, table: &str, column: &str) -> Result<()> {
        self.require_table(table)?;
        let available = self.column_names(table)?;
        if available.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            Ok(())
        } else {
            Err(Error::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
                available,
            })
        }
    }

    pub fn create_table(&self, table: &Identifier, schema: &TableSchema) -> Result<()> {
        let mut parts: Vec<String> = schema
            .columns
            .iter()
            .map(|(name, ty)| format!("{} {}", name.quoted(), ty.sql()))
            .collect();
        if !schema.primary_key.is_empty() {
            let key: Vec<String> = schema.primary_key.iter().map(Identifier::quoted).collect();
            parts.push(format!("PRIMARY KEY ({})", key.join(", ")));
        }
        let sql = format!("CREATE TABLE {}({})", table.quoted(), parts.join(", "));
        self.connection.execute(&sql, [])?;
        debug!(table = %table, "created table");
        Ok(())
    }

    /// Add a column unless it already exists. Returns `true` when added.
    pub fn add_column(&self, table: &str, column: &Identifier, ty: ColumnType) -> Result<bool> {
        let table = Identifier::new(table)?;
        let existing = self.column_names(table.as_str())?;
        if existing
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column.as_str()))
        {
            return Ok(false);
        }
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            table.quoted(),
            column.quoted(),
            ty.sql()
        );
        self.connection.execute(&sql, [])?;
        debug!(table = %table, column = %column, "added column");
        Ok(true)
    }

    /// Full scan of `columns` from `table`, in table order.
    pub fn list_rows(&self, table: &str, columns: &[&str]) -> Result<Vec<Vec<Value>>> {
        let table = Identifier::new(table)?;
        let columns = columns
            .iter()
            .map(|c| Identifier::new(c))
            .collect::<Result<Vec<_>>>()?;
        let selects: Vec<String> = columns.iter().map(Identifier::quoted).collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            selects.join(", "),
            table.quoted()
        );
        let width = columns.len();
        self.query_rows(&sql, [], |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    /// Run a parameterised query and decode every row with `mapper`.
    pub fn query_rows<T, P, F>(&self, sql: &str, params: P, mapper: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.connection.prepare(sql)?;
        let rows = stmt.query_map(params, mapper)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Insert rows into `table` in one transaction. Rows that collide with a
    /// uniqueness constraint are skipped; the number actually inserted is
    /// returned.
    pub fn append_rows<I>(&mut self, table: &str, columns: &[&str], rows: I) -> Result<usize>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let table = Identifier::new(table)?;
        let columns = columns
            .iter()
            .map(|c| Identifier::new(c))
            .collect::<Result<Vec<_>>>()?;
        let names: Vec<String> = columns.iter().map(Identifier::quoted).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT OR IGNORE INTO {}({}) VALUES ({})",
            table.quoted(),
            names.join(", "),
            placeholders.join(", ")
        );

        let tx = self.connection.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                inserted += stmt.execute(rusqlite::params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn count_rows(&self, table: &str) -> Result<u64> {
        let table = Identifier::new(table)?;
        let sql = format!("SELECT COUNT(*) FROM {}", table.quoted());
        let count: i64 = self.connection.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        let table = Identifier::new(table)?;
        self.connection
            .execute(&format!("DROP TABLE IF EXISTS {}", table.quoted()), [])?;
        Ok(())
    }

    pub fn list_origins(&self) -> Result<Vec<Origin>> {
        self.require_table(ORIGIN_TABLE)?;
        self.query_rows(
            "SELECT orig_id, orig_lon, orig_lat FROM orig ORDER BY rowid",
            [],
            |row| {
                Ok(Origin {
                    id: row.get(0)?,
                    position: Coordinate::new(row.get(1)?, row.get(2)?),
                })
            },
        )
    }

    pub fn list_destinations(&self) -> Result<Vec<Destination>> {
        self.require_table(DESTINATION_TABLE)?;
        self.query_rows(
            "SELECT dest_id, dest_lon, dest_lat FROM dest ORDER BY rowid",
            [],
            |row| {
                Ok(Destination {
                    id: row.get(0)?,
                    position: Coordinate::new(row.get(1)?, row.get(2)?),
                })
            },
        )
    }

    /// All contract rows in table order.
    pub fn list_contracts(&self) -> Result<Vec<Contract>> {
        self.require_table(CONTRACT_TABLE)?;
        self.query_rows(
            "SELECT ContractNo, Project, LineofBiz, TotalBudgt, dest_id
             FROM contracts ORDER BY rowid",
            [],
            row_to_contract,
        )
    }

    /// Origin identifiers paired with a demographic column (NULL reads as 0).
    pub fn origin_populations(&self, column: &Identifier) -> Result<Vec<(String, f64)>> {
        self.require_column(ORIGIN_TABLE, column.as_str())?;
        let sql = format!(
            "SELECT orig_id, {} FROM orig ORDER BY rowid",
            column.quoted()
        );
        let rows = self.query_rows(&sql, [], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?))
        })?;
        let missing = rows.iter().filter(|(_, value)| value.is_none()).count();
        if missing > 0 {
            warn!(
                missing,
                column = %column,
                "origins without a population value treated as zero"
            );
        }
        Ok(rows
            .into_iter()
            .map(|(id, value)| (id, value.unwrap_or(0.0)))
            .collect())
    }

    pub fn insert_origins(&mut self, origins: &[Origin]) -> Result<usize> {
        self.append_rows(
            ORIGIN_TABLE,
            &["orig_id", "orig_lon", "orig_lat"],
            origins.iter().map(|o| {
                vec![
                    Value::Text(o.id.clone()),
                    Value::Real(o.position.lon),
                    Value::Real(o.position.lat),
                ]
            }),
        )
    }

    pub fn insert_destinations(&mut self, destinations: &[Destination]) -> Result<usize> {
        self.append_rows(
            DESTINATION_TABLE,
            &["dest_id", "dest_lon", "dest_lat"],
            destinations.iter().map(|d| {
                vec![
                    Value::Text(d.id.clone()),
                    Value::Real(d.position.lon),
                    Value::Real(d.position.lat),
                ]
            }),
        )
    }

    pub fn insert_contracts(&mut self, contracts: &[Contract]) -> Result<usize> {
        self.append_rows(
            CONTRACT_TABLE,
            &["ContractNo", "Project", "LineofBiz", "TotalBudgt", "dest_id"],
            contracts.iter().map(|c| {
                vec![
                    Value::Text(c.number.clone()),
                    Value::Text(c.project.clone()),
                    c.line_of_business
                        .clone()
                        .map_or(Value::Null, Value::Text),
                    c.total_budget.map_or(Value::Null, Value::Real),
                    Value::Text(c.destination_id.clone()),
                ]
            }),
        )
    }

    /// Prefiltered pairs closer than `limit_meters`, or every pair when no
    /// limit is given.
    pub fn candidate_pairs(&self, limit_meters: Option<f64>) -> Result<Vec<CandidatePair>> {
        self.require_table(CANDIDATE_TABLE)?;
        self.query_rows(
            "SELECT orig_id, dest_id, euclidean FROM origxdest
             WHERE ?1 IS NULL OR euclidean < ?1
             ORDER BY orig_id, dest_id",
            [limit_meters],
            |row| {
                Ok(CandidatePair {
                    origin_id: row.get(0)?,
                    destination_id: row.get(1)?,
                    euclidean_meters: row.get(2)?,
                })
            },
        )
    }

    /// Create the duration table for a routing mode if it is missing.
    pub fn ensure_duration_table(&self, table: &Identifier) -> Result<()> {
        if self.table_exists(table.as_str())? {
            return Ok(());
        }
        self.create_table(
            table,
            &TableSchema {
                columns: vec![
                    (Identifier::new("orig_id")?, ColumnType::Text),
                    (Identifier::new("dest_id")?, ColumnType::Text),
                    (Identifier::new("duration")?, ColumnType::Real),
                ],
                primary_key: vec![Identifier::new("orig_id")?, Identifier::new("dest_id")?],
            },
        )
    }

    /// Insert travel durations in one transaction. Pairs already present are
    /// left untouched; the count of newly inserted rows is returned.
    pub fn insert_durations(
        &mut self,
        table: &Identifier,
        durations: &[TravelDuration],
    ) -> Result<usize> {
        self.ensure_duration_table(table)?;
        self.append_rows(
            table.as_str(),
            &["orig_id", "dest_id", "duration"],
            durations.iter().map(|d| {
                vec![
                    Value::Text(d.origin_id.clone()),
                    Value::Text(d.destination_id.clone()),
                    Value::Real(d.seconds),
                ]
            }),
        )
    }

    /// Durations recorded for one origin.
    pub fn durations_for_origin(
        &self,
        table: &Identifier,
        origin_id: &str,
    ) -> Result<Vec<TravelDuration>> {
        self.require_table(table.as_str())?;
        let sql = format!(
            "SELECT orig_id, dest_id, duration FROM {} WHERE orig_id = ?1 ORDER BY dest_id",
            table.quoted()
        );
        self.query_rows(&sql, [origin_id], row_to_duration)
    }

    /// Duration of one pair, if it has been fetched.
    pub fn duration_between(
        &self,
        table: &Identifier,
        origin_id: &str,
        destination_id: &str,
    ) -> Result<Option<f64>> {
        self.require_table(table.as_str())?;
        let sql = format!(
            "SELECT duration FROM {} WHERE orig_id = ?1 AND dest_id = ?2",
            table.quoted()
        );
        Ok(self
            .connection
            .query_row(&sql, params![origin_id, destination_id], |row| row.get(0))
            .optional()?)
    }

    /// Rebuild `destsubset` from the duration table: pairs within
    /// `max_seconds` whose destination hosts at least one contract.
    pub fn rebuild_destination_subset(
        &mut self,
        durations: &Identifier,
        max_seconds: f64,
    ) -> Result<usize> {
        self.require_table(durations.as_str())?;
        self.require_table(CONTRACT_TABLE)?;
        let insert = format!(
            "INSERT INTO destsubset(orig_id, dest_id, walking_time)
             SELECT orig_id, dest_id, duration FROM {}
             WHERE duration <= ?1
               AND dest_id IN (SELECT dest_id FROM contracts)",
            durations.quoted()
        );

        let tx = self.connection.transaction()?;
        tx.execute("DROP TABLE IF EXISTS destsubset", [])?;
        tx.execute(
            "CREATE TABLE destsubset(orig_id TEXT, dest_id TEXT, walking_time REAL)",
            [],
        )?;
        let rows = tx.execute(&insert, [max_seconds])?;
        tx.execute("CREATE INDEX destsubset_orig ON destsubset(orig_id)", [])?;
        tx.commit()?;
        info!(rows, max_seconds, "materialized reachable destination subset");
        Ok(rows)
    }

    /// Every `destsubset` row, ordered by origin.
    pub fn list_destination_subset(&self) -> Result<Vec<TravelDuration>> {
        self.require_table(SUBSET_TABLE)?;
        self.query_rows(
            "SELECT orig_id, dest_id, walking_time FROM destsubset ORDER BY orig_id, rowid",
            [],
            row_to_duration,
        )
    }

    /// Write `HSSAscore` and `investment` for every origin in one transaction,
    /// adding the columns on first use.
    pub fn write_scores(&mut self, scores: &[OriginScore]) -> Result<usize> {
        self.add_column(
            ORIGIN_TABLE,
            &Identifier::new(SCORE_COLUMN)?,
            ColumnType::Real,
        )?;
        self.add_column(
            ORIGIN_TABLE,
            &Identifier::new(INVESTMENT_COLUMN)?,
            ColumnType::Real,
        )?;

        let tx = self.connection.transaction()?;
        let mut updated = 0usize;
        {
            let mut stmt =
                tx.prepare("UPDATE orig SET HSSAscore = ?1, investment = ?2 WHERE orig_id = ?3")?;
            for score in scores {
                updated += stmt.execute(params![
                    score.hssa_score,
                    score.investment,
                    score.origin_id
                ])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }
}

fn row_to_duration(row: &Row<'_>) -> rusqlite::Result<TravelDuration> {
    Ok(TravelDuration {
        origin_id: row.get(0)?,
        destination_id: row.get(1)?,
        seconds: row.get(2)?,
    })
}

fn row_to_contract(row: &Row<'_>) -> rusqlite::Result<Contract> {
    Ok(Contract {
        number: key_column(row, 0)?,
        project: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        line_of_business: row.get(2)?,
        total_budget: row.get(3)?,
        destination_id: key_column(row, 4)?,
    })
}

/// Read an identifier column that older datasets may have stored as a number.
fn key_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    match row.get::<_, Value>(idx)? {
        Value::Text(text) => Ok(text),
        Value::Integer(number) => Ok(number.to_string()),
        Value::Real(number) => Ok(number.to_string()),
        Value::Null => Ok(String::new()),
        Value::Blob(_) => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "key".to_string(),
            rusqlite::types::Type::Blob,
        )),
    }
}
