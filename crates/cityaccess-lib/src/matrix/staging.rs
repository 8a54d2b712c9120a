//! Per-worker append-only staging files.
//!
//! Every fetch worker owns exactly one file; no descriptor is shared between
//! threads. The merge back into the store happens on the calling thread once
//! all workers have been joined.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::db::TravelDuration;
use crate::error::Result;

const STAGING_PREFIX: &str = "worker-";
const STAGING_EXTENSION: &str = "csv";

/// Directory holding the staging files of one fetch run.
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    _temp: Option<TempDir>,
}

/// Rows read back from staging, with the files they came from.
#[derive(Debug, Default)]
pub struct StagedRows {
    pub rows: Vec<TravelDuration>,
    pub files: Vec<PathBuf>,
    /// Lines that could not be decoded, typically a torn final write.
    pub corrupt_lines: usize,
}

impl StagingArea {
    /// Use (and create if needed) a directory that outlives the process, so
    /// an interrupted fetch can be merged on the next run.
    pub fn persistent(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            _temp: None,
        })
    }

    /// Use a temporary directory removed when the area is dropped.
    pub fn temporary() -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix("cityaccess-staging")
            .tempdir()?;
        Ok(Self {
            dir: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn worker_path(&self, worker: usize) -> PathBuf {
        self.dir
            .join(format!("{STAGING_PREFIX}{worker}.{STAGING_EXTENSION}"))
    }

    /// Open the append-only writer owned by `worker`.
    pub fn writer(&self, worker: usize) -> Result<StagingWriter> {
        let path = self.worker_path(worker);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        Ok(StagingWriter {
            writer,
            path,
            rows: 0,
        })
    }

    /// Staging files currently present, in name order.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_staging = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(STAGING_PREFIX))
                && path.extension().and_then(|e| e.to_str()) == Some(STAGING_EXTENSION);
            if is_staging {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Read every staging file. Undecodable lines are counted and skipped.
    pub fn read_all(&self) -> Result<StagedRows> {
        let mut staged = StagedRows {
            files: self.files()?,
            ..StagedRows::default()
        };
        for path in &staged.files {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_path(path)?;
            for record in reader.records() {
                let record = match record {
                    Ok(record) => record,
                    Err(_) => {
                        staged.corrupt_lines += 1;
                        continue;
                    }
                };
                match decode_record(&record) {
                    Some(row) => staged.rows.push(row),
                    None => staged.corrupt_lines += 1,
                }
            }
        }
        if staged.corrupt_lines > 0 {
            warn!(
                corrupt_lines = staged.corrupt_lines,
                dir = %self.dir.display(),
                "skipped undecodable staging lines"
            );
        }
        debug!(
            rows = staged.rows.len(),
            files = staged.files.len(),
            "read staging area"
        );
        Ok(staged)
    }

    /// Delete staging files after their rows have been committed.
    pub fn remove(&self, files: &[PathBuf]) -> Result<()> {
        for file in files {
            if file.exists() {
                fs::remove_file(file)?;
            }
        }
        Ok(())
    }
}

fn decode_record(record: &csv::StringRecord) -> Option<TravelDuration> {
    if record.len() != 3 {
        return None;
    }
    let seconds: f64 = record.get(2)?.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    Some(TravelDuration {
        origin_id: record.get(0)?.to_string(),
        destination_id: record.get(1)?.to_string(),
        seconds,
    })
}

/// Append-only writer owned by a single worker.
#[derive(Debug)]
pub struct StagingWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
    rows: usize,
}

impl StagingWriter {
    /// Append rows and flush, so a crash loses at most the unit in flight.
    pub fn append(&mut self, rows: &[TravelDuration]) -> Result<()> {
        for row in rows {
            self.writer.write_record([
                row.origin_id.as_str(),
                row.destination_id.as_str(),
                row.seconds.to_string().as_str(),
            ])?;
        }
        self.writer.flush()?;
        self.rows += rows.len();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn duration(origin: &str, destination: &str, seconds: f64) -> TravelDuration {
        TravelDuration {
            origin_id: origin.to_string(),
            destination_id: destination.to_string(),
            seconds,
        }
    }

    #[test]
    fn workers_write_separate_files() {
        let area = StagingArea::temporary().expect("staging");
        let mut first = area.writer(0).expect("writer 0");
        let mut second = area.writer(1).expect("writer 1");
        first.append(&[duration("A", "D1", 600.0)]).unwrap();
        second
            .append(&[duration("B", "D1", 1200.5), duration("B", "D2", 30.0)])
            .unwrap();

        assert_ne!(first.path(), second.path());
        let staged = area.read_all().expect("read");
        assert_eq!(staged.files.len(), 2);
        assert_eq!(staged.rows.len(), 3);
        assert!(staged.rows.contains(&duration("B", "D1", 1200.5)));
    }

    #[test]
    fn torn_final_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::persistent(dir.path()).unwrap();
        let mut writer = area.writer(3).unwrap();
        writer.append(&[duration("A", "D1", 10.0)]).unwrap();
        drop(writer);

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("worker-3.csv"))
            .unwrap();
        write!(file, "A,D2").unwrap();

        let staged = area.read_all().unwrap();
        assert_eq!(staged.rows, vec![duration("A", "D1", 10.0)]);
        assert_eq!(staged.corrupt_lines, 1);
    }

    #[test]
    fn identifiers_with_commas_survive() {
        let area = StagingArea::temporary().unwrap();
        let mut writer = area.writer(0).unwrap();
        writer.append(&[duration("block,7", "D\"1", 5.0)]).unwrap();
        let staged = area.read_all().unwrap();
        assert_eq!(staged.rows, vec![duration("block,7", "D\"1", 5.0)]);
    }

    #[test]
    fn remove_deletes_only_listed_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        let area = StagingArea::persistent(dir.path()).unwrap();
        area.writer(0)
            .unwrap()
            .append(&[duration("A", "D1", 1.0)])
            .unwrap();
        let files = area.files().unwrap();
        area.remove(&files).unwrap();
        assert!(area.files().unwrap().is_empty());
        assert!(dir.path().join("notes.txt").exists());
    }
}
