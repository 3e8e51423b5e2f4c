//! SQLite-backed durable telemetry log.
//!
//! Every operation opens its own connection and closes it before returning,
//! so any number of processes can read and append concurrently. Ordering is
//! by `id` (the sequence id) only.

use crate::error::PipelineResult;
use iiot_types::{Reading, TelemetryRecord};
use rusqlite::{Connection, OpenFlags, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a connection waits on a concurrent writer before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TelemetryLog {
    path: PathBuf,
}

impl TelemetryLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> PipelineResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(conn)
    }

    /// Ensures the schema exists. Safe to call from every component.
    pub fn initialize(&self) -> PipelineResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS telemetry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                sensor TEXT NOT NULL,
                temperature REAL NOT NULL,
                humidity REAL NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Appends one reading and returns its sequence id.
    pub fn append(&self, reading: &Reading) -> PipelineResult<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO telemetry (ts, sensor, temperature, humidity) VALUES (?1, ?2, ?3, ?4)",
            params![
                reading.timestamp,
                reading.sensor_id,
                reading.temperature,
                reading.humidity
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Up to `n` most recent records, newest first.
    pub fn latest(&self, n: usize) -> PipelineResult<Vec<TelemetryRecord>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, ts, sensor, temperature, humidity FROM telemetry
             ORDER BY id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], |row| {
            Ok(TelemetryRecord {
                sequence_id: row.get(0)?,
                timestamp: row.get(1)?,
                sensor_id: row.get(2)?,
                temperature: row.get(3)?,
                humidity: row.get(4)?,
            })
        })?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> PipelineResult<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}
