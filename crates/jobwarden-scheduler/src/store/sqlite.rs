//! SQLite job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::debug;

use super::schema::init_schema;
use super::{JobStore, Registration};
use crate::error::{StoreError, StoreResult};
use crate::job::{Job, JobState, RunRecord};
use crate::trigger::Trigger;

const COLUMNS: &str = "id, name, trigger_json, coalesce_runs, misfire_grace_secs, next_run_time, \
     state, last_fire_time, last_finished_at, run_count, failure_count, last_error";

/// Durable job store on a single SQLite file.
///
/// All statements run on the dedicated tokio-rusqlite connection thread, so
/// mutations are serialized in call order.
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| init_schema(conn)).await?;

        Ok(Self { conn })
    }

    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Connection(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(&path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| init_schema(conn)).await?;
        debug!("SQLite job store ready at {}", path.display());

        Ok(Self { conn })
    }

    /// Run an UPDATE for one job id and fail with `NotFound` when it matched nothing.
    async fn update_one<F>(&self, id: &str, f: F) -> StoreResult<()>
    where
        F: FnOnce(&rusqlite::Connection, &str) -> rusqlite::Result<usize> + Send + 'static,
    {
        let owned = id.to_string();
        let changed = self
            .conn
            .call(move |conn| Ok(f(conn, &owned)?))
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Raw column values of one `jobs` row.
struct JobRow {
    id: String,
    name: String,
    trigger_json: String,
    coalesce: bool,
    misfire_grace_secs: Option<i64>,
    next_run_time: Option<i64>,
    state: String,
    last_fire_time: Option<i64>,
    last_finished_at: Option<i64>,
    run_count: i64,
    failure_count: i64,
    last_error: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            trigger_json: row.get(2)?,
            coalesce: row.get(3)?,
            misfire_grace_secs: row.get(4)?,
            next_run_time: row.get(5)?,
            state: row.get(6)?,
            last_fire_time: row.get(7)?,
            last_finished_at: row.get(8)?,
            run_count: row.get(9)?,
            failure_count: row.get(10)?,
            last_error: row.get(11)?,
        })
    }

    fn into_job(self) -> StoreResult<Job> {
        let trigger: Trigger = serde_json::from_str(&self.trigger_json)?;
        let state: JobState = self
            .state
            .parse()
            .map_err(|e: String| StoreError::Query(format!("job '{}': {}", self.id, e)))?;

        Ok(Job {
            trigger,
            state,
            name: self.name,
            coalesce: self.coalesce,
            misfire_grace_secs: self.misfire_grace_secs.and_then(|v| u64::try_from(v).ok()),
            next_run_time: self.next_run_time.and_then(from_micros),
            last_fire_time: self.last_fire_time.and_then(from_micros),
            last_finished_at: self.last_finished_at.and_then(from_micros),
            run_count: u64::try_from(self.run_count).unwrap_or_default(),
            failure_count: u64::try_from(self.failure_count).unwrap_or_default(),
            last_error: self.last_error,
            id: self.id,
        })
    }
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

fn grace_column(secs: Option<u64>) -> Option<i64> {
    secs.map(|s| i64::try_from(s).unwrap_or(i64::MAX))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn register(&self, job: &Job) -> StoreResult<Registration> {
        let trigger_json = serde_json::to_string(&job.trigger)?;
        let job = job.clone();

        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT INTO jobs (id, name, trigger_json, coalesce_runs, misfire_grace_secs,
                                       next_run_time, state, last_fire_time, last_finished_at,
                                       run_count, failure_count, last_error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        job.id,
                        job.name,
                        trigger_json,
                        job.coalesce,
                        grace_column(job.misfire_grace_secs),
                        job.next_run_time.map(to_micros),
                        job.state.as_str(),
                        job.last_fire_time.map(to_micros),
                        job.last_finished_at.map(to_micros),
                        i64::try_from(job.run_count).unwrap_or(i64::MAX),
                        i64::try_from(job.failure_count).unwrap_or(i64::MAX),
                        job.last_error,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;

        Ok(if inserted {
            Registration::Inserted
        } else {
            Registration::AlreadyExists
        })
    }

    async fn get(&self, id: &str) -> StoreResult<Job> {
        let owned = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM jobs WHERE id = ?1", COLUMNS);
                Ok(conn
                    .query_row(&sql, [&owned], JobRow::from_row)
                    .optional()?)
            })
            .await?;

        row.ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .into_job()
    }

    async fn update_state(&self, id: &str, state: JobState) -> StoreResult<()> {
        self.update_one(id, move |conn, id| {
            conn.execute(
                "UPDATE jobs SET state = ?2 WHERE id = ?1",
                params![id, state.as_str()],
            )
        })
        .await
    }

    async fn compare_and_set_state(
        &self,
        id: &str,
        expected: JobState,
        new: JobState,
    ) -> StoreResult<bool> {
        let owned = id.to_string();
        let outcome = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE jobs SET state = ?3 WHERE id = ?1 AND state = ?2",
                    params![owned, expected.as_str(), new.as_str()],
                )?;
                if changed > 0 {
                    return Ok(Some(true));
                }
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
                    [&owned],
                    |row| row.get(0),
                )?;
                Ok(exists.then_some(false))
            })
            .await?;

        outcome.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn set_next_run(&self, id: &str, at: Option<DateTime<Utc>>) -> StoreResult<()> {
        let micros = at.map(to_micros);
        self.update_one(id, move |conn, id| {
            conn.execute(
                "UPDATE jobs SET next_run_time = ?2 WHERE id = ?1",
                params![id, micros],
            )
        })
        .await
    }

    async fn record_run(&self, id: &str, record: &RunRecord) -> StoreResult<()> {
        let fire_time = to_micros(record.fire_time);
        let finished_at = to_micros(record.finished_at);
        let error = record.error.clone();
        self.update_one(id, move |conn, id| {
            conn.execute(
                "UPDATE jobs
                 SET last_fire_time = ?2,
                     last_finished_at = ?3,
                     run_count = run_count + 1,
                     failure_count = failure_count + (CASE WHEN ?4 IS NULL THEN 0 ELSE 1 END),
                     last_error = ?4
                 WHERE id = ?1",
                params![id, fire_time, finished_at, error],
            )
        })
        .await
    }

    async fn replace_definition(&self, job: &Job) -> StoreResult<()> {
        let trigger_json = serde_json::to_string(&job.trigger)?;
        let name = job.name.clone();
        let coalesce = job.coalesce;
        let grace = grace_column(job.misfire_grace_secs);
        self.update_one(&job.id, move |conn, id| {
            conn.execute(
                "UPDATE jobs
                 SET name = ?2, trigger_json = ?3, coalesce_runs = ?4, misfire_grace_secs = ?5
                 WHERE id = ?1",
                params![id, name, trigger_json, coalesce, grace],
            )
        })
        .await
    }

    async fn list(&self) -> StoreResult<Vec<Job>> {
        let rows = self
            .conn
            .call(|conn| {
                let sql = format!(
                    "SELECT {} FROM jobs ORDER BY next_run_time IS NULL, next_run_time, id",
                    COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], JobRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(JobRow::into_job).collect()
    }
}
