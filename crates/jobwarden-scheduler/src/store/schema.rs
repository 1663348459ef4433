//! Database schema management.

use rusqlite::Connection;
use std::time::Duration;
use tokio_rusqlite::Error;

/// Configure the connection and create the jobs table.
///
/// Every write is committed with `synchronous = FULL` so that a returned
/// mutation survives a crash.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    trigger_json TEXT NOT NULL,
    coalesce_runs INTEGER NOT NULL DEFAULT 0,
    misfire_grace_secs INTEGER,
    next_run_time INTEGER,
    state TEXT NOT NULL DEFAULT 'pending',
    last_fire_time INTEGER,
    last_finished_at INTEGER,
    run_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_next_run_time ON jobs(next_run_time);
"#;
