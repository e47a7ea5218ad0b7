// src/jobstore.rs
//
// =============================================================================
// FLOWCALC: JOB STORE (v 0.3 )
// =============================================================================
//
// The Persistence Layer.
//
// Architecture:
// - SQLite, one table `calculations`, append-only history.
// - Every operation is a single statement; SQLite's per-statement atomicity
//   is the only concurrency guarantee relied upon.
// - The "current" job for a calculation id is its highest row id.
// - DELETE journaling (no WAL side files next to shared workspaces).

use crate::core::{InsertOutcome, Job, JobState};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};

const JOB_COLUMNS: &str = "id, calculation_id, state, message, created_at_ms, updated_at_ms";

// -----------------------------------------------------------------------------
// JobStore
// -----------------------------------------------------------------------------

pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create DB directory {:?}", parent))?;
            }
        }
        let store = Self { path };
        store.init()?;
        Ok(store)
    }

    /// Initialize the schema if it doesn't exist.
    fn init(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "PRAGMA journal_mode=DELETE;
             PRAGMA synchronous=NORMAL;",
        )?;

        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS calculations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                calculation_id TEXT NOT NULL,
                state INTEGER NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_calculations_calc ON calculations(calculation_id, state);
            CREATE INDEX IF NOT EXISTS idx_calculations_state ON calculations(state, id);
            COMMIT;",
        )?;

        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).context("Failed to open job DB")?;
        // Readers (status queries) and the worker share the file.
        conn.busy_timeout(std::time::Duration::from_millis(10_000))?;
        Ok(conn)
    }

    // -------------------------------------------------------------------------
    // WRITE API (Ingestion / Worker)
    // -------------------------------------------------------------------------

    /// Enqueues a new QUEUED job unless one is already active for the id.
    pub fn insert_if_absent(&self, calculation_id: &str) -> Result<InsertOutcome> {
        self.insert_with(calculation_id, || Ok(()))
    }

    /// Like `insert_if_absent`, but runs `prepare` inside the write
    /// transaction, only when the row is going to be inserted. Concurrent
    /// submitters queue on the write lock, and no worker can claim the job
    /// before `prepare` has finished. An error from `prepare` rolls back.
    pub fn insert_with<F>(&self, calculation_id: &str, prepare: F) -> Result<InsertOutcome>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let active: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM calculations WHERE calculation_id = ?1 AND state < ?2)",
            params![calculation_id, JobState::Success.code()],
            |row| row.get(0),
        )?;
        if active {
            log::debug!("Calculation {} already queued, skipping.", calculation_id);
            return Ok(InsertOutcome::Skipped);
        }

        prepare()?;

        let now = Utc::now().timestamp_millis();
        tx.execute(
            "INSERT INTO calculations (calculation_id, state, message, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, '', ?3, ?3)",
            params![calculation_id, JobState::Queued.code(), now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(InsertOutcome::Inserted { id })
    }

    /// Moves a job to `state`.
    /// The update only matches rows sitting in a legal predecessor state, so a
    /// skipped RUNNING or a second terminal write is rejected, not applied.
    pub fn set_state(&self, id: i64, state: JobState, message: &str) -> Result<()> {
        let allowed = state.predecessors();
        if allowed.is_empty() {
            return Err(anyhow!("Jobs cannot be moved back to {}", state));
        }
        let codes = allowed
            .iter()
            .map(|s| s.code().to_string())
            .collect::<Vec<_>>()
            .join(",");

        let conn = self.conn()?;
        let sql = format!(
            "UPDATE calculations SET state = ?1, message = ?2, updated_at_ms = ?3
             WHERE id = ?4 AND state IN ({})",
            codes
        );
        let changed = conn.execute(
            &sql,
            params![state.code(), message, Utc::now().timestamp_millis(), id],
        )?;

        if changed == 0 {
            let current: Option<i64> = conn
                .query_row(
                    "SELECT state FROM calculations WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?;
            return Err(match current {
                Some(code) => anyhow!(
                    "Illegal transition for job {}: {} -> {}",
                    id,
                    JobState::from_code(code)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| code.to_string()),
                    state
                ),
                None => anyhow!("Job {} not found", id),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // READ API
    // -------------------------------------------------------------------------

    /// Oldest queued job (lowest id), if any.
    pub fn next_queued(&self) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM calculations WHERE state = ?1 ORDER BY id ASC LIMIT 1",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(&sql, params![JobState::Queued.code()], job_from_row)
            .optional()?;
        Ok(job)
    }

    pub fn get(&self, id: i64) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM calculations WHERE id = ?1", JOB_COLUMNS);
        let job = conn.query_row(&sql, params![id], job_from_row).optional()?;
        Ok(job)
    }

    /// Most recently inserted job for the calculation id.
    pub fn latest_for(&self, calculation_id: &str) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM calculations WHERE calculation_id = ?1 ORDER BY id DESC LIMIT 1",
            JOB_COLUMNS
        );
        let job = conn
            .query_row(&sql, params![calculation_id], job_from_row)
            .optional()?;
        Ok(job)
    }

    pub fn count_by_state(&self, state: JobState) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM calculations WHERE state = ?1",
            params![state.code()],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Newest jobs first, across all calculation ids.
    pub fn list(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM calculations ORDER BY id DESC LIMIT ?1",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], job_from_row)?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let code: i64 = row.get(2)?;
    let state = JobState::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Integer,
            format!("unknown job state code {}", code).into(),
        )
    })?;

    Ok(Job {
        id: row.get(0)?,
        calculation_id: row.get(1)?,
        state,
        message: row.get(3)?,
        created_at: from_millis(row.get(4)?),
        updated_at: from_millis(row.get(5)?),
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
