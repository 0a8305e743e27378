//! SQLite persistence backend using `rusqlite`.
//! One store implements both the job and tuned-parameter traits.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{JobStatus, JobStore, TunedParameter, TunedParameterStore, TuningJob};
use crate::tuning::{ParamSet, ParamSpace, TuningOutcome};
use crate::utils::error::{Error, Result};

/// Thread-safe SQLite wrapper shared across async tasks.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>, // wrapped for async use via spawn_blocking
}

impl SqliteStore {
    /// Open (or create) the database file.
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        let conn = tokio::task::spawn_blocking(move || Connection::open(db_path))
            .await
            .map_err(|e| Error::PersistenceError(format!("store task failed: {}", e)))??;
        init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory database, handy for tests and demos.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap();
            op(&guard)
        })
        .await
        .map_err(|e| Error::PersistenceError(format!("store task failed: {}", e)))?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;\n
         CREATE TABLE IF NOT EXISTS tuning_jobs (
             id           INTEGER PRIMARY KEY AUTOINCREMENT,
             category     TEXT NOT NULL,
             status       TEXT NOT NULL DEFAULT 'pending',
             progress     INTEGER NOT NULL DEFAULT 0,
             parameters   TEXT NOT NULL,
             result       TEXT,
             error        TEXT,
             created_at   INTEGER NOT NULL,
             updated_at   INTEGER NOT NULL
         );
         CREATE UNIQUE INDEX IF NOT EXISTS ux_tuning_jobs_inflight
             ON tuning_jobs(category) WHERE status IN ('pending', 'running');
         CREATE TABLE IF NOT EXISTS forecast_parameters (
             id           INTEGER PRIMARY KEY AUTOINCREMENT,
             category     TEXT NOT NULL UNIQUE,
             parameters   TEXT NOT NULL,
             mape         REAL NOT NULL,
             rmse         REAL NOT NULL,
             created_at   INTEGER NOT NULL,
             updated_at   INTEGER NOT NULL
         );",
    )?;
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _)
        if e.code == rusqlite::ErrorCode::ConstraintViolation)
}

fn timestamp_to_utc(ts: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .ok_or_else(|| Error::PersistenceError(format!("invalid timestamp {}", ts)))
}

fn inflight_job_id(conn: &Connection, category: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM tuning_jobs
             WHERE category = ?1 AND status IN ('pending', 'running')
             ORDER BY created_at DESC LIMIT 1",
            params![category],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Raw row before JSON columns are decoded.
struct JobRow {
    id: i64,
    category: String,
    status: String,
    progress: i64,
    parameters: String,
    result: Option<String>,
    error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

fn read_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        category: row.get(1)?,
        status: row.get(2)?,
        progress: row.get(3)?,
        parameters: row.get(4)?,
        result: row.get(5)?,
        error: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn decode_job(row: JobRow) -> Result<TuningJob> {
    let space: ParamSpace = serde_json::from_str(&row.parameters)?;
    let result: Option<TuningOutcome> = match row.result {
        Some(text) => Some(serde_json::from_str(&text)?),
        None => None,
    };
    Ok(TuningJob {
        id: row.id,
        category: row.category,
        status: JobStatus::parse(&row.status)?,
        progress: row.progress.clamp(0, 100) as u8,
        space,
        result,
        error: row.error,
        created_at: timestamp_to_utc(row.created_at)?,
        updated_at: timestamp_to_utc(row.updated_at)?,
    })
}

const JOB_COLUMNS: &str =
    "id, category, status, progress, parameters, result, error, created_at, updated_at";

#[async_trait]
impl JobStore for SqliteStore {
    async fn create_job(&self, category: &str, space: &ParamSpace) -> Result<i64> {
        let category = category.to_string();
        let space_json = serde_json::to_string(space)?;
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp();
            // The partial unique index on in-flight jobs makes this insert
            // the mutual-exclusion point: no check-then-create window.
            let inserted = conn.execute(
                "INSERT INTO tuning_jobs (category, status, progress, parameters, created_at, updated_at)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?3)",
                params![category, space_json, now],
            );
            match inserted {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(e) if is_unique_violation(&e) => {
                    let job_id = inflight_job_id(conn, &category)?.ok_or_else(|| {
                        Error::PersistenceError(
                            "in-flight job disappeared during conflict check".to_string(),
                        )
                    })?;
                    Err(Error::ConflictError { category, job_id })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_job(&self, id: i64) -> Result<Option<TuningJob>> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM tuning_jobs WHERE id = ?1", JOB_COLUMNS),
                    params![id],
                    read_job_row,
                )
                .optional()?;
            row.map(decode_job).transpose()
        })
        .await
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        category: Option<&str>,
    ) -> Result<Vec<TuningJob>> {
        let category = category.map(str::to_string);
        self.with_conn(move |conn| {
            let mut sql = format!("SELECT {} FROM tuning_jobs", JOB_COLUMNS);
            let mut clauses = Vec::new();
            let mut args: Vec<String> = Vec::new();
            if let Some(status) = status {
                args.push(status.as_str().to_string());
                clauses.push(format!("status = ?{}", args.len()));
            }
            if let Some(category) = category {
                args.push(category);
                clauses.push(format!("category = ?{}", args.len()));
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY created_at DESC, id DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), read_job_row)?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(decode_job(row?)?);
            }
            Ok(jobs)
        })
        .await
    }

    async fn mark_running(&self, id: i64) -> Result<()> {
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp();
            let updated = conn.execute(
                "UPDATE tuning_jobs
                 SET status = 'running', progress = MAX(progress, ?2), updated_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![id, super::progress::STARTED, now],
            )?;
            if updated == 0 {
                return Err(transition_error(conn, id, "running"));
            }
            Ok(())
        })
        .await
    }

    async fn update_progress(&self, id: i64, progress: u8) -> Result<()> {
        let progress = progress.min(100);
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp();
            let updated = conn.execute(
                "UPDATE tuning_jobs
                 SET progress = MAX(progress, ?2), updated_at = ?3
                 WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
                params![id, progress, now],
            )?;
            // A terminal job ignores late checkpoints; only a missing row
            // is an error.
            if updated == 0 && !job_exists(conn, id)? {
                return Err(Error::JobNotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn complete_job(&self, id: i64, outcome: &TuningOutcome) -> Result<()> {
        let result_json = serde_json::to_string(outcome)?;
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp();
            let updated = conn.execute(
                "UPDATE tuning_jobs
                 SET status = 'completed', progress = 100, result = ?2, error = NULL, updated_at = ?3
                 WHERE id = ?1 AND status = 'running'",
                params![id, result_json, now],
            )?;
            if updated == 0 {
                return Err(transition_error(conn, id, "completed"));
            }
            Ok(())
        })
        .await
    }

    async fn fail_job(&self, id: i64, error: &str) -> Result<()> {
        let error = error.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp();
            let updated = conn.execute(
                "UPDATE tuning_jobs
                 SET status = 'failed', error = ?2, updated_at = ?3
                 WHERE id = ?1 AND status IN ('pending', 'running')",
                params![id, error, now],
            )?;
            if updated == 0 {
                return Err(transition_error(conn, id, "failed"));
            }
            Ok(())
        })
        .await
    }
}

fn job_exists(conn: &Connection, id: i64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM tuning_jobs WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn transition_error(conn: &Connection, id: i64, target: &str) -> Error {
    match conn.query_row(
        "SELECT status FROM tuning_jobs WHERE id = ?1",
        params![id],
        |row| row.get::<_, String>(0),
    ) {
        Ok(status) => Error::PersistenceError(format!(
            "job {} cannot transition from '{}' to '{}'",
            id, status, target
        )),
        Err(rusqlite::Error::QueryReturnedNoRows) => Error::JobNotFound(id),
        Err(e) => e.into(),
    }
}

#[async_trait]
impl TunedParameterStore for SqliteStore {
    async fn upsert(
        &self,
        category: &str,
        parameters: &ParamSet,
        mape: f64,
        rmse: f64,
    ) -> Result<()> {
        let category = category.to_string();
        let params_json = serde_json::to_string(parameters)?;
        self.with_conn(move |conn| {
            let now = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO forecast_parameters (category, parameters, mape, rmse, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(category) DO UPDATE SET
                     parameters = excluded.parameters,
                     mape = excluded.mape,
                     rmse = excluded.rmse,
                     updated_at = excluded.updated_at",
                params![category, params_json, mape, rmse, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, category: &str) -> Result<Option<TunedParameter>> {
        let category = category.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, category, parameters, mape, rmse, created_at, updated_at
                     FROM forecast_parameters WHERE category = ?1",
                    params![category],
                    read_parameter_row,
                )
                .optional()?;
            row.map(decode_parameter).transpose()
        })
        .await
    }

    async fn list(&self) -> Result<Vec<TunedParameter>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, category, parameters, mape, rmse, created_at, updated_at
                 FROM forecast_parameters ORDER BY category",
            )?;
            let rows = stmt.query_map([], read_parameter_row)?;
            let mut parameters = Vec::new();
            for row in rows {
                parameters.push(decode_parameter(row?)?);
            }
            Ok(parameters)
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM forecast_parameters WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }
}

struct ParameterRow {
    id: i64,
    category: String,
    parameters: String,
    mape: f64,
    rmse: f64,
    created_at: i64,
    updated_at: i64,
}

fn read_parameter_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParameterRow> {
    Ok(ParameterRow {
        id: row.get(0)?,
        category: row.get(1)?,
        parameters: row.get(2)?,
        mape: row.get(3)?,
        rmse: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn decode_parameter(row: ParameterRow) -> Result<TunedParameter> {
    Ok(TunedParameter {
        id: row.id,
        category: row.category,
        parameters: serde_json::from_str(&row.parameters)?,
        mape: row.mape,
        rmse: row.rmse,
        created_at: timestamp_to_utc(row.created_at)?,
        updated_at: timestamp_to_utc(row.updated_at)?,
    })
}
