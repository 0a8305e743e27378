//! Persistence layer traits and implementations
//!
//! Thin abstractions so the tuning engine can be decoupled from the
//! concrete storage backend (SQLite via rusqlite to start). The job
//! store is the single source of truth clients poll for progress; the
//! tuned-parameter store is the one-row-per-category record of winning
//! configurations consumed later by forecast generation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::tuning::{ParamSet, ParamSpace, TuningOutcome};
use crate::utils::error::{Error, Result};

pub mod sqlite;

/// Milestone progress checkpoints (percent). Progress is checkpointed
/// coarsely because the dominant cost is the evaluation pool, which is
/// not instrumented per combination.
pub mod progress {
    pub const STARTED: u8 = 5;
    pub const DATA_FETCHED: u8 = 10;
    pub const SERIES_PREPARED: u8 = 20;
    pub const GRID_BUILT: u8 = 30;
    pub const EVALUATED: u8 = 90;
    pub const DONE: u8 = 100;
}

/// Lifecycle states of a tuning job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::PersistenceError(format!("unknown job status '{}'", other))),
        }
    }

    /// Terminal states are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One row of the tuning_jobs table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningJob {
    pub id: i64,
    pub category: String,
    pub status: JobStatus,
    pub progress: u8,
    /// The requested search space, as submitted
    pub space: ParamSpace,
    pub result: Option<TuningOutcome>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TuningJob {
    /// Client-facing snapshot: `result` appears only on completed jobs
    /// and `error` only on failed ones.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut snapshot = json!({
            "id": self.id,
            "category": self.category,
            "status": self.status,
            "progress": self.progress,
            "parameters": self.space,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
        });
        match self.status {
            JobStatus::Completed => {
                snapshot["result"] = json!(self.result);
            }
            JobStatus::Failed => {
                snapshot["error"] = json!(self.error);
            }
            _ => {}
        }
        snapshot
    }
}

/// One row per category of the last winning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunedParameter {
    pub id: i64,
    pub category: String,
    pub parameters: ParamSet,
    pub mape: f64,
    pub rmse: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable record of tuning jobs and their lifecycle.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job. Must be atomic with respect to the
    /// one-in-flight-job-per-category invariant: returns `ConflictError`
    /// naming the existing job when one is already pending or running
    /// for the category.
    async fn create_job(&self, category: &str, space: &ParamSpace) -> Result<i64>;

    async fn get_job(&self, id: i64) -> Result<Option<TuningJob>>;

    /// Jobs ordered newest-first, optionally filtered.
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        category: Option<&str>,
    ) -> Result<Vec<TuningJob>>;

    /// pending -> running.
    async fn mark_running(&self, id: i64) -> Result<()>;

    /// Monotonic milestone checkpoint; ignored once the job is terminal.
    async fn update_progress(&self, id: i64, progress: u8) -> Result<()>;

    /// running -> completed, with progress forced to 100 and the result
    /// payload recorded.
    async fn complete_job(&self, id: i64, outcome: &TuningOutcome) -> Result<()>;

    /// pending/running -> failed, with the cause recorded. Progress
    /// already checkpointed stays visible.
    async fn fail_job(&self, id: i64, error: &str) -> Result<()>;
}

/// Durable per-category record of winning parameter sets.
#[async_trait]
pub trait TunedParameterStore: Send + Sync {
    /// Create or overwrite the category's record.
    async fn upsert(&self, category: &str, parameters: &ParamSet, mape: f64, rmse: f64)
        -> Result<()>;

    async fn get(&self, category: &str) -> Result<Option<TunedParameter>>;

    async fn list(&self) -> Result<Vec<TunedParameter>>;

    /// Administrative removal; returns whether a row existed.
    async fn delete(&self, id: i64) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [JobStatus::Pending, JobStatus::Running, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::parse("cancelled").is_err());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_snapshot_hides_result_until_completed() {
        let job = TuningJob {
            id: 1,
            category: "Beverages".to_string(),
            status: JobStatus::Running,
            progress: 30,
            space: ParamSpace {
                selected_parameters: vec!["changepoint_prior_scale".to_string()],
                parameters: Default::default(),
            },
            result: None,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let snapshot = job.snapshot();
        assert_eq!(snapshot["status"], "running");
        assert!(snapshot.get("result").is_none());
        assert!(snapshot.get("error").is_none());

        let mut failed = job;
        failed.status = JobStatus::Failed;
        failed.error = Some("no data".to_string());
        let snapshot = failed.snapshot();
        assert_eq!(snapshot["error"], "no data");
        assert!(snapshot.get("result").is_none());
    }
}
