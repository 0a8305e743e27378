//! Job launcher and background worker.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::config::TuningConfig;
use crate::data::{aggregate_monthly, SalesHistory};
use crate::forecast::ModelBackend;
use crate::persistence::{progress, JobStatus, JobStore, TunedParameter, TunedParameterStore, TuningJob};
use crate::utils::error::{Error, Result};

use super::{
    expand_grid, persist_winner, select_winner, BacktestEvaluator, EvaluationPool, ParamSpace,
    TuningRequest,
};

/// Coordinates the tuning lifecycle: validates submissions, claims the
/// category's in-flight slot, and runs evaluation on a background task.
/// All collaborators are passed in explicitly; there is no ambient
/// application context.
pub struct TuningEngine {
    jobs: Arc<dyn JobStore>,
    tuned: Arc<dyn TunedParameterStore>,
    history: Arc<dyn SalesHistory>,
    backend: Arc<dyn ModelBackend>,
    config: TuningConfig,
}

impl TuningEngine {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        tuned: Arc<dyn TunedParameterStore>,
        history: Arc<dyn SalesHistory>,
        backend: Arc<dyn ModelBackend>,
        config: TuningConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { jobs, tuned, history, backend, config })
    }

    /// Submit a tuning request. Validation and the conflict check happen
    /// synchronously; the caller gets the new job id back immediately and
    /// polls the job store for progress.
    pub async fn submit(&self, request: TuningRequest) -> Result<i64> {
        request.validate()?;

        // Too little history is a submission error, not a job failure:
        // no job record is created for a category that cannot backtest.
        let raw = self.history.category_series(&request.category).await?;
        let monthly = aggregate_monthly(&raw)?;
        let required = self.config.backtest.min_periods;
        if monthly.len() < required {
            return Err(Error::InsufficientHistory { required, actual: monthly.len() });
        }

        let job_id = self.jobs.create_job(&request.category, &request.space).await?;
        info!("queued tuning job {} for category '{}'", job_id, request.category);

        let worker = JobWorker {
            jobs: self.jobs.clone(),
            tuned: self.tuned.clone(),
            history: self.history.clone(),
            backend: self.backend.clone(),
            config: self.config.clone(),
            job_id,
            category: request.category,
            space: request.space,
        };
        tokio::spawn(worker.run());

        Ok(job_id)
    }

    /// Snapshot of one job, if it exists.
    pub async fn get_job(&self, id: i64) -> Result<Option<TuningJob>> {
        self.jobs.get_job(id).await
    }

    /// Jobs ordered newest-first, optionally filtered by status and category.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        category: Option<&str>,
    ) -> Result<Vec<TuningJob>> {
        self.jobs.list_jobs(status, category).await
    }

    /// All saved winning configurations.
    pub async fn tuned_parameters(&self) -> Result<Vec<TunedParameter>> {
        self.tuned.list().await
    }

    /// The saved winning configuration for one category.
    pub async fn tuned_parameters_for(&self, category: &str) -> Result<Option<TunedParameter>> {
        self.tuned.get(category).await
    }

    /// Administrative removal of a saved configuration.
    pub async fn delete_tuned_parameters(&self, id: i64) -> Result<bool> {
        self.tuned.delete(id).await
    }
}

/// One background task per submitted job. Owns clones of every handle it
/// needs; nothing is shared with the submitting request path.
struct JobWorker {
    jobs: Arc<dyn JobStore>,
    tuned: Arc<dyn TunedParameterStore>,
    history: Arc<dyn SalesHistory>,
    backend: Arc<dyn ModelBackend>,
    config: TuningConfig,
    job_id: i64,
    category: String,
    space: ParamSpace,
}

impl JobWorker {
    async fn run(self) {
        let jobs = self.jobs.clone();
        let job_id = self.job_id;
        let budget = Duration::from_secs(self.config.pool.job_timeout_secs);

        let failure = match tokio::time::timeout(budget, self.execute()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(Error::Timeout(budget.as_secs()).to_string()),
        };

        if let Some(message) = failure {
            error!("tuning job {} failed: {}", job_id, message);
            if let Err(e) = jobs.fail_job(job_id, &message).await {
                error!("could not record failure for job {}: {}", job_id, e);
            }
        }
    }

    async fn execute(self) -> Result<()> {
        let Self { jobs, tuned, history, backend, config, job_id, category, space } = self;

        jobs.mark_running(job_id).await?;
        info!("starting tuning job {} for category '{}'", job_id, category);

        let raw = history.category_series(&category).await?;
        jobs.update_progress(job_id, progress::DATA_FETCHED).await?;

        let monthly = aggregate_monthly(&raw)?;
        let required = config.backtest.min_periods;
        if monthly.len() < required {
            return Err(Error::InsufficientHistory { required, actual: monthly.len() });
        }
        let series: Vec<f64> = monthly.iter().map(|p| p.qty).collect();
        jobs.update_progress(job_id, progress::SERIES_PREPARED).await?;

        let combinations = expand_grid(&space)?;
        let attempted = combinations.len();
        info!("job {}: testing {} parameter combinations", job_id, attempted);
        jobs.update_progress(job_id, progress::GRID_BUILT).await?;

        let evaluator = Arc::new(BacktestEvaluator::new(config.backtest.clone()));
        let pool = EvaluationPool::new(&config.pool);
        let outcomes = pool.run(evaluator, backend, Arc::new(series), combinations).await;
        jobs.update_progress(job_id, progress::EVALUATED).await?;

        let outcome = select_winner(outcomes, attempted)?;
        // The winning configuration is published best-effort: the job
        // result is still recorded if the upsert fails.
        let _ = persist_winner(tuned.as_ref(), &category, &outcome).await;

        jobs.complete_job(job_id, &outcome).await?;
        info!("completed tuning job {}", job_id);
        Ok(())
    }
}
