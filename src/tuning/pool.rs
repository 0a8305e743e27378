//! Bounded concurrent evaluation of grid combinations.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{error, info};
use tokio::sync::Semaphore;

use crate::config::PoolConfig;
use crate::forecast::ModelBackend;

use super::{BacktestEvaluator, EvalOutcome, ParamSet};

/// Runs the evaluator over every combination, bounded by a worker limit
/// that is independent of grid size. Combinations share no mutable
/// state: each task gets the same immutable series behind an `Arc` and
/// its own parameter set, and nothing is persisted until every task has
/// finished.
pub struct EvaluationPool {
    max_workers: usize,
    combination_timeout: Duration,
}

impl EvaluationPool {
    pub fn new(config: &PoolConfig) -> Self {
        let max_workers = config.max_workers.min(num_cpus::get()).max(1);
        Self {
            max_workers,
            combination_timeout: Duration::from_secs(config.combination_timeout_secs),
        }
    }

    /// Evaluate all combinations. Outcomes come back in no particular
    /// order; callers needing counts should use the input length.
    pub async fn run(
        &self,
        evaluator: Arc<BacktestEvaluator>,
        backend: Arc<dyn ModelBackend>,
        series: Arc<Vec<f64>>,
        combinations: Vec<ParamSet>,
    ) -> Vec<EvalOutcome> {
        info!(
            "evaluating {} parameter combinations with up to {} workers",
            combinations.len(),
            self.max_workers
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let timeout = self.combination_timeout;
        let mut handles = Vec::with_capacity(combinations.len());
        for params in combinations {
            let semaphore = semaphore.clone();
            let evaluator = evaluator.clone();
            let backend = backend.clone();
            let series = series.clone();
            handles.push(tokio::spawn(async move {
                // Never closed, so acquire cannot fail
                let _permit = semaphore.acquire_owned().await.unwrap();
                let task_params = params.clone();
                let fit = tokio::task::spawn_blocking(move || {
                    evaluator.evaluate(backend.as_ref(), &series, &task_params)
                });
                match tokio::time::timeout(timeout, fit).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(join_err)) => EvalOutcome::failure(
                        params,
                        format!("evaluation task panicked: {}", join_err),
                    ),
                    Err(_) => EvalOutcome::failure(
                        params,
                        format!("evaluation timed out after {} seconds", timeout.as_secs()),
                    ),
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("evaluation task aborted: {}", e),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BacktestConfig;
    use crate::forecast::{ForecastModel, Prediction};
    use crate::tuning::{expand_grid, ParamSpace, ParamValue};
    use crate::utils::error::{Error, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts concurrent fits so the worker bound is observable.
    struct GaugedBackend {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct GaugedModel {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        mean: f64,
    }

    impl ForecastModel for GaugedModel {
        fn fit(&mut self, series: &[f64]) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.mean = series.iter().sum::<f64>() / series.len() as f64;
            Ok(())
        }

        fn predict(&self, horizon: usize) -> Result<Vec<Prediction>> {
            let yhat = self.mean;
            Ok(vec![Prediction { yhat, yhat_lower: yhat, yhat_upper: yhat }; horizon])
        }
    }

    impl ModelBackend for GaugedBackend {
        fn build(&self, params: &ParamSet) -> Result<Box<dyn ForecastModel>> {
            if params.get("changepoint_prior_scale").and_then(ParamValue::as_f64) == Some(-1.0) {
                return Err(Error::ModelError("pathological parameters".to_string()));
            }
            Ok(Box::new(GaugedModel {
                active: self.active.clone(),
                peak: self.peak.clone(),
                mean: 0.0,
            }))
        }
    }

    fn pool_config(max_workers: usize) -> PoolConfig {
        PoolConfig {
            max_workers,
            combination_timeout_secs: 30,
            job_timeout_secs: 60,
        }
    }

    fn grid(values: &[f64]) -> Vec<ParamSet> {
        let space = ParamSpace {
            selected_parameters: vec!["changepoint_prior_scale".to_string()],
            parameters: [(
                "changepoint_prior_scale".to_string(),
                values.iter().map(|v| ParamValue::Float(*v)).collect(),
            )]
            .into_iter()
            .collect(),
        };
        expand_grid(&space).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_evaluates_every_combination_within_the_bound() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(GaugedBackend { active: active.clone(), peak: peak.clone() });

        let evaluator = Arc::new(BacktestEvaluator::new(BacktestConfig {
            initial_periods: 12,
            step_periods: 1,
            horizon_periods: 1,
            min_periods: 13,
        }));
        let series = Arc::new(vec![50.0; 16]);
        let combinations = grid(&[0.01, 0.05, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);

        let pool = EvaluationPool::new(&pool_config(2));
        let outcomes = pool.run(evaluator, backend, series, combinations).await;

        assert_eq!(outcomes.len(), 8);
        assert!(outcomes.iter().all(|o| o.success));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failures_are_collected_alongside_successes() {
        let backend = Arc::new(GaugedBackend {
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        });
        let evaluator = Arc::new(BacktestEvaluator::new(BacktestConfig {
            initial_periods: 12,
            step_periods: 1,
            horizon_periods: 1,
            min_periods: 13,
        }));
        let series = Arc::new(vec![50.0; 16]);
        let combinations = grid(&[0.05, -1.0]);

        let pool = EvaluationPool::new(&pool_config(4));
        let outcomes = pool.run(evaluator, backend, series, combinations).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes.iter().filter(|o| o.success).count(), 1);
        let failed = outcomes.iter().find(|o| !o.success).unwrap();
        assert!(failed.error.as_deref().unwrap().contains("pathological"));
    }
}
