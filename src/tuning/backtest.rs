//! Rolling-origin backtesting and error metrics.

use log::debug;

use crate::config::BacktestConfig;
use crate::forecast::ModelBackend;
use crate::utils::error::{Error, Result};

use super::{EvalMetrics, EvalOutcome, ParamSet};

/// Evaluates one candidate parameter set against the historical series.
///
/// The series is variance-stabilized with log1p before fitting; both
/// actuals and predictions are mapped back with expm1 before metrics, so
/// reported errors are on the original scale.
pub struct BacktestEvaluator {
    knobs: BacktestConfig,
}

impl BacktestEvaluator {
    pub fn new(knobs: BacktestConfig) -> Self {
        Self { knobs }
    }

    /// Evaluate one combination. Never returns an error: any failure in
    /// fit, backtest, or metric computation is folded into the outcome so
    /// a bad combination cannot abort the job.
    pub fn evaluate(
        &self,
        backend: &dyn ModelBackend,
        series: &[f64],
        params: &ParamSet,
    ) -> EvalOutcome {
        match self.try_evaluate(backend, series, params) {
            Ok(metrics) => EvalOutcome::success(params.clone(), metrics),
            Err(e) => {
                debug!("parameter set failed evaluation: {}", e);
                EvalOutcome::failure(params.clone(), e.to_string())
            }
        }
    }

    fn try_evaluate(
        &self,
        backend: &dyn ModelBackend,
        series: &[f64],
        params: &ParamSet,
    ) -> Result<EvalMetrics> {
        let stabilized: Vec<f64> = series.iter().map(|y| y.ln_1p()).collect();

        // Full-series fit first: parameter sets the model cannot even
        // train with fail fast, before any rolls run.
        let mut model = backend.build(params)?;
        model.fit(&stabilized)?;

        let mut pairs: Vec<(f64, f64)> = Vec::new();
        let mut origin = self.knobs.initial_periods;
        while origin + self.knobs.horizon_periods <= series.len() {
            let mut rolled = backend.build(params)?;
            rolled.fit(&stabilized[..origin])?;
            let predictions = rolled.predict(self.knobs.horizon_periods)?;
            if predictions.len() < self.knobs.horizon_periods {
                return Err(Error::ModelError(format!(
                    "backend returned {} predictions for a horizon of {}",
                    predictions.len(),
                    self.knobs.horizon_periods
                )));
            }
            for (offset, prediction) in predictions.iter().enumerate() {
                let actual = series[origin + offset];
                let predicted = prediction.yhat.exp_m1();
                pairs.push((actual, predicted));
            }
            origin += self.knobs.step_periods;
        }

        if pairs.is_empty() {
            return Err(Error::DataError(
                "series too short for a single backtest roll".to_string(),
            ));
        }
        Ok(compute_metrics(&pairs))
    }
}

/// MAPE over strictly-positive actuals, RMSE over all points.
///
/// Zero actuals are excluded from the percentage average rather than
/// counted as zero error; with no positive actuals at all, MAPE is NaN.
pub fn compute_metrics(pairs: &[(f64, f64)]) -> EvalMetrics {
    let mut ape_sum = 0.0;
    let mut ape_count = 0usize;
    let mut square_sum = 0.0;
    for &(actual, predicted) in pairs {
        let residual = actual - predicted;
        square_sum += residual * residual;
        if actual > 0.0 {
            ape_sum += (residual / actual).abs();
            ape_count += 1;
        }
    }
    let mape = if ape_count > 0 {
        ape_sum / ape_count as f64 * 100.0
    } else {
        f64::NAN
    };
    let rmse = (square_sum / pairs.len() as f64).sqrt();
    EvalMetrics { mape, rmse }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{ForecastModel, Prediction};
    use crate::tuning::ParamValue;

    /// Predicts the stabilized mean of its training window.
    struct MeanModel {
        mean: Option<f64>,
    }

    impl ForecastModel for MeanModel {
        fn fit(&mut self, series: &[f64]) -> Result<()> {
            if series.is_empty() {
                return Err(Error::ModelError("empty series".to_string()));
            }
            self.mean = Some(series.iter().sum::<f64>() / series.len() as f64);
            Ok(())
        }

        fn predict(&self, horizon: usize) -> Result<Vec<Prediction>> {
            let mean = self
                .mean
                .ok_or_else(|| Error::ModelError("not fitted".to_string()))?;
            Ok(vec![Prediction { yhat: mean, yhat_lower: mean, yhat_upper: mean }; horizon])
        }
    }

    struct MeanBackend;

    impl ModelBackend for MeanBackend {
        fn build(&self, params: &ParamSet) -> Result<Box<dyn ForecastModel>> {
            if params.get("changepoint_prior_scale").and_then(ParamValue::as_f64) == Some(-1.0) {
                return Err(Error::ModelError("pathological parameters".to_string()));
            }
            Ok(Box::new(MeanModel { mean: None }))
        }
    }

    fn knobs(initial: usize, step: usize, horizon: usize) -> BacktestConfig {
        BacktestConfig {
            initial_periods: initial,
            step_periods: step,
            horizon_periods: horizon,
            min_periods: initial + horizon,
        }
    }

    #[test]
    fn test_mape_excludes_zero_actuals() {
        let metrics = compute_metrics(&[(100.0, 90.0), (0.0, 10.0), (50.0, 55.0)]);
        // Only the two positive actuals enter the average: 10% and 10%
        assert!((metrics.mape - 10.0).abs() < 1e-9);
        // RMSE covers all three points
        let expected_rmse = ((100.0f64 + 100.0 + 25.0) / 3.0).sqrt();
        assert!((metrics.rmse - expected_rmse).abs() < 1e-9);
    }

    #[test]
    fn test_all_zero_actuals_yield_nan_mape() {
        let metrics = compute_metrics(&[(0.0, 5.0), (0.0, 0.0)]);
        assert!(metrics.mape.is_nan());
        assert!(metrics.rmse.is_finite());
    }

    #[test]
    fn test_rolls_cover_every_origin() {
        // A flat series: the mean model predicts it perfectly, so the
        // evaluator should report zero error across 16 - 12 = 4 rolls.
        let series = vec![50.0; 16];
        let evaluator = BacktestEvaluator::new(knobs(12, 1, 1));
        let outcome = evaluator.evaluate(&MeanBackend, &series, &ParamSet::new());
        assert!(outcome.success);
        let metrics = outcome.metrics.unwrap();
        assert!(metrics.mape.abs() < 1e-9);
        assert!(metrics.rmse.abs() < 1e-9);
    }

    #[test]
    fn test_too_short_series_is_a_per_combination_failure() {
        let series = vec![50.0; 12];
        let evaluator = BacktestEvaluator::new(knobs(12, 1, 1));
        let outcome = evaluator.evaluate(&MeanBackend, &series, &ParamSet::new());
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("too short"));
    }

    #[test]
    fn test_backend_failure_is_captured_not_propagated() {
        let series = vec![50.0; 16];
        let evaluator = BacktestEvaluator::new(knobs(12, 1, 1));
        let params: ParamSet = [("changepoint_prior_scale".to_string(), ParamValue::Float(-1.0))]
            .into_iter()
            .collect();
        let outcome = evaluator.evaluate(&MeanBackend, &series, &params);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("pathological"));
        assert!(outcome.metrics.is_none());
    }
}
