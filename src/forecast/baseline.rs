//! Deterministic seasonal baseline backend used by tests and demos.

use crate::forecast::{ForecastModel, ModelBackend, Prediction};
use crate::tuning::ParamSet;
use crate::utils::error::{Error, Result};

/// Trend + monthly-index model with an exponentially smoothed level.
///
/// `changepoint_prior_scale` maps onto the level smoothing factor: small
/// values favour the long-run mean, large values chase recent history.
/// `seasonality_prior_scale` shrinks the monthly indices toward neutral,
/// and `seasonality_mode` switches between additive and multiplicative
/// adjustment. Other allow-listed names are accepted and ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeasonalBaseline;

impl ModelBackend for SeasonalBaseline {
    fn build(&self, params: &ParamSet) -> Result<Box<dyn ForecastModel>> {
        let alpha = match params.get("changepoint_prior_scale") {
            Some(v) => {
                let cps = v
                    .as_f64()
                    .ok_or_else(|| Error::ModelError("changepoint_prior_scale must be numeric".to_string()))?;
                if cps <= 0.0 {
                    return Err(Error::ModelError(
                        "changepoint_prior_scale must be positive".to_string(),
                    ));
                }
                (cps * 2.0).clamp(0.02, 0.95)
            }
            None => 0.1,
        };

        let season_weight = match params.get("seasonality_prior_scale") {
            Some(v) => {
                let sps = v
                    .as_f64()
                    .ok_or_else(|| Error::ModelError("seasonality_prior_scale must be numeric".to_string()))?;
                if sps < 0.0 {
                    return Err(Error::ModelError(
                        "seasonality_prior_scale must be non-negative".to_string(),
                    ));
                }
                sps / (sps + 1.0)
            }
            None => 1.0,
        };

        let multiplicative = match params.get("seasonality_mode") {
            Some(v) => match v.as_str() {
                Some("additive") => false,
                Some("multiplicative") => true,
                _ => {
                    return Err(Error::ModelError(format!(
                        "unsupported seasonality_mode {:?}",
                        v
                    )))
                }
            },
            None => false,
        };

        Ok(Box::new(BaselineModel {
            alpha,
            season_weight,
            multiplicative,
            fitted: None,
        }))
    }
}

struct Fitted {
    level: f64,
    trend: f64,
    season: [f64; 12],
    origin_len: usize,
    resid_std: f64,
}

/// One fitted instance; see `SeasonalBaseline` for the knob mapping.
pub struct BaselineModel {
    alpha: f64,
    season_weight: f64,
    multiplicative: bool,
    fitted: Option<Fitted>,
}

impl BaselineModel {
    fn deseason(&self, value: f64, index: f64) -> f64 {
        if self.multiplicative {
            // Indices near zero would explode the ratio
            if index.abs() < 1e-6 {
                value
            } else {
                value / index
            }
        } else {
            value - index
        }
    }

    fn reseason(&self, value: f64, index: f64) -> f64 {
        if self.multiplicative {
            value * index
        } else {
            value + index
        }
    }
}

impl ForecastModel for BaselineModel {
    fn fit(&mut self, series: &[f64]) -> Result<()> {
        if series.len() < 2 {
            return Err(Error::ModelError(
                "need at least two periods to fit".to_string(),
            ));
        }
        let n = series.len();
        let mean = series.iter().sum::<f64>() / n as f64;

        // Monthly index per slot, shrunk toward neutral by season_weight
        let mut slot_sum = [0.0f64; 12];
        let mut slot_count = [0usize; 12];
        for (i, y) in series.iter().enumerate() {
            slot_sum[i % 12] += y;
            slot_count[i % 12] += 1;
        }
        let neutral = if self.multiplicative { 1.0 } else { 0.0 };
        let mut season = [neutral; 12];
        for slot in 0..12 {
            if slot_count[slot] == 0 {
                continue;
            }
            let slot_mean = slot_sum[slot] / slot_count[slot] as f64;
            let raw = if self.multiplicative {
                if mean.abs() < 1e-6 {
                    1.0
                } else {
                    slot_mean / mean
                }
            } else {
                slot_mean - mean
            };
            season[slot] = neutral + (raw - neutral) * self.season_weight;
        }

        // Smooth the deseasonalized level; average differences give a
        // damped trend estimate.
        let mut level = self.deseason(series[0], season[0]);
        let mut prev = level;
        let mut trend_acc = 0.0;
        let mut resid_sq = 0.0;
        for (i, y) in series.iter().enumerate().skip(1) {
            let d = self.deseason(*y, season[i % 12]);
            let predicted = self.reseason(level, season[i % 12]);
            resid_sq += (y - predicted) * (y - predicted);
            level = self.alpha * d + (1.0 - self.alpha) * level;
            trend_acc += d - prev;
            prev = d;
        }
        let trend = trend_acc / (n - 1) as f64 * 0.5;
        let resid_std = (resid_sq / (n - 1) as f64).sqrt();

        self.fitted = Some(Fitted {
            level,
            trend,
            season,
            origin_len: n,
            resid_std,
        });
        Ok(())
    }

    fn predict(&self, horizon: usize) -> Result<Vec<Prediction>> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| Error::ModelError("model has not been fitted".to_string()))?;

        let mut predictions = Vec::with_capacity(horizon);
        for h in 1..=horizon {
            let slot = (fitted.origin_len + h - 1) % 12;
            let base = fitted.level + fitted.trend * h as f64;
            let yhat = self.reseason(base, fitted.season[slot]);
            let width = 1.28 * fitted.resid_std;
            predictions.push(Prediction {
                yhat,
                yhat_lower: yhat - width,
                yhat_upper: yhat + width,
            });
        }
        Ok(predictions)
    }
}
