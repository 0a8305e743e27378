//! Hyperparameter tuning engine.
//!
//! Submissions flow through `TuningEngine::submit`, which validates the
//! request, claims the category's in-flight slot, and hands the rest to a
//! background worker: grid expansion, bounded-parallel rolling-origin
//! backtesting, winner selection, and result persistence.

mod backtest;
mod engine;
mod grid;
mod pool;
mod selector;

pub use backtest::{compute_metrics, BacktestEvaluator};
pub use engine::TuningEngine;
pub use grid::expand_grid;
pub use pool::EvaluationPool;
pub use selector::{persist_winner, rank_outcomes, select_winner};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

/// Hyperparameter names the engine will pass to the model backend.
/// Anything else is rejected at validation time, before a job exists.
pub const TUNABLE_PARAMETERS: &[&str] = &[
    "changepoint_prior_scale",
    "seasonality_prior_scale",
    "holidays_prior_scale",
    "seasonality_mode",
    "changepoint_range",
    "n_changepoints",
];

/// Candidate value for a tunable hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric view; integers widen to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A complete assignment of one candidate value per selected parameter.
/// BTreeMap keeps serialized output stable for storage and comparison.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Requested search space: candidate lists per parameter name plus the
/// subset of names actually selected for this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpace {
    pub selected_parameters: Vec<String>,
    pub parameters: BTreeMap<String, Vec<ParamValue>>,
}

/// A tuning submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningRequest {
    pub category: String,
    pub space: ParamSpace,
}

impl TuningRequest {
    /// Check the request shape before any job record is created.
    pub fn validate(&self) -> Result<()> {
        if self.category.trim().is_empty() {
            return Err(Error::ValidationError("category is required".to_string()));
        }
        if self.space.selected_parameters.is_empty() {
            return Err(Error::ValidationError(
                "at least one parameter must be selected".to_string(),
            ));
        }
        for name in &self.space.selected_parameters {
            if !TUNABLE_PARAMETERS.contains(&name.as_str()) {
                return Err(Error::ValidationError(format!(
                    "unknown tunable parameter '{}'",
                    name
                )));
            }
            let has_values = self
                .space
                .parameters
                .get(name)
                .map(|values| !values.is_empty())
                .unwrap_or(false);
            if !has_values {
                return Err(Error::ValidationError(format!(
                    "parameter '{}' has no candidate values",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Error metrics from one successful backtest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Mean absolute percentage error over strictly-positive actuals
    pub mape: f64,
    /// Root-mean-square error over all held-out points
    pub rmse: f64,
}

/// Outcome of evaluating one grid combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub parameters: ParamSet,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EvalMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvalOutcome {
    pub fn success(parameters: ParamSet, metrics: EvalMetrics) -> Self {
        Self { parameters, success: true, metrics: Some(metrics), error: None }
    }

    pub fn failure(parameters: ParamSet, error: String) -> Self {
        Self { parameters, success: false, metrics: None, error: Some(error) }
    }
}

/// Final result payload recorded on a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningOutcome {
    pub best_parameters: ParamSet,
    pub mape: f64,
    pub rmse: f64,
    /// Successful combinations, ascending by MAPE
    pub all_results: Vec<EvalOutcome>,
    pub total_combinations_tested: usize,
    pub successful_combinations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(selected: &[&str], values: &[(&str, Vec<ParamValue>)]) -> TuningRequest {
        TuningRequest {
            category: "Beverages".to_string(),
            space: ParamSpace {
                selected_parameters: selected.iter().map(|s| s.to_string()).collect(),
                parameters: values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            },
        }
    }

    #[test]
    fn test_validate_accepts_known_parameters() {
        let req = request(
            &["changepoint_prior_scale", "seasonality_mode"],
            &[
                ("changepoint_prior_scale", vec![ParamValue::Float(0.05)]),
                ("seasonality_mode", vec![ParamValue::Text("additive".to_string())]),
            ],
        );
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_parameter() {
        let req = request(
            &["growth"],
            &[("growth", vec![ParamValue::Text("logistic".to_string())])],
        );
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("unknown tunable parameter 'growth'"));
    }

    #[test]
    fn test_validate_rejects_empty_selection_and_empty_candidates() {
        let req = request(&[], &[]);
        assert!(req.validate().is_err());

        let req = request(&["changepoint_prior_scale"], &[("changepoint_prior_scale", vec![])]);
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("no candidate values"));

        let mut req = request(&["changepoint_prior_scale"], &[]);
        req.category = "  ".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_param_value_serde_is_untagged() {
        let set: ParamSet = [
            ("changepoint_prior_scale".to_string(), ParamValue::Float(0.5)),
            ("n_changepoints".to_string(), ParamValue::Int(25)),
            ("seasonality_mode".to_string(), ParamValue::Text("multiplicative".to_string())),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("\"n_changepoints\":25"));
        assert!(json.contains("\"seasonality_mode\":\"multiplicative\""));

        let back: ParamSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert_eq!(back["n_changepoints"].as_f64(), Some(25.0));
    }
}
