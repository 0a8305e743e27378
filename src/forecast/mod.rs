//! Forecasting-model seam.
//!
//! The production forecasting model lives outside this crate. The engine
//! only needs something it can build from a validated parameter set, fit
//! on a prepared series, and ask for point + interval predictions, so
//! those three capabilities are the whole contract. Fixed model-level
//! settings (yearly seasonality and the like) belong to the backend, not
//! to the search grid.

pub mod baseline;

pub use baseline::SeasonalBaseline;

use serde::{Deserialize, Serialize};

use crate::tuning::ParamSet;
use crate::utils::error::Result;

/// Point forecast with an uncertainty interval for one future period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

/// A trainable forecasting model instance.
pub trait ForecastModel: Send {
    /// Fit the model on the prepared series (one value per period).
    fn fit(&mut self, series: &[f64]) -> Result<()>;

    /// Predict `horizon` periods past the end of the fitted series.
    fn predict(&self, horizon: usize) -> Result<Vec<Prediction>>;
}

/// Factory that turns a parameter set into a fresh model instance.
pub trait ModelBackend: Send + Sync {
    fn build(&self, params: &ParamSet) -> Result<Box<dyn ForecastModel>>;
}
