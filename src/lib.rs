//! # Salescast Rust
//! Asynchronous hyperparameter-tuning engine for sales forecasting.
//!
//! The engine searches a discretized hyperparameter grid for a product
//! category, scores every combination with rolling-origin backtesting
//! against that category's monthly sales history, and durably records
//! both the job's progress and the winning configuration. The
//! forecasting model itself is a pluggable collaborator behind
//! `forecast::ModelBackend`.

pub use crate::utils::error::{Error, Result};

pub mod config;
pub mod data;
pub mod forecast;
pub mod persistence;
pub mod tuning;
pub mod utils;

pub use tuning::TuningEngine;
