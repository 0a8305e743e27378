//! Winner selection over evaluation outcomes.

use log::{info, warn};

use crate::persistence::TunedParameterStore;
use crate::utils::error::{Error, Result};

use super::{EvalOutcome, TuningOutcome};

fn mape_of(outcome: &EvalOutcome) -> f64 {
    outcome.metrics.map(|m| m.mape).unwrap_or(f64::NAN)
}

fn rmse_of(outcome: &EvalOutcome) -> f64 {
    outcome.metrics.map(|m| m.rmse).unwrap_or(f64::NAN)
}

/// Rank successful outcomes ascending by (MAPE, RMSE). `total_cmp` puts
/// NaN metrics after every finite value, and the stable sort preserves
/// first-seen order on full ties.
pub fn rank_outcomes(outcomes: &[EvalOutcome]) -> Vec<EvalOutcome> {
    let mut ranked: Vec<EvalOutcome> = outcomes.iter().filter(|o| o.success).cloned().collect();
    ranked.sort_by(|a, b| {
        mape_of(a)
            .total_cmp(&mape_of(b))
            .then_with(|| rmse_of(a).total_cmp(&rmse_of(b)))
    });
    ranked
}

/// Pick the winning combination and assemble the job result payload.
/// `attempted` is the full grid size, including failed combinations.
pub fn select_winner(outcomes: Vec<EvalOutcome>, attempted: usize) -> Result<TuningOutcome> {
    let ranked = rank_outcomes(&outcomes);
    let best = ranked.first().ok_or(Error::NoViableCombination)?;
    let metrics = best
        .metrics
        .ok_or_else(|| Error::DataError("ranked outcome missing metrics".to_string()))?;

    info!(
        "selected winner with MAPE {:.3}% and RMSE {:.3} out of {}/{} successful combinations",
        metrics.mape,
        metrics.rmse,
        ranked.len(),
        attempted
    );

    Ok(TuningOutcome {
        best_parameters: best.parameters.clone(),
        mape: metrics.mape,
        rmse: metrics.rmse,
        successful_combinations: ranked.len(),
        total_combinations_tested: attempted,
        all_results: ranked,
    })
}

/// Persistence step: publish the winning configuration for the category.
/// A failed upsert is logged but does not fail the job - the result is
/// still recorded on the job row.
pub async fn persist_winner(
    store: &dyn TunedParameterStore,
    category: &str,
    outcome: &TuningOutcome,
) -> Result<()> {
    match store
        .upsert(category, &outcome.best_parameters, outcome.mape, outcome.rmse)
        .await
    {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("failed to save tuned parameters for '{}': {}", category, e);
            Err(e)
        }
    }
}
