//! Parameter-grid expansion.

use crate::utils::error::{Error, Result};

use super::{ParamSet, ParamSpace, ParamValue};

/// Expand the selected search space into the full Cartesian product.
///
/// Output order follows nested iteration with the first selected
/// parameter varying slowest. Grids are expected to stay in the tens to
/// low hundreds of combinations, so the product is materialized eagerly.
pub fn expand_grid(space: &ParamSpace) -> Result<Vec<ParamSet>> {
    if space.selected_parameters.is_empty() {
        return Err(Error::ValidationError(
            "at least one parameter must be selected".to_string(),
        ));
    }

    let mut axes: Vec<(&str, &[ParamValue])> = Vec::with_capacity(space.selected_parameters.len());
    for name in &space.selected_parameters {
        let values = space
            .parameters
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if values.is_empty() {
            return Err(Error::ValidationError(format!(
                "parameter '{}' has no candidate values",
                name
            )));
        }
        axes.push((name, values));
    }

    let mut combinations: Vec<ParamSet> = vec![ParamSet::new()];
    for (name, values) in &axes {
        let mut expanded = Vec::with_capacity(combinations.len() * values.len());
        for combination in &combinations {
            for value in *values {
                let mut next = combination.clone();
                next.insert((*name).to_string(), value.clone());
                expanded.push(next);
            }
        }
        combinations = expanded;
    }
    Ok(combinations)
}
