//! Sales-history access and series preparation.
//!
//! The transaction store itself belongs to the wider application; the
//! engine only consumes a read-only view of per-category sales totals
//! through the `SalesHistory` trait and aggregates them into the
//! contiguous monthly series the backtester expects.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Error, Result};

/// One observed (date, quantity) sales point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalesPoint {
    pub date: NaiveDate,
    pub qty: f64,
}

/// Read-only seam to the application's transaction store.
#[async_trait]
pub trait SalesHistory: Send + Sync {
    /// Sales totals for a category, ascending by date. An empty result
    /// means the category has no recorded sales.
    async fn category_series(&self, category: &str) -> Result<Vec<SalesPoint>>;
}

/// In-memory history backend for tests and demos.
#[derive(Clone, Default)]
pub struct InMemoryHistory {
    series: HashMap<String, Vec<SalesPoint>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored series for a category.
    pub fn insert(&mut self, category: &str, mut points: Vec<SalesPoint>) {
        points.sort_by_key(|p| p.date);
        self.series.insert(category.to_string(), points);
    }
}

#[async_trait]
impl SalesHistory for InMemoryHistory {
    async fn category_series(&self, category: &str) -> Result<Vec<SalesPoint>> {
        Ok(self.series.get(category).cloned().unwrap_or_default())
    }
}

/// Aggregate raw sales points into a contiguous month-start series,
/// summing quantities within each month and filling gaps with zero.
pub fn aggregate_monthly(points: &[SalesPoint]) -> Result<Vec<SalesPoint>> {
    if points.is_empty() {
        return Err(Error::NoHistory);
    }

    let mut buckets: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for p in points {
        *buckets.entry((p.date.year(), p.date.month())).or_insert(0.0) += p.qty;
    }

    // BTreeMap keys are ordered, so first/last give the covered range.
    let (&(mut year, mut month), _) = buckets.iter().next().unwrap();
    let (&(last_year, last_month), _) = buckets.iter().next_back().unwrap();

    let mut series = Vec::with_capacity(buckets.len());
    loop {
        let date = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| Error::DataError(format!("invalid month bucket {}-{:02}", year, month)))?;
        let qty = buckets.get(&(year, month)).copied().unwrap_or(0.0);
        series.push(SalesPoint { date, qty });

        if (year, month) == (last_year, last_month) {
            break;
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    Ok(series)
}
