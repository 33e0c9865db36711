//! Analytics over the assembled series table.

pub mod stats;

pub use stats::{linear_trend, pearson, summarize, ColumnSummary, LinearTrend};

use crate::models::{SeriesTable, Variable};
use tracing::{info, warn};

/// Everything derived from the series table besides the chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Analytics {
    /// Pearson correlation of NDVI vs ET over complete years.
    pub correlation: Option<f64>,
    pub complete_pairs: usize,
    pub summaries: Vec<ColumnSummary>,
    pub trends: Vec<LinearTrend>,
}

/// Compute correlation, per-variable summaries and trends.
pub fn analyze(table: &SeriesTable) -> Analytics {
    let pairs = table.complete_pairs();
    let correlation = pearson(&pairs);

    match correlation {
        Some(r) => info!(
            "Correlation (NDVI vs ET) over {} years: {:.4}",
            pairs.len(),
            r
        ),
        None => warn!(
            "Correlation undefined: {} complete years or zero variance",
            pairs.len()
        ),
    }

    Analytics {
        correlation,
        complete_pairs: pairs.len(),
        summaries: Variable::ALL.iter().map(|&v| summarize(table, v)).collect(),
        trends: Variable::ALL.iter().map(|&v| linear_trend(table, v)).collect(),
    }
}
