//! Series statistics: correlation, column summaries and linear trend.

use crate::models::{SeriesTable, Variable};
use serde::{Deserialize, Serialize};

/// Pearson correlation coefficient over paired samples.
///
/// Returns `None` with fewer than two pairs or when either side has zero
/// variance.
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }

    // Rounding in the mean leaves a tiny nonzero spread on constant columns.
    let (x0, y0) = pairs[0];
    if pairs.iter().all(|&(x, _)| x == x0) || pairs.iter().all(|&(_, y)| y == y0) {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }

    let r = sxy / (sxx * syy).sqrt();
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Descriptive statistics of one column of the series table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub variable: Variable,
    /// Years with a value.
    pub count: usize,
    /// Years without a value.
    pub missing: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Summarize one column, ignoring null years.
pub fn summarize(table: &SeriesTable, variable: Variable) -> ColumnSummary {
    let values: Vec<f64> = table.column(variable).into_iter().flatten().collect();
    let count = values.len();

    let (mean, min, max) = if values.is_empty() {
        (None, None, None)
    } else {
        (
            Some(values.iter().sum::<f64>() / count as f64),
            values.iter().copied().reduce(f64::min),
            values.iter().copied().reduce(f64::max),
        )
    };

    ColumnSummary {
        variable,
        count,
        missing: table.len() - count,
        mean,
        min,
        max,
    }
}

/// Ordinary least-squares fit of value against year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearTrend {
    pub variable: Variable,
    /// Change per year; `None` with fewer than two years of data.
    pub slope_per_year: Option<f64>,
    pub intercept: Option<f64>,
    pub years_used: usize,
}

/// Fit a linear trend to one column, ignoring null years.
pub fn linear_trend(table: &SeriesTable, variable: Variable) -> LinearTrend {
    let points: Vec<(f64, f64)> = table
        .records
        .iter()
        .filter_map(|r| r.value(variable).map(|v| (r.year as f64, v)))
        .collect();

    let mut trend = LinearTrend {
        variable,
        slope_per_year: None,
        intercept: None,
        years_used: points.len(),
    };

    if points.len() < 2 {
        return trend;
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxy: f64 = points.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();

    if sxx > 0.0 {
        let slope = sxy / sxx;
        trend.slope_per_year = Some(slope);
        trend.intercept = Some(mean_y - slope * mean_x);
    }

    trend
}
