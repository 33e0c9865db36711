//! Data models for the trend pipeline.
//!
//! This module contains the core data structures passed between the
//! pipeline stages: year ranges, regions, composite descriptions,
//! per-year records, export tickets and the final report.

use crate::analysis::{ColumnSummary, LinearTrend};
use crate::chart::ChartSpec;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One of the two analysed variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Variable {
    /// Normalized Difference Vegetation Index
    #[serde(rename = "NDVI")]
    Ndvi,
    /// Evapotranspiration
    #[serde(rename = "ET")]
    Et,
}

impl Variable {
    pub const ALL: [Variable; 2] = [Variable::Ndvi, Variable::Et];

    /// Short upper-case name, also used as the export name prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Variable::Ndvi => "NDVI",
            Variable::Et => "ET",
        }
    }

    /// Line color used when charting this variable.
    pub fn chart_color(&self) -> &'static str {
        match self {
            Variable::Ndvi => "green",
            Variable::Et => "blue",
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Closed, validated range of calendar years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    start: i32,
    end: i32,
}

impl YearRange {
    /// Build a range, failing when `end < start`.
    pub fn new(start: i32, end: i32) -> Result<Self> {
        if end < start {
            return Err(PipelineError::InvalidRange { start, end });
        }
        if NaiveDate::from_ymd_opt(start, 1, 1).is_none()
            || NaiveDate::from_ymd_opt(end.saturating_add(1), 1, 1).is_none()
        {
            return Err(PipelineError::Config(format!(
                "year range {}-{} is outside the supported calendar",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    /// Number of years in the range (always at least 1).
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Years in ascending order.
    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }

    /// Per-year windows in ascending order.
    pub fn windows(&self) -> impl Iterator<Item = YearWindow> {
        self.years().map(YearWindow::for_year)
    }

    /// Inclusive date range `[start-01-01, end-12-31]`.
    pub fn date_range(&self) -> DateRange {
        DateRange {
            start: first_of_year(self.start),
            end: last_of_year(self.end),
        }
    }
}

fn first_of_year(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn last_of_year(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Half-open window `[Jan 1 year, Jan 1 year+1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearWindow {
    pub year: i32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl YearWindow {
    pub fn for_year(year: i32) -> Self {
        let start = first_of_year(year);
        let end = start
            .with_year(year + 1)
            .unwrap_or_else(|| last_of_year(year));
        Self { year, start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

/// Display style carried with a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStyle {
    pub color: String,
}

impl Default for RegionStyle {
    fn default() -> Self {
        Self {
            color: "red".to_string(),
        }
    }
}

/// Resolved region of interest. Shared read-only by every stage.
#[derive(Debug, Clone)]
pub struct Region {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
    pub style: RegionStyle,
}

/// A filtered, band-selected, rescaled raster time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterSeries {
    pub variable: Variable,
    pub dataset_id: String,
    pub band: String,
    pub scale_factor: f64,
    pub range: DateRange,
}

impl RasterSeries {
    /// Apply the linear rescale to a raw band value.
    pub fn normalize(&self, raw: f64) -> f64 {
        raw * self.scale_factor
    }
}

/// Description of a yearly composite: temporal mean of a series over one
/// window, clipped to the region. Nothing is computed until a backend
/// materializes it.
#[derive(Debug, Clone)]
pub struct CompositeSpec {
    pub series: Arc<RasterSeries>,
    pub window: YearWindow,
    pub region: Arc<Region>,
}

impl CompositeSpec {
    pub fn variable(&self) -> Variable {
        self.series.variable
    }

    pub fn year(&self) -> i32 {
        self.window.year
    }
}

/// Request to reduce a composite to its area-weighted spatial mean.
#[derive(Debug, Clone)]
pub struct ReductionRequest {
    pub composite: CompositeSpec,
    /// Sampling resolution in meters per pixel.
    pub scale: f64,
    pub max_pixels: f64,
}

/// Request to export a composite raster to external storage.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub composite: CompositeSpec,
    /// Destination name, `{VAR}_{year}`.
    pub name: String,
    pub folder: String,
    pub scale: f64,
    pub max_pixels: f64,
}

impl ExportRequest {
    pub fn export_name(variable: Variable, year: i32) -> String {
        format!("{}_{}", variable.name(), year)
    }
}

/// Known lifecycle state of a submitted export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Accepted by the backend. Completion is not tracked.
    Submitted,
}

/// Handle returned for every accepted export submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
    pub name: String,
    pub folder: String,
    pub variable: Variable,
    pub year: i32,
    pub submitted_at: DateTime<Utc>,
    pub state: JobState,
}

/// Scalar means for one year. `None` means no valid observations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearlyRecord {
    pub year: i32,
    pub ndvi_mean: Option<f64>,
    pub et_mean: Option<f64>,
}

impl YearlyRecord {
    pub fn empty(year: i32) -> Self {
        Self {
            year,
            ndvi_mean: None,
            et_mean: None,
        }
    }

    pub fn value(&self, variable: Variable) -> Option<f64> {
        match variable {
            Variable::Ndvi => self.ndvi_mean,
            Variable::Et => self.et_mean,
        }
    }

    pub fn set(&mut self, variable: Variable, value: Option<f64>) {
        match variable {
            Variable::Ndvi => self.ndvi_mean = value,
            Variable::Et => self.et_mean = value,
        }
    }

    /// Both values, when present.
    pub fn pair(&self) -> Option<(f64, f64)> {
        Some((self.ndvi_mean?, self.et_mean?))
    }
}

/// Stage at which a per-year failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Reduction,
    Export,
}

/// A failure scoped to one (year, variable) that did not stop the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearFailure {
    pub year: i32,
    pub variable: Variable,
    pub stage: FailureStage,
    pub message: String,
}

/// One record per year, ascending and contiguous.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesTable {
    pub records: Vec<YearlyRecord>,
    /// Reductions that failed and left a null in `records`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<YearFailure>,
}

impl SeriesTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of one column, in year order.
    pub fn column(&self, variable: Variable) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.value(variable)).collect()
    }

    /// `(ndvi, et)` pairs for years where both are present.
    pub fn complete_pairs(&self) -> Vec<(f64, f64)> {
        self.records.iter().filter_map(YearlyRecord::pair).collect()
    }
}

/// Metadata about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub region_id: String,
    pub backend: String,
    pub vegetation_dataset: String,
    pub et_dataset: String,
    pub start_year: i32,
    pub end_year: i32,
    pub analysis_date: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// The complete trend report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub table: SeriesTable,
    /// Pearson correlation of NDVI vs ET; `None` when undefined.
    pub correlation: Option<f64>,
    pub summaries: Vec<ColumnSummary>,
    pub trends: Vec<LinearTrend>,
    pub exports: Vec<JobTicket>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub export_failures: Vec<YearFailure>,
    pub chart: ChartSpec,
}

impl Report {
    /// Number of (year, variable) failures across reduction and export.
    pub fn failure_count(&self) -> usize {
        self.table.failures.len() + self.export_failures.len()
    }
}
