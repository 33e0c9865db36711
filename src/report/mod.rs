//! Report generation and output.

pub mod generator;

pub use generator::{
    format_correlation, format_value, generate_json_report, generate_markdown_report,
};

use crate::models::{Report, ReportMetadata};
use crate::pipeline::PipelineOutput;
use chrono::Utc;

/// Assemble the report for a finished run.
pub fn build_report(output: &PipelineOutput, backend: &str, duration_seconds: f64) -> Report {
    Report {
        metadata: ReportMetadata {
            region_id: output.region.id.clone(),
            backend: backend.to_string(),
            vegetation_dataset: output.series.vegetation.dataset_id.clone(),
            et_dataset: output.series.et.dataset_id.clone(),
            start_year: output.years.start(),
            end_year: output.years.end(),
            analysis_date: Utc::now(),
            duration_seconds,
        },
        table: output.table.clone(),
        correlation: output.analytics.correlation,
        summaries: output.analytics.summaries.clone(),
        trends: output.analytics.trends.clone(),
        exports: output.exports.tickets.clone(),
        export_failures: output.exports.failures.clone(),
        chart: output.chart.clone(),
    }
}
