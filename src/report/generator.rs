//! Markdown and JSON report generation.
//!
//! This module renders the trend report: run metadata, the yearly series
//! table, correlation, per-variable statistics, failures and export
//! tickets.

use crate::analysis::{ColumnSummary, LinearTrend};
use crate::models::{FailureStage, JobTicket, Report, ReportMetadata, SeriesTable, YearFailure};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    // Title
    output.push_str(&format!("# {}\n\n", report.chart.title));

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata));

    // Table of contents
    output.push_str(&generate_table_of_contents(report));

    // Yearly series
    output.push_str(&generate_series_section(&report.table));

    // Correlation and statistics
    output.push_str(&generate_correlation_section(
        report.correlation,
        report.table.complete_pairs().len(),
    ));
    output.push_str(&generate_statistics_section(&report.summaries, &report.trends));

    // Failures
    output.push_str(&generate_failures_section(
        &report.table.failures,
        &report.export_failures,
    ));

    // Exports
    output.push_str(&generate_exports_section(&report.exports));

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Format an optional value, or `null` when absent.
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.4}", v),
        None => "null".to_string(),
    }
}

/// Format the correlation, or `undefined` when absent.
pub fn format_correlation(correlation: Option<f64>) -> String {
    match correlation {
        Some(r) => format!("{:.4}", r),
        None => "undefined".to_string(),
    }
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Region:** `{}`\n", metadata.region_id));
    section.push_str(&format!(
        "- **Years:** {} to {}\n",
        metadata.start_year, metadata.end_year
    ));
    section.push_str(&format!(
        "- **Vegetation Dataset:** `{}`\n",
        metadata.vegetation_dataset
    ));
    section.push_str(&format!("- **ET Dataset:** `{}`\n", metadata.et_dataset));
    section.push_str(&format!("- **Backend:** {}\n", metadata.backend));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Yearly Series](#yearly-series)\n");
    toc.push_str("- [Correlation](#correlation)\n");
    toc.push_str("- [Statistics](#statistics)\n");
    if report.failure_count() > 0 {
        toc.push_str("- [Failures](#failures)\n");
    }
    if !report.exports.is_empty() {
        toc.push_str("- [Exports](#exports)\n");
    }
    toc.push('\n');

    toc
}

/// Generate the yearly series table.
fn generate_series_section(table: &SeriesTable) -> String {
    let mut section = String::new();

    section.push_str("## Yearly Series\n\n");
    section.push_str("| Year | NDVI Mean | ET Mean |\n");
    section.push_str("|:---:|---:|---:|\n");

    for record in &table.records {
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            record.year,
            format_value(record.ndvi_mean),
            format_value(record.et_mean)
        ));
    }
    section.push('\n');

    section
}

/// Generate the correlation section.
fn generate_correlation_section(correlation: Option<f64>, pairs: usize) -> String {
    let mut section = String::new();

    section.push_str("## Correlation\n\n");
    section.push_str(&format!(
        "Pearson correlation (NDVI vs ET): **{}**\n\n",
        format_correlation(correlation)
    ));
    section.push_str(&format!("*Computed over {} complete years.*\n\n", pairs));

    section
}

/// Generate the statistics section.
fn generate_statistics_section(summaries: &[ColumnSummary], trends: &[LinearTrend]) -> String {
    let mut section = String::new();

    section.push_str("## Statistics\n\n");
    section.push_str("| Variable | Years | Missing | Mean | Min | Max | Trend / Year |\n");
    section.push_str("|:---|:---:|:---:|---:|---:|---:|---:|\n");

    for summary in summaries {
        let slope = trends
            .iter()
            .find(|t| t.variable == summary.variable)
            .and_then(|t| t.slope_per_year);
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            summary.variable,
            summary.count,
            summary.missing,
            format_value(summary.mean),
            format_value(summary.min),
            format_value(summary.max),
            format_value(slope)
        ));
    }
    section.push('\n');

    section
}

/// Generate the failures section.
fn generate_failures_section(reductions: &[YearFailure], exports: &[YearFailure]) -> String {
    if reductions.is_empty() && exports.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Failures\n\n");
    section.push_str("| Year | Variable | Stage | Error |\n");
    section.push_str("|:---:|:---|:---|:---|\n");

    for failure in reductions.iter().chain(exports) {
        let stage = match failure.stage {
            FailureStage::Reduction => "reduction",
            FailureStage::Export => "export",
        };
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            failure.year,
            failure.variable,
            stage,
            failure.message.replace('|', "\\|")
        ));
    }
    section.push('\n');

    section
}

/// Generate the exports section.
fn generate_exports_section(tickets: &[JobTicket]) -> String {
    if tickets.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Exports\n\n");
    section.push_str(
        "Submitted exports. Completion is tracked by the backend, not by this report.\n\n",
    );
    section.push_str("| Name | Folder | Job |\n");
    section.push_str("|:---|:---|:---|\n");

    for ticket in tickets {
        section.push_str(&format!(
            "| {} | {} | `{}` |\n",
            ticket.name, ticket.folder, ticket.job_id
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by ndvi-et-trend v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
