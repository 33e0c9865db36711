//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Options left unset fall back to the
//! configuration file and then to built-in defaults.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// ndvi-et-trend - yearly NDVI and evapotranspiration trends
///
/// Composites MODIS-style NDVI and ET time series per year over a region,
/// reduces them to regional means, charts the trend, computes the Pearson
/// correlation and submits yearly raster exports.
///
/// Examples:
///   ndvi-et-trend --region projects/demo/assets/MCS --catalog ./catalog
///   ndvi-et-trend --region MCS --start-year 2020 --end-year 2022 --format json
///   ndvi-et-trend --backend http --backend-url https://geo.example.com --region MCS
///   ndvi-et-trend --region MCS --dry-run
///   ndvi-et-trend --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Catalog identifier of the region of interest
    #[arg(short, long, value_name = "ID")]
    pub region: Option<String>,

    /// First year of the analysis (inclusive)
    #[arg(long, value_name = "YEAR")]
    pub start_year: Option<i32>,

    /// Last year of the analysis (inclusive)
    #[arg(long, value_name = "YEAR")]
    pub end_year: Option<i32>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .ndvi-et.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Compute backend to use
    #[arg(long, value_name = "KIND")]
    pub backend: Option<BackendKind>,

    /// Local catalog directory (local backend)
    #[arg(long, value_name = "DIR")]
    pub catalog: Option<PathBuf>,

    /// Directory receiving raster exports (local backend)
    #[arg(long, value_name = "DIR")]
    pub export_root: Option<PathBuf>,

    /// Base URL of the geospatial service (http backend)
    #[arg(long, value_name = "URL", env = "NDVI_ET_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Bearer token for the geospatial service (http backend)
    #[arg(long, value_name = "TOKEN", env = "NDVI_ET_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output file path for the SVG trend chart
    #[arg(long, value_name = "FILE")]
    pub chart: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Number of concurrent backend requests
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Skip raster export submission
    #[arg(long)]
    pub no_export: bool,

    /// Print the planned composites and exports without contacting the backend
    #[arg(long)]
    pub dry_run: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .ndvi-et.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Compute backend selection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process raster stack over a directory catalog
    #[default]
    Local,
    /// Remote geospatial service over HTTP
    Http,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Http => write!(f, "http"),
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let (Some(start), Some(end)) = (self.start_year, self.end_year) {
            if end < start {
                return Err(format!(
                    "End year {} must not be before start year {}",
                    end, start
                ));
            }
        }

        if let Some(ref url) = self.backend_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Backend URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(ref catalog) = self.catalog {
            if !catalog.is_dir() {
                return Err(format!(
                    "Catalog directory does not exist: {}",
                    catalog.display()
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            region: Some("projects/demo/assets/MCS".to_string()),
            start_year: None,
            end_year: None,
            config: None,
            backend: None,
            catalog: None,
            export_root: None,
            backend_url: None,
            token: None,
            timeout: None,
            output: None,
            chart: None,
            format: OutputFormat::Markdown,
            concurrency: None,
            no_export: false,
            dry_run: false,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "ndvi-et-trend",
            "--region",
            "MCS",
            "--start-year",
            "2020",
            "--end-year",
            "2022",
            "--backend",
            "http",
            "--format",
            "json",
            "--no-export",
        ])
        .unwrap();
        assert_eq!(args.region.as_deref(), Some("MCS"));
        assert_eq!(args.start_year, Some(2020));
        assert_eq!(args.backend, Some(BackendKind::Http));
        assert_eq!(args.format, OutputFormat::Json);
        assert!(args.no_export);
    }

    #[test]
    fn test_validation_inverted_years() {
        let mut args = make_args();
        args.start_year = Some(2024);
        args.end_year = Some(2000);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut args = make_args();
        args.backend_url = Some("geo.example.com".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }
}
