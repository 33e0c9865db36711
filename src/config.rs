//! Configuration file handling.
//!
//! This module handles loading `.ndvi-et.toml` files, merging them with
//! command-line arguments, and freezing the result into the immutable
//! [`PipelineConfig`] handed to every pipeline stage.

use crate::cli::BackendKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".ndvi-et.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Region of interest.
    #[serde(default)]
    pub region: RegionConfig,

    /// Analysed years.
    #[serde(default)]
    pub period: PeriodConfig,

    /// Source datasets.
    #[serde(default)]
    pub datasets: DatasetsConfig,

    /// Spatial reduction settings.
    #[serde(default)]
    pub reduction: ReductionConfig,

    /// Raster export settings.
    #[serde(default)]
    pub export: ExportConfig,

    /// Compute backend settings.
    #[serde(default)]
    pub backend: BackendConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Report output path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Chart (SVG) output path.
    #[serde(default = "default_chart_output")]
    pub chart_output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of concurrent backend requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            chart_output: default_chart_output(),
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output() -> String {
    "ndvi_et_report.md".to_string()
}

fn default_chart_output() -> String {
    "ndvi_et_trend.svg".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// Region of interest settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Catalog identifier of the region geometry.
    #[serde(default)]
    pub id: Option<String>,
}

/// Year range settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodConfig {
    #[serde(default = "default_start_year")]
    pub start_year: i32,

    #[serde(default = "default_end_year")]
    pub end_year: i32,
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            start_year: default_start_year(),
            end_year: default_end_year(),
        }
    }
}

fn default_start_year() -> i32 {
    2000
}

fn default_end_year() -> i32 {
    2024
}

/// Source dataset settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetsConfig {
    #[serde(default = "default_vegetation_id")]
    pub vegetation_id: String,

    #[serde(default = "default_vegetation_band")]
    pub vegetation_band: String,

    /// Linear rescale applied to raw vegetation-index values.
    #[serde(default = "default_vegetation_scale_factor")]
    pub vegetation_scale_factor: f64,

    #[serde(default = "default_et_id")]
    pub et_id: String,

    #[serde(default = "default_et_band")]
    pub et_band: String,
}

impl Default for DatasetsConfig {
    fn default() -> Self {
        Self {
            vegetation_id: default_vegetation_id(),
            vegetation_band: default_vegetation_band(),
            vegetation_scale_factor: default_vegetation_scale_factor(),
            et_id: default_et_id(),
            et_band: default_et_band(),
        }
    }
}

fn default_vegetation_id() -> String {
    "MODIS/061/MOD13A2".to_string()
}

fn default_vegetation_band() -> String {
    "NDVI".to_string()
}

fn default_vegetation_scale_factor() -> f64 {
    0.0001
}

fn default_et_id() -> String {
    "MODIS/006/MOD16A2".to_string()
}

fn default_et_band() -> String {
    "ET".to_string()
}

/// Spatial reduction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionConfig {
    /// Vegetation reduction scale in meters per pixel.
    #[serde(default = "default_vegetation_scale")]
    pub vegetation_scale: f64,

    /// ET reduction scale in meters per pixel.
    #[serde(default = "default_et_scale")]
    pub et_scale: f64,

    /// Pixel cap for a single reduction.
    #[serde(default = "default_reduce_max_pixels")]
    pub max_pixels: f64,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            vegetation_scale: default_vegetation_scale(),
            et_scale: default_et_scale(),
            max_pixels: default_reduce_max_pixels(),
        }
    }
}

fn default_vegetation_scale() -> f64 {
    1000.0
}

fn default_et_scale() -> f64 {
    500.0
}

fn default_reduce_max_pixels() -> f64 {
    1e9
}

/// Raster export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_vegetation_folder")]
    pub vegetation_folder: String,

    #[serde(default = "default_et_folder")]
    pub et_folder: String,

    /// Pixel cap for a single raster export.
    #[serde(default = "default_export_max_pixels")]
    pub max_pixels: f64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vegetation_folder: default_vegetation_folder(),
            et_folder: default_et_folder(),
            max_pixels: default_export_max_pixels(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_vegetation_folder() -> String {
    "GEE_NDVI_Exports".to_string()
}

fn default_et_folder() -> String {
    "GEE_ET_Exports".to_string()
}

fn default_export_max_pixels() -> f64 {
    1e13
}

/// Compute backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Root of the local catalog (local backend).
    #[serde(default = "default_catalog_dir")]
    pub catalog_dir: String,

    /// Directory receiving local exports (local backend).
    #[serde(default = "default_export_root")]
    pub export_root: String,

    /// Service base URL (http backend).
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Bearer token (http backend). Never written by `--init-config`.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            catalog_dir: default_catalog_dir(),
            export_root: default_export_root(),
            url: default_backend_url(),
            token: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_catalog_dir() -> String {
    "catalog".to_string()
}

fn default_export_root() -> String {
    "exports".to_string()
}

fn default_backend_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_default_from(Path::new("."))
    }

    /// [`Config::load_default`] relative to `dir`.
    pub fn load_default_from(dir: &Path) -> Result<Option<Self>> {
        let default_path = dir.join(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(&default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Log level after merging: `quiet` wins, then `general.verbose`.
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only arguments the user actually passed override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref region) = args.region {
            self.region.id = Some(region.clone());
        }
        if let Some(start) = args.start_year {
            self.period.start_year = start;
        }
        if let Some(end) = args.end_year {
            self.period.end_year = end;
        }

        if let Some(kind) = args.backend {
            self.backend.kind = kind;
        }
        if let Some(ref catalog) = args.catalog {
            self.backend.catalog_dir = catalog.display().to_string();
        }
        if let Some(ref root) = args.export_root {
            self.backend.export_root = root.display().to_string();
        }
        if let Some(ref url) = args.backend_url {
            self.backend.url = url.clone();
        }
        if args.token.is_some() {
            self.backend.token = args.token.clone();
        }
        if let Some(timeout) = args.timeout {
            self.backend.timeout_seconds = timeout;
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(ref chart) = args.chart {
            self.general.chart_output = chart.display().to_string();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if args.verbose {
            self.general.verbose = true;
        }

        if args.no_export {
            self.export.enabled = false;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config.region.id = Some("projects/my-project/assets/region".to_string());
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }

    /// Freeze into the immutable configuration the pipeline runs on.
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig> {
        let region_id = self
            .region
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .context("No region configured; pass --region or set [region] id")?;

        if self.general.concurrency == 0 {
            anyhow::bail!("Concurrency must be at least 1");
        }

        for (name, value) in [
            ("reduction.vegetation_scale", self.reduction.vegetation_scale),
            ("reduction.et_scale", self.reduction.et_scale),
            ("reduction.max_pixels", self.reduction.max_pixels),
            ("export.max_pixels", self.export.max_pixels),
        ] {
            if !(value.is_finite() && value > 0.0) {
                anyhow::bail!("{} must be a positive number, got {}", name, value);
            }
        }

        if !self.datasets.vegetation_scale_factor.is_finite() {
            anyhow::bail!("datasets.vegetation_scale_factor must be finite");
        }

        Ok(PipelineConfig {
            region_id,
            start_year: self.period.start_year,
            end_year: self.period.end_year,
            vegetation_dataset_id: self.datasets.vegetation_id.clone(),
            vegetation_band: self.datasets.vegetation_band.clone(),
            vegetation_scale_factor: self.datasets.vegetation_scale_factor,
            et_dataset_id: self.datasets.et_id.clone(),
            et_band: self.datasets.et_band.clone(),
            vegetation_reduction_scale: self.reduction.vegetation_scale,
            et_reduction_scale: self.reduction.et_scale,
            reduce_max_pixels: self.reduction.max_pixels,
            export_enabled: self.export.enabled,
            export_max_pixels: self.export.max_pixels,
            export_folder_vegetation: self.export.vegetation_folder.clone(),
            export_folder_et: self.export.et_folder.clone(),
            concurrency: self.general.concurrency,
        })
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.general.output)
    }

    pub fn chart_path(&self) -> PathBuf {
        PathBuf::from(&self.general.chart_output)
    }
}

/// Immutable run configuration shared by every pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub region_id: String,
    pub start_year: i32,
    pub end_year: i32,
    pub vegetation_dataset_id: String,
    pub vegetation_band: String,
    pub vegetation_scale_factor: f64,
    pub et_dataset_id: String,
    pub et_band: String,
    pub vegetation_reduction_scale: f64,
    pub et_reduction_scale: f64,
    pub reduce_max_pixels: f64,
    pub export_enabled: bool,
    pub export_max_pixels: f64,
    pub export_folder_vegetation: String,
    pub export_folder_et: String,
    pub concurrency: usize,
}

impl PipelineConfig {
    pub fn reduction_scale(&self, variable: crate::models::Variable) -> f64 {
        match variable {
            crate::models::Variable::Ndvi => self.vegetation_reduction_scale,
            crate::models::Variable::Et => self.et_reduction_scale,
        }
    }

    pub fn export_folder(&self, variable: crate::models::Variable) -> &str {
        match variable {
            crate::models::Variable::Ndvi => &self.export_folder_vegetation,
            crate::models::Variable::Et => &self.export_folder_et,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Variable;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.datasets.vegetation_id, "MODIS/061/MOD13A2");
        assert_eq!(config.datasets.vegetation_scale_factor, 0.0001);
        assert_eq!(config.reduction.vegetation_scale, 1000.0);
        assert_eq!(config.reduction.et_scale, 500.0);
        assert_eq!(config.reduction.max_pixels, 1e9);
        assert_eq!(config.export.max_pixels, 1e13);
        assert!(config.export.max_pixels > config.reduction.max_pixels);
        assert_eq!(config.backend.kind, BackendKind::Local);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[region]
id = "projects/demo/assets/MCS"

[period]
start_year = 2020
end_year = 2022

[reduction]
et_scale = 250.0

[export]
enabled = false
et_folder = "et_out"

[backend]
kind = "http"
url = "https://geo.example.com"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.region.id.as_deref(), Some("projects/demo/assets/MCS"));
        assert_eq!(config.period.start_year, 2020);
        assert_eq!(config.period.end_year, 2022);
        assert_eq!(config.reduction.et_scale, 250.0);
        assert_eq!(config.reduction.vegetation_scale, 1000.0);
        assert!(!config.export.enabled);
        assert_eq!(config.export.et_folder, "et_out");
        assert_eq!(config.export.vegetation_folder, "GEE_NDVI_Exports");
        assert_eq!(config.backend.kind, BackendKind::Http);
        assert_eq!(config.backend.url, "https://geo.example.com");
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[datasets]"));
        assert!(toml_str.contains("[export]"));
        assert!(!toml_str.contains("token"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert!(reparsed.to_pipeline_config().is_ok());
    }

    #[test]
    fn test_pipeline_config_requires_region() {
        let config = Config::default();
        assert!(config.to_pipeline_config().is_err());
    }

    #[test]
    fn test_pipeline_config_rejects_bad_scale() {
        let mut config = Config::default();
        config.region.id = Some("roi".to_string());
        config.reduction.et_scale = 0.0;
        assert!(config.to_pipeline_config().is_err());
    }

    #[test]
    fn test_pipeline_config_per_variable_lookup() {
        let mut config = Config::default();
        config.region.id = Some("roi".to_string());
        let pipeline = config.to_pipeline_config().unwrap();
        assert_eq!(pipeline.reduction_scale(Variable::Ndvi), 1000.0);
        assert_eq!(pipeline.reduction_scale(Variable::Et), 500.0);
        assert_eq!(pipeline.export_folder(Variable::Et), "GEE_ET_Exports");
    }

    fn parse_args(argv: &[&str]) -> crate::cli::Args {
        use clap::Parser;
        crate::cli::Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_log_level_follows_config_and_flags() {
        let mut config = Config::default();
        config.merge_with_args(&parse_args(&["ndvi-et-trend"]));
        assert_eq!(config.log_level(false), tracing::Level::INFO);

        config.merge_with_args(&parse_args(&["ndvi-et-trend", "--verbose"]));
        assert_eq!(config.log_level(false), tracing::Level::DEBUG);

        let mut from_file: Config = toml::from_str("[general]\nverbose = true\n").unwrap();
        from_file.merge_with_args(&parse_args(&["ndvi-et-trend"]));
        assert_eq!(from_file.log_level(false), tracing::Level::DEBUG);
        assert_eq!(from_file.log_level(true), tracing::Level::ERROR);
    }

    #[test]
    fn test_malformed_default_config_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Config::load_default_from(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[general]\nconcurrency = \"four\"\n",
        )
        .unwrap();
        let err = Config::load_default_from(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));

        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[period]\nstart_year = 2010\n").unwrap();
        let config = Config::load_default_from(dir.path()).unwrap().unwrap();
        assert_eq!(config.period.start_year, 2010);
    }
}
