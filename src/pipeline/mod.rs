//! The yearly trend pipeline.
//!
//! Stages run in a fixed order: region selection, dataset loading, yearly
//! aggregation, series assembly, analytics and export submission. Every
//! stage reads the same immutable [`PipelineConfig`] and talks to the
//! outside world only through a [`GeoBackend`].

pub mod aggregator;
pub mod exporter;
pub mod loader;
pub mod region;
pub mod series;

use crate::analysis::{self, Analytics};
use crate::backend::GeoBackend;
use crate::chart::ChartSpec;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{ExportRequest, Region, SeriesTable, Variable, YearRange};
use exporter::ExportOutcome;
use loader::LoadedSeries;
use std::sync::Arc;
use tracing::info;

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub region: Arc<Region>,
    pub years: YearRange,
    pub series: LoadedSeries,
    pub table: SeriesTable,
    pub analytics: Analytics,
    pub chart: ChartSpec,
    pub exports: ExportOutcome,
}

impl PipelineOutput {
    /// Number of (year, variable) failures that did not abort the run.
    pub fn failure_count(&self) -> usize {
        self.table.failures.len() + self.exports.failures.len()
    }
}

/// A single planned reduction, listed by `--dry-run`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedReduction {
    pub year: i32,
    pub variable: Variable,
    pub scale: f64,
}

/// What a run would do, computed without contacting the backend.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub region_id: String,
    pub years: YearRange,
    pub series: LoadedSeries,
    pub reductions: Vec<PlannedReduction>,
    /// `(folder, name)` of every export, empty when exports are disabled.
    pub exports: Vec<(String, String)>,
}

/// Describe what a run over `config` would do, without a backend.
pub fn plan(config: &PipelineConfig) -> Result<RunPlan> {
    let years = YearRange::new(config.start_year, config.end_year)?;
    let series = loader::describe_datasets(config, years);

    let reductions = years
        .years()
        .flat_map(|year| {
            Variable::ALL.into_iter().map(move |variable| PlannedReduction {
                year,
                variable,
                scale: config.reduction_scale(variable),
            })
        })
        .collect();

    let exports = if config.export_enabled {
        years
            .years()
            .flat_map(|year| {
                Variable::ALL.into_iter().map(move |variable| {
                    (
                        config.export_folder(variable).to_string(),
                        ExportRequest::export_name(variable, year),
                    )
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(RunPlan {
        region_id: config.region_id.clone(),
        years,
        series,
        reductions,
        exports,
    })
}

/// Runs the stages against one backend.
pub struct Pipeline {
    backend: Arc<dyn GeoBackend>,
    config: PipelineConfig,
    show_progress: bool,
}

impl Pipeline {
    pub fn new(backend: Arc<dyn GeoBackend>, config: PipelineConfig) -> Self {
        Self {
            backend,
            config,
            show_progress: false,
        }
    }

    /// Show a progress bar during aggregation.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Run every stage.
    ///
    /// Aborts on an invalid range, a missing region or dataset, or a
    /// backend failure. Per-year resource limits and failed export
    /// submissions are recorded in the output instead.
    pub async fn run(&self) -> Result<PipelineOutput> {
        let config = &self.config;
        let backend = self.backend.as_ref();

        let years = YearRange::new(config.start_year, config.end_year)?;
        info!(
            "Running {} to {} on backend {}",
            years.start(),
            years.end(),
            backend.name()
        );

        let region = region::select_region(backend, &config.region_id).await?;
        let series = loader::load_datasets(backend, config, years).await?;

        let outcomes = aggregator::aggregate_years(
            backend,
            config,
            &series,
            &region,
            years,
            self.show_progress,
        )
        .await?;
        let table = series::assemble(years, outcomes);
        info!(
            "Assembled {} yearly records ({} reduction failures)",
            table.len(),
            table.failures.len()
        );

        let analytics = analysis::analyze(&table);
        let chart = ChartSpec::from_table(&table, years);

        let exports = if config.export_enabled {
            let requests = exporter::plan_exports(config, &series, &region, years);
            info!("Submitting {} exports", requests.len());
            exporter::submit_exports(backend, config, requests).await
        } else {
            info!("Exports disabled");
            ExportOutcome::default()
        };

        Ok(PipelineOutput {
            region,
            years,
            series,
            table,
            analytics,
            chart,
            exports,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::local::tests::{write_catalog, REGION_ID};
    use crate::backend::LocalBackend;
    use crate::config::Config;
    use crate::error::PipelineError;
    use crate::models::{JobState, JobTicket, RasterSeries, ReductionRequest, RegionStyle};
    use async_trait::async_trait;
    use chrono::Utc;
    use geo::{MultiPolygon, Rect};
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    pub fn pipeline_config(start_year: i32, end_year: i32) -> PipelineConfig {
        let mut config = Config::default();
        config.region.id = Some("projects/demo/assets/MCS".to_string());
        config.period.start_year = start_year;
        config.period.end_year = end_year;
        config.to_pipeline_config().unwrap()
    }

    pub fn test_region() -> Arc<Region> {
        let square = Rect::new((0.0, 0.0), (2000.0, 2000.0)).to_polygon();
        Arc::new(Region {
            id: "projects/demo/assets/MCS".to_string(),
            geometry: MultiPolygon(vec![square]),
            style: RegionStyle::default(),
        })
    }

    /// In-memory backend with canned per-year means.
    #[derive(Default)]
    pub struct FakeBackend {
        values: HashMap<(Variable, i32), Option<f64>>,
        limits: HashSet<(Variable, i32)>,
        outages: HashSet<i32>,
        export_failures: HashSet<String>,
        calls: AtomicUsize,
        scales: Mutex<Vec<(Variable, f64)>>,
    }

    impl FakeBackend {
        /// NDVI 0.40, 0.42, 0.50 and ET 45, 50, 60 for 2020 to 2022.
        pub fn scenario() -> Self {
            let mut backend = Self::default();
            for (year, ndvi, et) in [(2020, 0.40, 45.0), (2021, 0.42, 50.0), (2022, 0.50, 60.0)] {
                backend.values.insert((Variable::Ndvi, year), Some(ndvi));
                backend.values.insert((Variable::Et, year), Some(et));
            }
            backend
        }

        pub fn with_value(mut self, variable: Variable, year: i32, value: Option<f64>) -> Self {
            self.values.insert((variable, year), value);
            self
        }

        pub fn with_limit(mut self, variable: Variable, year: i32) -> Self {
            self.limits.insert((variable, year));
            self
        }

        pub fn with_outage(mut self, year: i32) -> Self {
            self.outages.insert(year);
            self
        }

        pub fn with_export_failure(mut self, name: &str) -> Self {
            self.export_failures.insert(name.to_string());
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn reduction_scales(&self) -> Vec<(Variable, f64)> {
            self.scales.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GeoBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        async fn resolve_region(&self, id: &str) -> Result<Region> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if id == "projects/missing" {
                return Err(PipelineError::not_found("region", id));
            }
            Ok(test_region().as_ref().clone())
        }

        async fn resolve_series(&self, _series: &RasterSeries) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn reduce_region(&self, request: &ReductionRequest) -> Result<Option<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = (request.composite.variable(), request.composite.year());
            self.scales.lock().unwrap().push((key.0, request.scale));

            if self.outages.contains(&key.1) {
                return Err(PipelineError::Backend("service unavailable".to_string()));
            }
            if self.limits.contains(&key) {
                return Err(PipelineError::ResourceLimit {
                    variable: key.0,
                    year: key.1,
                    pixels: 2e9,
                    max_pixels: request.max_pixels,
                });
            }
            Ok(self.values.get(&key).copied().flatten())
        }

        async fn submit_export(&self, request: &ExportRequest) -> Result<JobTicket> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.export_failures.contains(&request.name) {
                return Err(PipelineError::Backend("quota exceeded".to_string()));
            }
            Ok(JobTicket {
                job_id: format!("fake-{}", request.name),
                name: request.name.clone(),
                folder: request.folder.clone(),
                variable: request.composite.variable(),
                year: request.composite.year(),
                submitted_at: Utc::now(),
                state: JobState::Submitted,
            })
        }
    }

    #[tokio::test]
    async fn test_run_three_years() {
        let backend = Arc::new(FakeBackend::scenario());
        let pipeline = Pipeline::new(backend.clone(), pipeline_config(2020, 2022));

        let output = pipeline.run().await.unwrap();

        assert_eq!(output.table.len(), 3);
        assert_eq!(output.table.records[0].ndvi_mean, Some(0.40));
        assert_eq!(output.table.records[2].et_mean, Some(60.0));
        let r = output.analytics.correlation.unwrap();
        assert!(r > 0.98 && r <= 1.0);

        let names: Vec<&str> = output.exports.tickets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["NDVI_2020", "ET_2020", "NDVI_2021", "ET_2021", "NDVI_2022", "ET_2022"]
        );
        assert!(output.exports.tickets[..]
            .iter()
            .filter(|t| t.variable == Variable::Et)
            .all(|t| t.folder == "GEE_ET_Exports"));
        assert_eq!(output.failure_count(), 0);
        assert_eq!(output.chart.series.len(), 2);
    }

    #[tokio::test]
    async fn test_run_with_missing_et_year() {
        let backend = Arc::new(FakeBackend::scenario().with_value(Variable::Et, 2021, None));
        let pipeline = Pipeline::new(backend, pipeline_config(2020, 2022));

        let output = pipeline.run().await.unwrap();

        assert_eq!(output.table.len(), 3);
        assert_eq!(output.table.records[1].et_mean, None);
        assert_eq!(output.analytics.complete_pairs, 2);
        assert!(output.analytics.correlation.is_some());
        assert_eq!(output.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_run_is_repeatable() {
        let backend = Arc::new(FakeBackend::scenario());
        let pipeline = Pipeline::new(backend, pipeline_config(2020, 2022));

        let first = pipeline.run().await.unwrap();
        let second = pipeline.run().await.unwrap();

        assert_eq!(first.table, second.table);
        assert_eq!(first.analytics, second.analytics);
        let names = |o: &PipelineOutput| -> Vec<String> {
            o.exports.tickets.iter().map(|t| t.name.clone()).collect()
        };
        assert_eq!(names(&first), names(&second));
    }

    #[tokio::test]
    async fn test_invalid_range_fails_before_backend() {
        let backend = Arc::new(FakeBackend::scenario());
        let pipeline = Pipeline::new(backend.clone(), pipeline_config(2024, 2000));

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidRange {
                start: 2024,
                end: 2000
            }
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_region_aborts() {
        let backend = Arc::new(FakeBackend::scenario());
        let mut config = pipeline_config(2020, 2022);
        config.region_id = "projects/missing".to_string();
        let pipeline = Pipeline::new(backend.clone(), config);

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { kind: "region", .. }));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_resource_limit_continues() {
        let backend = Arc::new(FakeBackend::scenario().with_limit(Variable::Ndvi, 2022));
        let pipeline = Pipeline::new(backend, pipeline_config(2020, 2022));

        let output = pipeline.run().await.unwrap();

        assert_eq!(output.table.records[2].ndvi_mean, None);
        assert_eq!(output.table.records[2].et_mean, Some(60.0));
        assert_eq!(output.failure_count(), 1);
        assert_eq!(output.exports.tickets.len(), 6);
    }

    #[tokio::test]
    async fn test_exports_disabled() {
        let backend = Arc::new(FakeBackend::scenario());
        let mut config = pipeline_config(2020, 2022);
        config.export_enabled = false;
        let pipeline = Pipeline::new(backend, config);

        let output = pipeline.run().await.unwrap();
        assert!(output.exports.tickets.is_empty());
        assert_eq!(output.table.len(), 3);
    }

    #[test]
    fn test_plan() {
        let plan = plan(&pipeline_config(2020, 2021)).unwrap();
        assert_eq!(plan.reductions.len(), 4);
        assert_eq!(plan.reductions[1].variable, Variable::Et);
        assert_eq!(plan.reductions[1].scale, 500.0);
        assert_eq!(
            plan.exports[0],
            ("GEE_NDVI_Exports".to_string(), "NDVI_2020".to_string())
        );

        let mut config = pipeline_config(2020, 2021);
        config.export_enabled = false;
        assert!(super::plan(&config).unwrap().exports.is_empty());
        assert!(super::plan(&pipeline_config(2021, 2020)).is_err());
    }

    #[tokio::test]
    async fn test_run_on_local_catalog() {
        let dir = TempDir::new().unwrap();
        write_catalog(dir.path());
        let export_root = dir.path().join("exports");
        let backend = Arc::new(LocalBackend::new(dir.path().to_path_buf(), export_root.clone()));
        let mut config = pipeline_config(2020, 2021);
        config.region_id = REGION_ID.to_string();
        let pipeline = Pipeline::new(backend, config);

        let output = pipeline.run().await.unwrap();

        let ndvi_2020 = output.table.records[0].ndvi_mean.unwrap();
        assert!((ndvi_2020 - 0.42).abs() < 1e-9);
        assert_eq!(output.table.records[0].et_mean, Some(45.0));
        assert!((output.table.records[1].ndvi_mean.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(output.table.records[1].et_mean, None);
        // One complete year only.
        assert_eq!(output.analytics.correlation, None);

        assert!(export_root.join("GEE_NDVI_Exports/NDVI_2020.asc").exists());
        assert!(export_root.join("GEE_ET_Exports/ET_2020.asc").exists());
    }
}
