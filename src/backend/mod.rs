//! Geospatial compute backends.
//!
//! The pipeline only builds descriptions (regions, series, composites,
//! reduction and export requests). A [`GeoBackend`] resolves catalog
//! entries and is the single place where anything is materialized.

pub mod http;
pub mod local;
pub mod raster;

use crate::cli::BackendKind;
use crate::config::BackendConfig;
use crate::error::Result;
use crate::models::{ExportRequest, JobTicket, RasterSeries, Region, ReductionRequest};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use http::HttpBackend;
pub use local::LocalBackend;

/// Capabilities a geospatial backend must provide.
#[async_trait]
pub trait GeoBackend: Send + Sync {
    /// Short name used in logs and report metadata.
    fn name(&self) -> &str;

    /// Resolve a region geometry by catalog identifier.
    async fn resolve_region(&self, id: &str) -> Result<Region>;

    /// Check that the series' dataset and band exist and prepare it for use.
    async fn resolve_series(&self, series: &RasterSeries) -> Result<()>;

    /// Materialize the area-weighted mean of a composite.
    ///
    /// `Ok(None)` means the composite has no valid pixels in the region.
    async fn reduce_region(&self, request: &ReductionRequest) -> Result<Option<f64>>;

    /// Submit an export. Returns as soon as the backend accepts it.
    async fn submit_export(&self, request: &ExportRequest) -> Result<JobTicket>;
}

/// Build the backend selected by configuration.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn GeoBackend>> {
    match config.kind {
        BackendKind::Local => Ok(Arc::new(LocalBackend::new(
            PathBuf::from(&config.catalog_dir),
            PathBuf::from(&config.export_root),
        ))),
        BackendKind::Http => Ok(Arc::new(HttpBackend::new(
            &config.url,
            config.token.clone(),
            Duration::from_secs(config.timeout_seconds),
        )?)),
    }
}
