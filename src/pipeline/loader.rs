//! Dataset loading: build the two raster series and check them against the
//! backend catalog.

use crate::backend::GeoBackend;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{RasterSeries, Variable, YearRange};
use std::sync::Arc;
use tracing::info;

/// The vegetation and evapotranspiration series for a run.
#[derive(Debug, Clone)]
pub struct LoadedSeries {
    pub vegetation: Arc<RasterSeries>,
    pub et: Arc<RasterSeries>,
}

impl LoadedSeries {
    pub fn get(&self, variable: Variable) -> &Arc<RasterSeries> {
        match variable {
            Variable::Ndvi => &self.vegetation,
            Variable::Et => &self.et,
        }
    }
}

/// Describe both series for `years` without contacting the backend.
pub fn describe_datasets(config: &PipelineConfig, years: YearRange) -> LoadedSeries {
    let range = years.date_range();
    LoadedSeries {
        vegetation: Arc::new(RasterSeries {
            variable: Variable::Ndvi,
            dataset_id: config.vegetation_dataset_id.clone(),
            band: config.vegetation_band.clone(),
            scale_factor: config.vegetation_scale_factor,
            range,
        }),
        et: Arc::new(RasterSeries {
            variable: Variable::Et,
            dataset_id: config.et_dataset_id.clone(),
            band: config.et_band.clone(),
            scale_factor: 1.0,
            range,
        }),
    }
}

/// Describe both series and resolve them against the backend.
pub async fn load_datasets(
    backend: &dyn GeoBackend,
    config: &PipelineConfig,
    years: YearRange,
) -> Result<LoadedSeries> {
    let loaded = describe_datasets(config, years);

    for variable in Variable::ALL {
        let series = loaded.get(variable);
        backend.resolve_series(series).await?;
        info!(
            "Loaded {} series {} (band {}, scale {}) for {} to {}",
            variable,
            series.dataset_id,
            series.band,
            series.scale_factor,
            series.range.start,
            series.range.end
        );
    }

    Ok(loaded)
}
