//! In-process backend over a directory catalog.
//!
//! Catalog layout:
//!
//! ```text
//! <catalog>/<region id>.geojson          FeatureCollection of polygons
//! <catalog>/<dataset id>/<layer>.json    one timestamped layer per file
//! ```
//!
//! A layer file looks like
//! `{"date": "2020-01-17", "grid": {...}, "bands": {"NDVI": [..]}}`.

use crate::backend::raster::{self, Composite, GridSpec, Layer, SamplingError};
use crate::backend::GeoBackend;
use crate::error::{PipelineError, Result};
use crate::models::{
    CompositeSpec, ExportRequest, JobState, JobTicket, RasterSeries, Region, RegionStyle,
    ReductionRequest,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use geo::{MultiPolygon, Polygon};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// On-disk layer file.
#[derive(Debug, Deserialize)]
struct LayerFile {
    date: NaiveDate,
    grid: GridSpec,
    bands: HashMap<String, Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    dataset_id: String,
    band: String,
    scale_bits: u64,
    start: NaiveDate,
    end: NaiveDate,
}

impl From<&RasterSeries> for SeriesKey {
    fn from(series: &RasterSeries) -> Self {
        Self {
            dataset_id: series.dataset_id.clone(),
            band: series.band.clone(),
            scale_bits: series.scale_factor.to_bits(),
            start: series.range.start,
            end: series.range.end,
        }
    }
}

/// Local raster-processing backend.
pub struct LocalBackend {
    catalog_dir: PathBuf,
    export_root: PathBuf,
    series: Mutex<HashMap<SeriesKey, Arc<Vec<Layer>>>>,
    next_job: AtomicU64,
}

impl LocalBackend {
    pub fn new(catalog_dir: PathBuf, export_root: PathBuf) -> Self {
        info!("Using local catalog at: {}", catalog_dir.display());
        Self {
            catalog_dir,
            export_root,
            series: Mutex::new(HashMap::new()),
            next_job: AtomicU64::new(1),
        }
    }

    /// Map a catalog id to a path under the catalog root.
    fn catalog_path(&self, id: &str, kind: &'static str) -> Result<PathBuf> {
        let relative = Path::new(id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if id.is_empty() || escapes {
            return Err(PipelineError::not_found(kind, id));
        }
        Ok(self.catalog_dir.join(relative))
    }

    /// Read every layer of a series, selecting its band and applying its scale.
    fn load_series(&self, series: &RasterSeries) -> Result<Vec<Layer>> {
        let dir = self.catalog_path(&series.dataset_id, "dataset")?;
        if !dir.is_dir() {
            return Err(PipelineError::not_found("dataset", &series.dataset_id));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut band_seen = false;
        let mut layers = Vec::new();

        for path in files {
            let content = std::fs::read_to_string(&path)?;
            let mut file: LayerFile = serde_json::from_str(&content).map_err(|e| {
                PipelineError::Backend(format!("invalid layer {}: {}", path.display(), e))
            })?;

            let Some(values) = file.bands.remove(&series.band) else {
                debug!("{} has no band {}", path.display(), series.band);
                continue;
            };
            band_seen = true;

            if !series.range.contains(file.date) {
                continue;
            }
            if values.len() != file.grid.len() {
                return Err(PipelineError::Backend(format!(
                    "layer {} has {} values for a {}x{} grid",
                    path.display(),
                    values.len(),
                    file.grid.width,
                    file.grid.height
                )));
            }

            layers.push(Layer {
                date: file.date,
                grid: file.grid,
                values: values
                    .into_iter()
                    .map(|v| v.map(|raw| series.normalize(raw)))
                    .collect(),
            });
        }

        if !band_seen {
            return Err(PipelineError::not_found(
                "band",
                format!("{}:{}", series.dataset_id, series.band),
            ));
        }

        layers.sort_by_key(|layer| layer.date);
        debug!(
            "Loaded {} layers of {} ({})",
            layers.len(),
            series.dataset_id,
            series.band
        );
        Ok(layers)
    }

    fn cached_layers(&self, series: &RasterSeries) -> Result<Arc<Vec<Layer>>> {
        let key = SeriesKey::from(series);
        if let Some(layers) = self.lock_series().get(&key) {
            return Ok(Arc::clone(layers));
        }

        let layers = Arc::new(self.load_series(series)?);
        self.lock_series().insert(key, Arc::clone(&layers));
        Ok(layers)
    }

    fn lock_series(&self) -> std::sync::MutexGuard<'_, HashMap<SeriesKey, Arc<Vec<Layer>>>> {
        self.series.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Temporal mean of the window's layers, clipped to the region.
    fn composite(&self, spec: &CompositeSpec) -> Result<Option<Composite>> {
        let layers = self.cached_layers(&spec.series)?;
        let in_window: Vec<&Layer> = layers
            .iter()
            .filter(|layer| spec.window.contains(layer.date))
            .collect();

        let composite = raster::temporal_mean(&in_window).map_err(|e| {
            PipelineError::Backend(format!(
                "{} layer of {} does not share the series grid",
                e.date, spec.series.dataset_id
            ))
        })?;

        Ok(composite.map(|c| c.clip(&spec.region.geometry)))
    }

    fn sampling_error(spec: &CompositeSpec, err: SamplingError, max: f64) -> PipelineError {
        match err {
            SamplingError::PixelCap { pixels } => PipelineError::ResourceLimit {
                variable: spec.variable(),
                year: spec.year(),
                pixels,
                max_pixels: max,
            },
            SamplingError::BelowResolution { scale } => PipelineError::Config(format!(
                "region {} contains no {} m sample; use a finer {} scale",
                spec.region.id,
                scale,
                spec.variable()
            )),
        }
    }
}

/// Collect polygons from a GeoJSON document.
pub(crate) fn parse_region(id: &str, content: &str) -> Result<Region> {
    let geojson: geojson::GeoJson = content
        .parse()
        .map_err(|e| PipelineError::Backend(format!("invalid region {}: {}", id, e)))?;

    let mut style = RegionStyle::default();
    let geometries: Vec<geojson::Geometry> = match geojson {
        geojson::GeoJson::FeatureCollection(fc) => {
            if let Some(color) = fc
                .features
                .first()
                .and_then(|f| f.property("color"))
                .and_then(|c| c.as_str())
            {
                style.color = color.to_string();
            }
            fc.features.into_iter().filter_map(|f| f.geometry).collect()
        }
        geojson::GeoJson::Feature(feature) => feature.geometry.into_iter().collect(),
        geojson::GeoJson::Geometry(geometry) => vec![geometry],
    };

    let mut polygons: Vec<Polygon<f64>> = Vec::new();
    for geometry in geometries {
        let geometry = geo::Geometry::<f64>::try_from(geometry)
            .map_err(|e| PipelineError::Backend(format!("invalid region {}: {}", id, e)))?;
        collect_polygons(geometry, &mut polygons);
    }

    if polygons.is_empty() {
        return Err(PipelineError::Backend(format!(
            "region {} has no polygon geometry",
            id
        )));
    }

    Ok(Region {
        id: id.to_string(),
        geometry: MultiPolygon::new(polygons),
        style,
    })
}

fn collect_polygons(geometry: geo::Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        geo::Geometry::Polygon(p) => out.push(p),
        geo::Geometry::MultiPolygon(mp) => out.extend(mp.0),
        geo::Geometry::GeometryCollection(gc) => {
            for g in gc.0 {
                collect_polygons(g, out);
            }
        }
        other => warn!("Ignoring non-polygon region geometry: {:?}", other),
    }
}

#[async_trait]
impl GeoBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn resolve_region(&self, id: &str) -> Result<Region> {
        let base = self.catalog_path(id, "region")?;
        let path = base.with_file_name(format!(
            "{}.geojson",
            base.file_name().and_then(|n| n.to_str()).unwrap_or_default()
        ));

        if !path.is_file() {
            return Err(PipelineError::not_found("region", id));
        }

        let content = std::fs::read_to_string(&path)?;
        let region = parse_region(id, &content)?;
        info!(
            "Resolved region {} ({} polygons)",
            id,
            region.geometry.0.len()
        );
        Ok(region)
    }

    async fn resolve_series(&self, series: &RasterSeries) -> Result<()> {
        self.cached_layers(series).map(|_| ())
    }

    async fn reduce_region(&self, request: &ReductionRequest) -> Result<Option<f64>> {
        let spec = &request.composite;
        let Some(composite) = self.composite(spec)? else {
            return Ok(None);
        };

        raster::reduce_mean(
            &composite,
            &spec.region.geometry,
            request.scale,
            request.max_pixels,
        )
        .map_err(|e| Self::sampling_error(spec, e, request.max_pixels))
    }

    async fn submit_export(&self, request: &ExportRequest) -> Result<JobTicket> {
        let spec = &request.composite;
        let composite = match self.composite(spec)? {
            Some(composite) => composite,
            None => Composite {
                grid: GridSpec {
                    crs: self
                        .cached_layers(&spec.series)?
                        .first()
                        .map(|layer| layer.grid.crs)
                        .unwrap_or_default(),
                    origin_x: 0.0,
                    origin_y: 0.0,
                    cell_size: request.scale,
                    width: 0,
                    height: 0,
                },
                values: Vec::new(),
            },
        };

        let text = raster::render_ascii_grid(
            &composite,
            &spec.region.geometry,
            request.scale,
            request.max_pixels,
        )
        .map_err(|e| Self::sampling_error(spec, e, request.max_pixels))?
        .ok_or_else(|| PipelineError::Backend(format!("region {} is empty", spec.region.id)))?;

        let folder = self.export_root.join(&request.folder);
        std::fs::create_dir_all(&folder)?;
        let path = folder.join(format!("{}.asc", request.name));
        std::fs::write(&path, text)?;
        debug!("Wrote {}", path.display());

        let sequence = self.next_job.fetch_add(1, Ordering::Relaxed);
        Ok(JobTicket {
            job_id: format!("local-{:04}-{}", sequence, request.name),
            name: request.name.clone(),
            folder: request.folder.clone(),
            variable: spec.variable(),
            year: spec.year(),
            submitted_at: Utc::now(),
            state: JobState::Submitted,
        })
    }
}
