//! Gridded raster operations used by the local backend.
//!
//! Grids are north-up: `(origin_x, origin_y)` is the top-left corner,
//! columns grow east and rows grow south. Values are row-major and a
//! `None` pixel carries no observation.
//!
//! Region geometries are read in the grid's [`Crs`]. Sampling scales are
//! always meters; on geographic grids they are converted to degrees at the
//! region's mid latitude and samples are weighted by `cos(latitude)`.

use chrono::NaiveDate;
use geo::{BoundingRect, Contains, MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Nodata marker written to ASCII grid exports.
pub const NODATA: f64 = -9999.0;

/// Mean length of one degree of latitude, in meters.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Coordinate reference system of a grid and of regions drawn over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Crs {
    /// Planar coordinates in meters.
    Projected,
    /// Longitude/latitude in degrees, as in RFC 7946 GeoJSON.
    #[default]
    Geographic,
}

/// Placement and size of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    #[serde(default)]
    pub crs: Crs,
    pub origin_x: f64,
    pub origin_y: f64,
    /// Cell edge length in CRS units.
    pub cell_size: f64,
    pub width: usize,
    pub height: usize,
}

impl GridSpec {
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    /// Index of the cell containing `(x, y)`, if inside the grid.
    pub fn index_at(&self, x: f64, y: f64) -> Option<usize> {
        let col = ((x - self.origin_x) / self.cell_size).floor();
        let row = ((self.origin_y - y) / self.cell_size).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        if col >= self.width || row >= self.height {
            return None;
        }
        Some(row * self.width + col)
    }

    /// Center coordinates of a cell.
    pub fn center(&self, index: usize) -> (f64, f64) {
        let row = index / self.width;
        let col = index % self.width;
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y - (row as f64 + 0.5) * self.cell_size,
        )
    }
}

/// One band of one timestamped layer, already rescaled.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub date: NaiveDate,
    pub grid: GridSpec,
    pub values: Vec<Option<f64>>,
}

/// A single raster derived from several layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub grid: GridSpec,
    pub values: Vec<Option<f64>>,
}

/// Why a region could not be sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingError {
    /// More sample pixels than the cap allows.
    PixelCap { pixels: f64 },
    /// No sample center falls inside the region at this scale.
    BelowResolution { scale: f64 },
}

/// Raised when layers of one series do not share a grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridMismatch {
    pub date: NaiveDate,
}

impl Composite {
    pub fn value_at(&self, x: f64, y: f64) -> Option<f64> {
        self.grid.index_at(x, y).and_then(|i| self.values[i])
    }

    /// Null every pixel whose center falls outside the region.
    pub fn clip(mut self, region: &MultiPolygon<f64>) -> Self {
        for (i, value) in self.values.iter_mut().enumerate() {
            let (x, y) = self.grid.center(i);
            if !region.contains(&Point::new(x, y)) {
                *value = None;
            }
        }
        self
    }
}

/// Per-pixel mean over the given layers, skipping missing observations.
///
/// Returns `Ok(None)` when there are no layers at all.
pub fn temporal_mean(layers: &[&Layer]) -> Result<Option<Composite>, GridMismatch> {
    let Some(first) = layers.first() else {
        return Ok(None);
    };
    let grid = first.grid;

    let mut sums = vec![0.0; grid.len()];
    let mut counts = vec![0u32; grid.len()];

    for layer in layers {
        if layer.grid != grid || layer.values.len() != grid.len() {
            return Err(GridMismatch { date: layer.date });
        }
        for (i, value) in layer.values.iter().enumerate() {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                sums[i] += v;
                counts[i] += 1;
            }
        }
    }

    let values = sums
        .into_iter()
        .zip(counts)
        .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
        .collect();

    Ok(Some(Composite { grid, values }))
}

/// Regular grid of `scale`-meter pixels covering a region's bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingGrid {
    pub crs: Crs,
    pub min_x: f64,
    pub max_y: f64,
    /// Pixel size in CRS units.
    pub step_x: f64,
    pub step_y: f64,
    pub cols: usize,
    pub rows: usize,
}

impl SamplingGrid {
    /// `None` for an empty geometry.
    pub fn covering(region: &MultiPolygon<f64>, scale: f64, crs: Crs) -> Option<Self> {
        let rect = region.bounding_rect()?;
        let (step_x, step_y) = match crs {
            Crs::Projected => (scale, scale),
            Crs::Geographic => {
                let mid_lat = (rect.min().y + rect.max().y) / 2.0;
                let shrink = mid_lat.to_radians().cos().max(1e-6);
                (
                    scale / (METERS_PER_DEGREE * shrink),
                    scale / METERS_PER_DEGREE,
                )
            }
        };

        let cols = ((rect.max().x - rect.min().x) / step_x).ceil().max(1.0);
        let rows = ((rect.max().y - rect.min().y) / step_y).ceil().max(1.0);
        Some(Self {
            crs,
            min_x: rect.min().x,
            max_y: rect.max().y,
            step_x,
            step_y,
            cols: cols as usize,
            rows: rows as usize,
        })
    }

    pub fn pixel_count(&self) -> f64 {
        self.cols as f64 * self.rows as f64
    }

    pub fn center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.min_x + (col as f64 + 0.5) * self.step_x,
            self.max_y - (row as f64 + 0.5) * self.step_y,
        )
    }

    /// Relative ground area of a sample pixel centered at `y`.
    fn weight(&self, y: f64) -> f64 {
        match self.crs {
            Crs::Projected => 1.0,
            Crs::Geographic => y.to_radians().cos().max(0.0),
        }
    }

    fn check_cap(&self, max_pixels: f64) -> Result<(), SamplingError> {
        let pixels = self.pixel_count();
        if pixels > max_pixels {
            return Err(SamplingError::PixelCap { pixels });
        }
        Ok(())
    }

    /// Sample centers inside the region, row-major.
    fn inside<'a>(
        &'a self,
        region: &'a MultiPolygon<f64>,
    ) -> impl Iterator<Item = (usize, usize, f64, f64)> + 'a {
        (0..self.rows).flat_map(move |row| {
            (0..self.cols).filter_map(move |col| {
                let (x, y) = self.center(row, col);
                region
                    .contains(&Point::new(x, y))
                    .then_some((row, col, x, y))
            })
        })
    }
}

/// Area-weighted mean of a composite over a region, sampled at `scale`
/// meters.
///
/// `Ok(None)` means the region holds no valid pixel. A region too small to
/// contain a single sample center is an error, never a silent `None`.
pub fn reduce_mean(
    composite: &Composite,
    region: &MultiPolygon<f64>,
    scale: f64,
    max_pixels: f64,
) -> Result<Option<f64>, SamplingError> {
    let Some(sampling) = SamplingGrid::covering(region, scale, composite.grid.crs) else {
        return Ok(None);
    };
    sampling.check_cap(max_pixels)?;

    let mut samples = 0usize;
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for (_, _, x, y) in sampling.inside(region) {
        samples += 1;
        if let Some(v) = composite.value_at(x, y) {
            let weight = sampling.weight(y);
            weighted_sum += v * weight;
            total_weight += weight;
        }
    }

    if samples == 0 {
        return Err(SamplingError::BelowResolution { scale });
    }

    Ok((total_weight > 0.0).then(|| weighted_sum / total_weight))
}

/// Resample a composite onto the region's sampling grid and render it as
/// an ESRI ASCII grid.
pub fn render_ascii_grid(
    composite: &Composite,
    region: &MultiPolygon<f64>,
    scale: f64,
    max_pixels: f64,
) -> Result<Option<String>, SamplingError> {
    let Some(sampling) = SamplingGrid::covering(region, scale, composite.grid.crs) else {
        return Ok(None);
    };
    sampling.check_cap(max_pixels)?;

    let mut cells = vec![NODATA; sampling.rows * sampling.cols];
    let mut samples = 0usize;
    for (row, col, x, y) in sampling.inside(region) {
        samples += 1;
        if let Some(v) = composite.value_at(x, y) {
            cells[row * sampling.cols + col] = v;
        }
    }
    if samples == 0 {
        return Err(SamplingError::BelowResolution { scale });
    }

    let mut out = String::new();
    let _ = writeln!(out, "ncols {}", sampling.cols);
    let _ = writeln!(out, "nrows {}", sampling.rows);
    let _ = writeln!(out, "xllcorner {}", sampling.min_x);
    let _ = writeln!(
        out,
        "yllcorner {}",
        sampling.max_y - sampling.rows as f64 * sampling.step_y
    );
    if sampling.step_x == sampling.step_y {
        let _ = writeln!(out, "cellsize {}", sampling.step_x);
    } else {
        let _ = writeln!(out, "dx {}", sampling.step_x);
        let _ = writeln!(out, "dy {}", sampling.step_y);
    }
    let _ = writeln!(out, "NODATA_value {}", NODATA);

    for row in cells.chunks(sampling.cols) {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }

    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn grid(width: usize, height: usize) -> GridSpec {
        GridSpec {
            crs: Crs::Projected,
            origin_x: 0.0,
            origin_y: 4000.0,
            cell_size: 1000.0,
            width,
            height,
        }
    }

    fn square(min: f64, max: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
            (x: min, y: min),
        ]])
    }

    fn layer(day: u32, values: Vec<Option<f64>>) -> Layer {
        Layer {
            date: NaiveDate::from_ymd_opt(2020, 1, day).unwrap(),
            grid: grid(2, 2),
            values,
        }
    }

    #[test]
    fn test_index_at() {
        let g = grid(4, 4);
        assert_eq!(g.index_at(500.0, 3500.0), Some(0));
        assert_eq!(g.index_at(1500.0, 3500.0), Some(1));
        assert_eq!(g.index_at(500.0, 2500.0), Some(4));
        assert_eq!(g.index_at(-1.0, 3500.0), None);
        assert_eq!(g.index_at(500.0, 4001.0), None);
        assert_eq!(g.index_at(4500.0, 3500.0), None);
    }

    #[test]
    fn test_temporal_mean_skips_missing() {
        let a = layer(1, vec![Some(1.0), None, Some(3.0), None]);
        let b = layer(17, vec![Some(3.0), None, None, Some(f64::NAN)]);
        let composite = temporal_mean(&[&a, &b]).unwrap().unwrap();
        assert_eq!(composite.values, vec![Some(2.0), None, Some(3.0), None]);
    }

    #[test]
    fn test_temporal_mean_without_layers() {
        assert_eq!(temporal_mean(&[]).unwrap(), None);
    }

    #[test]
    fn test_temporal_mean_rejects_grid_mismatch() {
        let a = layer(1, vec![Some(1.0); 4]);
        let mut b = layer(2, vec![Some(1.0); 4]);
        b.grid.cell_size = 500.0;
        assert!(temporal_mean(&[&a, &b]).is_err());
    }

    #[test]
    fn test_clip_nulls_outside() {
        let composite = Composite {
            grid: grid(4, 4),
            values: vec![Some(1.0); 16],
        };
        let clipped = composite.clip(&square(0.0, 2000.0));
        assert_eq!(clipped.values.iter().filter(|v| v.is_some()).count(), 4);
    }

    #[test]
    fn test_reduce_mean_over_region() {
        // Bottom-left 2x2 block holds 2, 4, 6, 8; the rest is 100.
        let mut values = vec![Some(100.0); 16];
        values[8] = Some(2.0);
        values[9] = Some(4.0);
        values[12] = Some(6.0);
        values[13] = Some(8.0);
        let composite = Composite {
            grid: grid(4, 4),
            values,
        };

        let mean = reduce_mean(&composite, &square(0.0, 2000.0), 1000.0, 1e9).unwrap();
        assert_eq!(mean, Some(5.0));

        // Finer sampling keeps the same area-weighted answer.
        let fine = reduce_mean(&composite, &square(0.0, 2000.0), 500.0, 1e9).unwrap();
        assert_eq!(fine, Some(5.0));
    }

    #[test]
    fn test_reduce_mean_all_missing_is_none() {
        let composite = Composite {
            grid: grid(4, 4),
            values: vec![None; 16],
        };
        let mean = reduce_mean(&composite, &square(0.0, 2000.0), 1000.0, 1e9).unwrap();
        assert_eq!(mean, None);
    }

    #[test]
    fn test_reduce_mean_pixel_cap() {
        let composite = Composite {
            grid: grid(4, 4),
            values: vec![Some(1.0); 16],
        };
        let err = reduce_mean(&composite, &square(0.0, 4000.0), 1000.0, 15.0).unwrap_err();
        assert_eq!(err, SamplingError::PixelCap { pixels: 16.0 });
    }

    /// 4x4 grid of 0.5 degree cells over lon/lat [0, 2]^2, values 0..15.
    fn lon_lat_composite() -> Composite {
        Composite {
            grid: GridSpec {
                crs: Crs::Geographic,
                origin_x: 0.0,
                origin_y: 2.0,
                cell_size: 0.5,
                width: 4,
                height: 4,
            },
            values: (0..16).map(|i| Some(i as f64)).collect(),
        }
    }

    #[test]
    fn test_reduce_mean_on_lon_lat_grid() {
        let composite = lon_lat_composite();
        let mean = reduce_mean(&composite, &square(0.0, 2.0), 1000.0, 1e9)
            .unwrap()
            .unwrap();
        // Southern rows hold larger values and slightly more ground area.
        assert!((mean - 7.5).abs() < 0.05, "mean = {}", mean);
        assert!(mean > 7.5);
    }

    #[test]
    fn test_geographic_sampling_converts_meters() {
        let sampling = SamplingGrid::covering(&square(0.0, 2.0), 1000.0, Crs::Geographic).unwrap();
        assert!((sampling.step_y - 1000.0 / METERS_PER_DEGREE).abs() < 1e-12);
        assert!(sampling.step_x > sampling.step_y);
        assert_eq!(sampling.rows, 223);
    }

    #[test]
    fn test_region_below_sampling_resolution() {
        let composite = Composite {
            grid: grid(4, 4),
            values: vec![Some(1.0); 16],
        };
        // A 10 m triangle sampled at 1000 m: the only sample center misses it.
        let sliver = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ]]);
        let err = reduce_mean(&composite, &sliver, 1000.0, 1e9).unwrap_err();
        assert_eq!(err, SamplingError::BelowResolution { scale: 1000.0 });
        assert!(render_ascii_grid(&composite, &sliver, 1000.0, 1e13).is_err());
    }

    #[test]
    fn test_grid_crs_defaults_to_geographic() {
        let grid: GridSpec = serde_json::from_str(
            r#"{"origin_x": 0.0, "origin_y": 2.0, "cell_size": 0.5, "width": 4, "height": 4}"#,
        )
        .unwrap();
        assert_eq!(grid.crs, Crs::Geographic);
    }

    #[test]
    fn test_render_ascii_grid() {
        let composite = Composite {
            grid: grid(4, 4),
            values: (0..16).map(|i| Some(i as f64)).collect(),
        };
        let text = render_ascii_grid(&composite, &square(0.0, 2000.0), 1000.0, 1e13)
            .unwrap()
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ncols 2");
        assert_eq!(lines[1], "nrows 2");
        assert_eq!(lines[2], "xllcorner 0");
        assert_eq!(lines[3], "yllcorner 0");
        assert_eq!(lines[6], "8 9");
        assert_eq!(lines[7], "12 13");
    }
}
