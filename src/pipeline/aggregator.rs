//! Yearly aggregation: one composite per (year, variable), reduced to its
//! spatial mean over the region.

use super::loader::LoadedSeries;
use crate::backend::GeoBackend;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{
    CompositeSpec, FailureStage, Region, ReductionRequest, Variable, YearFailure, YearRange,
    YearWindow, YearlyRecord,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of aggregating one year.
#[derive(Debug, Clone, PartialEq)]
pub struct YearOutcome {
    pub record: YearlyRecord,
    pub failures: Vec<YearFailure>,
}

/// Describe the composite of `variable` for one year window.
pub fn composite_for(
    series: &LoadedSeries,
    variable: Variable,
    window: YearWindow,
    region: &Arc<Region>,
) -> CompositeSpec {
    CompositeSpec {
        series: Arc::clone(series.get(variable)),
        window,
        region: Arc::clone(region),
    }
}

/// Reduction request for a composite at the variable's configured scale.
pub fn reduction_request(config: &PipelineConfig, composite: CompositeSpec) -> ReductionRequest {
    ReductionRequest {
        scale: config.reduction_scale(composite.variable()),
        max_pixels: config.reduce_max_pixels,
        composite,
    }
}

async fn aggregate_year(
    backend: &dyn GeoBackend,
    config: &PipelineConfig,
    series: &LoadedSeries,
    region: &Arc<Region>,
    window: YearWindow,
) -> Result<YearOutcome> {
    let mut outcome = YearOutcome {
        record: YearlyRecord::empty(window.year),
        failures: Vec::new(),
    };

    for variable in Variable::ALL {
        let request = reduction_request(config, composite_for(series, variable, window, region));

        match backend.reduce_region(&request).await {
            Ok(value) => {
                debug!("{} {}: {:?}", variable, window.year, value);
                outcome.record.set(variable, value);
            }
            Err(e) if e.is_per_year() => {
                warn!("{} {} reduction failed: {}", variable, window.year, e);
                outcome.failures.push(YearFailure {
                    year: window.year,
                    variable,
                    stage: FailureStage::Reduction,
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(outcome)
}

/// Aggregate every year in `years`, keeping year order.
///
/// Up to `config.concurrency` years are reduced at once. A resource limit
/// leaves a null for that (year, variable); any other error aborts.
pub async fn aggregate_years(
    backend: &dyn GeoBackend,
    config: &PipelineConfig,
    series: &LoadedSeries,
    region: &Arc<Region>,
    years: YearRange,
    show_progress: bool,
) -> Result<Vec<YearOutcome>> {
    let pb = if show_progress {
        let pb = ProgressBar::new(years.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} years")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    } else {
        None
    };

    let outcomes = stream::iter(years.windows())
        .map(|window| {
            let pb = pb.clone();
            async move {
                let outcome = aggregate_year(backend, config, series, region, window).await;
                if let Some(pb) = pb {
                    pb.inc(1);
                }
                outcome
            }
        })
        .buffered(config.concurrency.max(1))
        .try_collect::<Vec<_>>()
        .await;

    if let Some(pb) = pb {
        match outcomes {
            Ok(_) => pb.finish_with_message("Aggregation complete"),
            Err(_) => pb.abandon(),
        }
    }

    outcomes
}
