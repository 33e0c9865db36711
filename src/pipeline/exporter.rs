//! Export submission for every yearly composite.

use super::aggregator::composite_for;
use super::loader::LoadedSeries;
use crate::backend::GeoBackend;
use crate::config::PipelineConfig;
use crate::models::{
    ExportRequest, FailureStage, JobTicket, Region, Variable, YearFailure, YearRange,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

/// Tickets for accepted submissions and the ones that failed.
#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    pub tickets: Vec<JobTicket>,
    pub failures: Vec<YearFailure>,
}

/// One export request per (year, variable), year-major.
pub fn plan_exports(
    config: &PipelineConfig,
    series: &LoadedSeries,
    region: &Arc<Region>,
    years: YearRange,
) -> Vec<ExportRequest> {
    years
        .windows()
        .flat_map(|window| {
            Variable::ALL.into_iter().map(move |variable| ExportRequest {
                composite: composite_for(series, variable, window, region),
                name: ExportRequest::export_name(variable, window.year),
                folder: config.export_folder(variable).to_string(),
                scale: config.reduction_scale(variable),
                max_pixels: config.export_max_pixels,
            })
        })
        .collect()
}

/// Submit every request. A failed submission is recorded and does not
/// prevent the others.
pub async fn submit_exports(
    backend: &dyn GeoBackend,
    config: &PipelineConfig,
    requests: Vec<ExportRequest>,
) -> ExportOutcome {
    let results = stream::iter(requests)
        .map(|request| async move {
            let result = backend.submit_export(&request).await;
            (request, result)
        })
        .buffer_unordered(config.concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    let mut outcome = ExportOutcome::default();
    for (request, result) in results {
        match result {
            Ok(ticket) => {
                info!("Submitted export {} -> {}", ticket.name, ticket.job_id);
                outcome.tickets.push(ticket);
            }
            Err(e) => {
                warn!("Export {} failed: {}", request.name, e);
                outcome.failures.push(YearFailure {
                    year: request.composite.year(),
                    variable: request.composite.variable(),
                    stage: FailureStage::Export,
                    message: e.to_string(),
                });
            }
        }
    }

    outcome.tickets.sort_by(|a, b| (a.year, a.variable).cmp(&(b.year, b.variable)));
    outcome
        .failures
        .sort_by(|a, b| (a.year, a.variable).cmp(&(b.year, b.variable)));
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::loader::describe_datasets;
    use crate::pipeline::tests::{pipeline_config, test_region, FakeBackend};

    #[test]
    fn test_plan_exports() {
        let config = pipeline_config(2020, 2021);
        let years = YearRange::new(2020, 2021).unwrap();
        let series = describe_datasets(&config, years);
        let requests = plan_exports(&config, &series, &test_region(), years);

        let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["NDVI_2020", "ET_2020", "NDVI_2021", "ET_2021"]);
        assert_eq!(requests[0].folder, "GEE_NDVI_Exports");
        assert_eq!(requests[1].folder, "GEE_ET_Exports");
        assert_eq!(requests[0].scale, 1000.0);
        assert_eq!(requests[1].scale, 500.0);
        assert_eq!(requests[0].max_pixels, 1e13);
    }

    #[tokio::test]
    async fn test_submit_exports_continues_after_failure() {
        let backend = FakeBackend::scenario().with_export_failure("ET_2021");
        let mut config = pipeline_config(2020, 2022);
        config.concurrency = 4;
        let years = YearRange::new(2020, 2022).unwrap();
        let series = describe_datasets(&config, years);
        let requests = plan_exports(&config, &series, &test_region(), years);

        let outcome = submit_exports(&backend, &config, requests).await;

        assert_eq!(outcome.tickets.len(), 5);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].year, 2021);
        assert_eq!(outcome.failures[0].variable, Variable::Et);
        assert_eq!(outcome.failures[0].stage, FailureStage::Export);

        let names: Vec<&str> = outcome.tickets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["NDVI_2020", "ET_2020", "NDVI_2021", "NDVI_2022", "ET_2022"]
        );
    }
}
