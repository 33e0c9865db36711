//! Remote geospatial service adapter.
//!
//! Speaks a small JSON protocol:
//!
//! - `GET  /v1/regions/{id}`      region as GeoJSON
//! - `GET  /v1/collections/{id}`  `{"id": .., "bands": [..]}`
//! - `POST /v1/reduce`            `{"value": number | null}`
//! - `POST /v1/exports`           `{"job_id": ".."}`
//!
//! `404` maps to not-found and `413` to a pixel-cap failure.

use crate::backend::local::parse_region;
use crate::backend::GeoBackend;
use crate::error::{PipelineError, Result};
use crate::models::{
    CompositeSpec, ExportRequest, JobState, JobTicket, RasterSeries, Region, ReductionRequest,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Composite description as sent to the service.
#[derive(Debug, Serialize)]
struct CompositeBody<'a> {
    dataset_id: &'a str,
    band: &'a str,
    scale_factor: f64,
    start: NaiveDate,
    /// Exclusive.
    end: NaiveDate,
    temporal_reducer: &'static str,
    region_id: &'a str,
}

impl<'a> From<&'a CompositeSpec> for CompositeBody<'a> {
    fn from(spec: &'a CompositeSpec) -> Self {
        Self {
            dataset_id: &spec.series.dataset_id,
            band: &spec.series.band,
            scale_factor: spec.series.scale_factor,
            start: spec.window.start,
            end: spec.window.end,
            temporal_reducer: "mean",
            region_id: &spec.region.id,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReduceBody<'a> {
    composite: CompositeBody<'a>,
    reducer: &'static str,
    scale: f64,
    max_pixels: f64,
}

#[derive(Debug, Deserialize)]
struct ReduceResponse {
    value: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ExportBody<'a> {
    composite: CompositeBody<'a>,
    description: &'a str,
    folder: &'a str,
    scale: f64,
    max_pixels: f64,
}

#[derive(Debug, Deserialize)]
struct ExportResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    #[allow(dead_code)] // Echo of the requested id
    id: String,
    bands: Vec<String>,
}

/// Body of a `413` response.
#[derive(Debug, Default, Deserialize)]
struct LimitResponse {
    pixels: Option<f64>,
}

/// HTTP client for a remote geospatial service.
pub struct HttpBackend {
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        info!("Using geospatial service at: {}", base_url);

        let base_url = Url::parse(base_url).map_err(|e| {
            PipelineError::Config(format!("invalid service URL {}: {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PipelineError::Config(format!(
                "service URL {} cannot take a path",
                base_url
            )));
        }

        let http_client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url,
            token,
            timeout,
            http_client,
        })
    }

    /// `{base}/v1/{segments..}`. Catalog ids contain slashes, so each part is
    /// split on `/` and every piece is percent-encoded as its own segment.
    fn url(&self, parts: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                PipelineError::Config(format!("service URL {} cannot take a path", self.base_url))
            })?
            .pop_if_empty()
            .push("v1")
            .extend(parts.iter().flat_map(|part| part.split('/')));
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let request = match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        };

        request.send().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::Backend(format!(
                    "Request timed out after {}s",
                    self.timeout.as_secs()
                ))
            } else if e.is_connect() {
                PipelineError::Backend(format!(
                    "Cannot connect to geospatial service at {}",
                    self.base_url
                ))
            } else {
                PipelineError::Http(e)
            }
        })
    }

    /// Turn non-success statuses into errors.
    async fn check(
        &self,
        response: reqwest::Response,
        on_not_found: impl FnOnce() -> PipelineError,
        on_limit: impl FnOnce(Option<f64>) -> PipelineError,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(on_not_found()),
            StatusCode::PAYLOAD_TOO_LARGE => {
                let limit: LimitResponse = serde_json::from_str(&body).unwrap_or_default();
                Err(on_limit(limit.pixels))
            }
            _ => Err(PipelineError::Backend(format!(
                "Service error {}: {}",
                status, body
            ))),
        }
    }

    fn limit_error(spec: &CompositeSpec, max_pixels: f64) -> impl FnOnce(Option<f64>) -> PipelineError {
        let variable = spec.variable();
        let year = spec.year();
        move |pixels| PipelineError::ResourceLimit {
            variable,
            year,
            pixels: pixels.unwrap_or(f64::INFINITY),
            max_pixels,
        }
    }

    fn unexpected(what: &'static str) -> impl FnOnce() -> PipelineError {
        move || PipelineError::Backend(format!("Service has no endpoint for {}", what))
    }
}

#[async_trait]
impl GeoBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn resolve_region(&self, id: &str) -> Result<Region> {
        let url = self.url(&["regions", id])?;
        debug!("GET {}", url);

        let response = self.send(self.http_client.get(url)).await?;
        let response = self
            .check(
                response,
                || PipelineError::not_found("region", id),
                |_| PipelineError::Backend("region lookup exceeded a limit".to_string()),
            )
            .await?;

        let content = response.text().await?;
        parse_region(id, &content)
    }

    async fn resolve_series(&self, series: &RasterSeries) -> Result<()> {
        let url = self.url(&["collections", series.dataset_id.as_str()])?;
        debug!("GET {}", url);

        let response = self.send(self.http_client.get(url)).await?;
        let response = self
            .check(
                response,
                || PipelineError::not_found("dataset", &series.dataset_id),
                |_| PipelineError::Backend("collection lookup exceeded a limit".to_string()),
            )
            .await?;

        let collection: CollectionResponse = response.json().await?;
        if !collection.bands.iter().any(|b| b == &series.band) {
            return Err(PipelineError::not_found(
                "band",
                format!("{}:{}", series.dataset_id, series.band),
            ));
        }
        Ok(())
    }

    async fn reduce_region(&self, request: &ReductionRequest) -> Result<Option<f64>> {
        let spec = &request.composite;
        let body = ReduceBody {
            composite: CompositeBody::from(spec),
            reducer: "mean",
            scale: request.scale,
            max_pixels: request.max_pixels,
        };

        let response = self
            .send(self.http_client.post(self.url(&["reduce"])?).json(&body))
            .await?;
        let response = self
            .check(
                response,
                Self::unexpected("reduce"),
                Self::limit_error(spec, request.max_pixels),
            )
            .await?;

        let reduced: ReduceResponse = response.json().await?;
        Ok(reduced.value.filter(|v| v.is_finite()))
    }

    async fn submit_export(&self, request: &ExportRequest) -> Result<JobTicket> {
        let spec = &request.composite;
        let body = ExportBody {
            composite: CompositeBody::from(spec),
            description: &request.name,
            folder: &request.folder,
            scale: request.scale,
            max_pixels: request.max_pixels,
        };

        let response = self
            .send(self.http_client.post(self.url(&["exports"])?).json(&body))
            .await?;
        let response = self
            .check(
                response,
                Self::unexpected("exports"),
                Self::limit_error(spec, request.max_pixels),
            )
            .await?;

        let accepted: ExportResponse = response.json().await?;
        Ok(JobTicket {
            job_id: accepted.job_id,
            name: request.name.clone(),
            folder: request.folder.clone(),
            variable: spec.variable(),
            year: spec.year(),
            submitted_at: Utc::now(),
            state: JobState::Submitted,
        })
    }
}
