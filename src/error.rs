//! Error types for the trend pipeline.

use crate::models::Variable;
use thiserror::Error;

/// Errors produced while resolving inputs or materializing results.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid year range: end year {end} is before start year {start}")]
    InvalidRange { start: i32, end: i32 },

    #[error("{variable} {year}: {pixels} pixels exceeds the cap of {max_pixels}")]
    ResourceLimit {
        variable: Variable,
        year: i32,
        pixels: f64,
        max_pixels: f64,
    },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this failure is scoped to one (year, variable) and the run may continue.
    pub fn is_per_year(&self) -> bool {
        matches!(self, Self::ResourceLimit { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
