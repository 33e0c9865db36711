//! Region selection.

use crate::backend::GeoBackend;
use crate::error::{PipelineError, Result};
use crate::models::Region;
use geo::{Area, BoundingRect};
use std::sync::Arc;
use tracing::{debug, info};

/// Resolve the region of interest once for the whole run.
pub async fn select_region(backend: &dyn GeoBackend, region_id: &str) -> Result<Arc<Region>> {
    let id = region_id.trim();
    if id.is_empty() {
        return Err(PipelineError::not_found("region", region_id));
    }

    let region = backend.resolve_region(id).await?;

    info!(
        "Region {}: {} polygon(s), style color {}",
        region.id,
        region.geometry.0.len(),
        region.style.color
    );
    if let Some(bounds) = region.geometry.bounding_rect() {
        debug!(
            "Region bounds ({:.1}, {:.1}) - ({:.1}, {:.1}), area {:.1}",
            bounds.min().x,
            bounds.min().y,
            bounds.max().x,
            bounds.max().y,
            region.geometry.unsigned_area()
        );
    }

    Ok(Arc::new(region))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::local::tests::{write_catalog, REGION_ID};
    use crate::backend::LocalBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_select_region() {
        let dir = TempDir::new().unwrap();
        write_catalog(dir.path());
        let backend = LocalBackend::new(dir.path().to_path_buf(), dir.path().join("exports"));

        let region = select_region(&backend, REGION_ID).await.unwrap();
        assert_eq!(region.id, REGION_ID);
        assert_eq!(region.style.color, "red");
    }

    #[tokio::test]
    async fn test_blank_region_id() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path().to_path_buf(), dir.path().join("exports"));

        let err = select_region(&backend, "  ").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { kind: "region", .. }));
    }
}
