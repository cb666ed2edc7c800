use geo::{Intersects, Point};
use serde_json::Value;

use crate::types::{FeatureGeometry, Geometry, PipelineError, SatResult, VectorCollection};

/// Features intersecting a region, as a new collection
pub fn filter_bounds(collection: &VectorCollection, region: &Geometry) -> SatResult<VectorCollection> {
    if collection.crs != region.crs {
        return Err(PipelineError::Validation {
            context: format!("collection '{}' over region '{}'", collection.id, region.name),
            reason: format!("collection CRS {} differs from region CRS {}", collection.crs, region.crs),
        });
    }
    let features: Vec<_> = collection
        .features
        .iter()
        .filter(|f| intersects(&f.geometry, region))
        .cloned()
        .collect();
    log::info!(
        "Filtered '{}' over '{}': {} of {} features kept",
        collection.id,
        region.name,
        features.len(),
        collection.size()
    );
    Ok(VectorCollection::new(collection.id.clone(), collection.crs.clone(), features))
}

/// Features whose property equals a value
pub fn filter_eq(collection: &VectorCollection, property: &str, value: &Value) -> VectorCollection {
    let features = collection
        .features
        .iter()
        .filter(|f| f.properties.get(property) == Some(value))
        .cloned()
        .collect();
    VectorCollection::new(collection.id.clone(), collection.crs.clone(), features)
}

/// True when a feature geometry shares at least one point with the region
pub fn intersects(geometry: &FeatureGeometry, region: &Geometry) -> bool {
    match geometry.bbox() {
        Some(bbox) if bbox.intersects(&region.bbox()) => {}
        _ => return false,
    }
    let shape = region.shape();
    match geometry {
        FeatureGeometry::Point([x, y]) => shape.intersects(&Point::new(*x, *y)),
        FeatureGeometry::MultiPoint(points) => points.iter().any(|[x, y]| shape.intersects(&Point::new(*x, *y))),
        FeatureGeometry::Polygon(polygon) => shape.intersects(&polygon.to_geo()),
        FeatureGeometry::MultiPolygon(polygons) => polygons.iter().any(|p| shape.intersects(&p.to_geo())),
    }
}
