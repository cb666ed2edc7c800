use serde_json::Value;
use std::path::Path;

use crate::core::vector_filter::filter_eq;
use crate::io::geojson;
use crate::types::{FeatureGeometry, Geometry, PipelineError, Polygon, SatResult, VectorCollection};

/// Default GAUL level-1 name attribute
pub const ADM1_NAME: &str = "ADM1_NAME";

/// Turns an administrative name into a region geometry
pub trait RegionResolver: Send + Sync {
    fn resolve(&self, admin_name: &str) -> SatResult<Geometry>;
}

/// Resolver backed by a boundary feature collection
///
/// Every polygon of every matching feature becomes part of the region.
#[derive(Debug, Clone)]
pub struct FeatureRegionResolver {
    boundaries: VectorCollection,
    name_property: String,
}

impl FeatureRegionResolver {
    pub fn new(boundaries: VectorCollection, name_property: impl Into<String>) -> Self {
        Self { boundaries, name_property: name_property.into() }
    }

    /// Load boundaries from a GeoJSON file, matching on `ADM1_NAME`
    pub fn from_geojson<P: AsRef<Path>>(path: P) -> SatResult<Self> {
        Ok(Self::new(geojson::read_collection(path)?, ADM1_NAME))
    }
}

impl RegionResolver for FeatureRegionResolver {
    fn resolve(&self, admin_name: &str) -> SatResult<Geometry> {
        let matched = filter_eq(&self.boundaries, &self.name_property, &Value::String(admin_name.to_string()));
        let polygons: Vec<Polygon> = matched
            .features
            .into_iter()
            .flat_map(|f| match f.geometry {
                FeatureGeometry::Polygon(p) => vec![p],
                FeatureGeometry::MultiPolygon(ps) => ps,
                FeatureGeometry::Point(_) | FeatureGeometry::MultiPoint(_) => Vec::new(),
            })
            .collect();

        if polygons.is_empty() {
            return Err(PipelineError::NotFound {
                kind: "region",
                name: format!("{} = '{}' in '{}'", self.name_property, admin_name, self.boundaries.id),
            });
        }
        log::info!("Resolved region '{}' ({} polygons)", admin_name, polygons.len());
        Geometry::new(admin_name, polygons, self.boundaries.crs.clone())
    }
}
