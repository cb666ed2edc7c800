use std::collections::HashMap;
use std::path::Path;

use crate::io::geojson;
use crate::types::{PipelineError, RasterLayer, RasterSeries, SatResult, VectorCollection};

/// Source of named datasets
pub trait DataSource: Send + Sync {
    fn raster_series(&self, id: &str) -> SatResult<RasterSeries>;

    fn vector_collection(&self, id: &str) -> SatResult<VectorCollection>;
}

/// Catalog holding datasets in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    rasters: HashMap<String, RasterSeries>,
    vectors: HashMap<String, VectorCollection>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_series(&mut self, series: RasterSeries) {
        log::debug!("Catalog: series '{}' ({} layers)", series.id, series.len());
        self.rasters.insert(series.id.clone(), series);
    }

    /// A single image is stored as a one-layer series under its own id
    pub fn insert_image(&mut self, layer: RasterLayer) {
        self.insert_series(RasterSeries::single(layer));
    }

    pub fn insert_collection(&mut self, collection: VectorCollection) {
        log::debug!("Catalog: collection '{}' ({} features)", collection.id, collection.size());
        self.vectors.insert(collection.id.clone(), collection);
    }

    /// Register a GeoJSON file under its file stem
    pub fn load_geojson<P: AsRef<Path>>(&mut self, path: P) -> SatResult<()> {
        self.insert_collection(geojson::read_collection(path)?);
        Ok(())
    }

    pub fn with_series(mut self, series: RasterSeries) -> Self {
        self.insert_series(series);
        self
    }

    pub fn with_image(mut self, layer: RasterLayer) -> Self {
        self.insert_image(layer);
        self
    }

    pub fn with_collection(mut self, collection: VectorCollection) -> Self {
        self.insert_collection(collection);
        self
    }
}

impl DataSource for InMemoryCatalog {
    fn raster_series(&self, id: &str) -> SatResult<RasterSeries> {
        self.rasters
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound { kind: "raster dataset", name: id.to_string() })
    }

    fn vector_collection(&self, id: &str) -> SatResult<VectorCollection> {
        self.vectors
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound { kind: "vector dataset", name: id.to_string() })
    }
}
