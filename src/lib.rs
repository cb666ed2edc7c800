//! satstack: Satellite Compositing and Zonal Statistics Pipeline
//!
//! This library filters raster time series to a region and date range, masks
//! cloud-affected pixels from bit-encoded quality bands, reduces the series
//! to a per-pixel composite, computes budgeted zonal statistics and submits
//! raster or vector exports to a compute backend that is polled to completion.

pub mod types;
pub mod core;
pub mod io;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    Band, BoundingBox, DateRange, Feature, FeatureGeometry, Geometry, GridTransform, PipelineError, Polygon,
    QualityMask, RasterLayer, RasterSeries, SatResult, VectorCollection,
};

pub use core::{
    CollectionFilter, Composite, CompositeParams, MaskingRule, QaBitMask, Reducer, Statistic, TemporalCompositor,
    ZonalRequest, ZonalStatistics,
};

pub use io::{
    ComputeBackend, DataSource, ExportOrchestrator, ExportRequest, FeatureRegionResolver, InMemoryCatalog, JobState,
    LocalBackend, RegionResolver,
};

pub use pipeline::{DatasetConfig, Pipeline, PipelineConfig, RunReport};
