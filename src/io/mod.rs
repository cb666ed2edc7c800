//! External collaborators: regions, datasets, backends, exports and codecs

pub mod geojson;
pub mod geotiff;
pub mod region;
pub mod catalog;
pub mod backend;
pub mod export;

pub use region::{RegionResolver, FeatureRegionResolver};
pub use catalog::{DataSource, InMemoryCatalog};
pub use backend::{ComputeBackend, LocalBackend, JobHandle, BackendStatus, statistics_with_timeout};
pub use export::{
    ExportOrchestrator, ExportRequest, ExportProduct, ExportFormat, ExportJob, JobState, JobId, JobReport,
    Destination, RasterSpatialParams, DEFAULT_MAX_PIXELS,
};
