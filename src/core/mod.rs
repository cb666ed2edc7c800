//! Core raster and vector processing modules

pub mod quality_mask;
pub mod collection_filter;
pub mod sampling;
pub mod compositor;
pub mod zonal;
pub mod vector_filter;

// Re-export main types
pub use quality_mask::{QaBit, QaBitMask, MaskingRule};
pub use collection_filter::{CollectionFilter, MetadataThreshold, TagEquals};
pub use sampling::{SampleGrid, estimated_samples, resample_nearest};
pub use compositor::{TemporalCompositor, CompositeParams, Composite, LazyComposite, Provenance, Reducer, clip_to_region};
pub use zonal::{ZonalRequest, ZonalStatistics, Statistic, reduce_region};
pub use vector_filter::{filter_bounds, filter_eq};
