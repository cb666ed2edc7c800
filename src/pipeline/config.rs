use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::core::collection_filter::CollectionFilter;
use crate::core::compositor::CompositeParams;
use crate::core::zonal::ZonalRequest;
use crate::io::export::{Destination, ExportFormat, RasterSpatialParams};
use crate::types::{PipelineError, SatResult};

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_STATS_TIMEOUT_MS: u64 = 60_000;

/// Where a dataset's data comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetSource {
    /// Image collection or single image, composited over time
    Raster { collection: String },
    /// Feature table, filtered to the region
    Vector { collection: String },
}

impl DatasetSource {
    pub fn collection(&self) -> &str {
        match self {
            DatasetSource::Raster { collection } | DatasetSource::Vector { collection } => collection,
        }
    }
}

/// Property equality constraint on vector features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyEquals {
    pub property: String,
    pub value: Value,
}

/// Export task parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub description: String,
    pub folder: String,
    /// File name or prefix; defaults to the description
    #[serde(default)]
    pub file_name: Option<String>,
    pub format: ExportFormat,
    /// Raster exports only
    #[serde(default)]
    pub spatial: Option<RasterSpatialParams>,
}

impl ExportConfig {
    pub fn destination(&self) -> Destination {
        Destination {
            folder: self.folder.clone(),
            file_name: self.file_name.clone().unwrap_or_else(|| self.description.clone()),
            format: self.format,
        }
    }
}

/// Read-only rendering hint handed to an external visualiser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DisplayHint {
    #[serde(default)]
    pub bands: Vec<String>,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub palette: Vec<String>,
    #[serde(default)]
    pub gamma: Option<f64>,
}

/// Configuration record for one data product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub source: DatasetSource,
    #[serde(default)]
    pub filter: CollectionFilter,
    /// Keep only the first layer that passes the filter
    #[serde(default)]
    pub take_first: bool,
    #[serde(default)]
    pub composite: CompositeParams,
    #[serde(default)]
    pub statistics: Option<ZonalRequest>,
    #[serde(default)]
    pub property_filter: Option<PropertyEquals>,
    /// Number of vector features to report as a sample
    #[serde(default)]
    pub sample_size: Option<usize>,
    #[serde(default)]
    pub export: Option<ExportConfig>,
    #[serde(default)]
    pub display: Option<DisplayHint>,
}

impl DatasetConfig {
    pub fn raster(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self::with_source(name, DatasetSource::Raster { collection: collection.into() })
    }

    pub fn vector(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self::with_source(name, DatasetSource::Vector { collection: collection.into() })
    }

    fn with_source(name: impl Into<String>, source: DatasetSource) -> Self {
        Self {
            name: name.into(),
            source,
            filter: CollectionFilter::default(),
            take_first: false,
            composite: CompositeParams::default(),
            statistics: None,
            property_filter: None,
            sample_size: None,
            export: None,
            display: None,
        }
    }

    pub fn is_raster(&self) -> bool {
        matches!(self.source, DatasetSource::Raster { .. })
    }

    fn invalid(&self, reason: impl std::fmt::Display) -> PipelineError {
        PipelineError::Config(format!("dataset '{}': {}", self.name, reason))
    }

    /// Check the record before any data is touched
    pub fn validate(&self) -> SatResult<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config("dataset name is empty".to_string()));
        }
        if self.source.collection().trim().is_empty() {
            return Err(self.invalid("source collection is empty"));
        }
        if let Some(range) = &self.filter.date_range {
            if range.start > range.end {
                return Err(self.invalid(format!("date range {} is reversed", range)));
            }
        }

        if self.is_raster() {
            self.composite
                .validate(&self.name)
                .map_err(|e| self.invalid(e))?;
            if let Some(stats) = &self.statistics {
                if !(stats.scale.is_finite() && stats.scale > 0.0) {
                    return Err(self.invalid(format!("statistics scale must be positive, got {}", stats.scale)));
                }
                if stats.statistics.is_empty() {
                    return Err(self.invalid("no statistics requested"));
                }
            }
            if self.property_filter.is_some() || self.sample_size.is_some() {
                return Err(self.invalid("property filters and samples apply to vector datasets only"));
            }
        } else if self.statistics.is_some() || self.take_first {
            return Err(self.invalid("statistics and take_first apply to raster datasets only"));
        }

        if let Some(export) = &self.export {
            if export.description.trim().is_empty() {
                return Err(self.invalid("export description is empty"));
            }
            match (self.is_raster(), export.format, &export.spatial) {
                (true, ExportFormat::GeoTiff, Some(_)) | (false, ExportFormat::GeoJson, None) => {}
                (true, ExportFormat::GeoTiff, None) => {
                    return Err(self.invalid("raster export needs spatial parameters"));
                }
                (is_raster, format, _) => {
                    let kind = if is_raster { "raster" } else { "vector" };
                    return Err(self.invalid(format!("{:?} export does not fit a {} dataset", format, kind)));
                }
            }
        }
        Ok(())
    }
}

/// Configuration of one pipeline run over a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Administrative name passed to the region resolver
    pub region: String,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stats_timeout_ms")]
    pub stats_timeout_ms: u64,
    /// Give up waiting on exports after this long; `None` waits indefinitely
    #[serde(default)]
    pub export_timeout_ms: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_stats_timeout_ms() -> u64 {
    DEFAULT_STATS_TIMEOUT_MS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region: "Islamabad".to_string(),
            datasets: Vec::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            stats_timeout_ms: DEFAULT_STATS_TIMEOUT_MS,
            export_timeout_ms: None,
        }
    }
}

impl PipelineConfig {
    pub fn new(region: impl Into<String>, datasets: Vec<DatasetConfig>) -> Self {
        Self { region: region.into(), datasets, ..Self::default() }
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SatResult<Self> {
        let path = path.as_ref();
        log::info!("Loading pipeline configuration: {}", path.display());
        let json = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_timeout_ms)
    }

    pub fn export_timeout(&self) -> Option<Duration> {
        self.export_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> SatResult<()> {
        if self.region.trim().is_empty() {
            return Err(PipelineError::Config("region name is empty".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::Config("poll interval must be positive".to_string()));
        }
        if self.stats_timeout_ms == 0 {
            return Err(PipelineError::Config("statistics timeout must be positive".to_string()));
        }
        let mut names = HashSet::new();
        for dataset in &self.datasets {
            dataset.validate()?;
            if !names.insert(dataset.name.as_str()) {
                return Err(PipelineError::Config(format!("duplicate dataset name '{}'", dataset.name)));
            }
        }
        Ok(())
    }
}
