use serde::{Deserialize, Serialize};

use crate::types::{DateRange, Geometry, PipelineError, RasterSeries, SatResult};

/// Upper bound on a scalar layer property (exclusive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataThreshold {
    pub property: String,
    pub max: f64,
}

impl MetadataThreshold {
    pub fn new(property: impl Into<String>, max: f64) -> Self {
        Self { property: property.into(), max }
    }

    /// Sentinel-2 scene-level cloud cover limit
    pub fn max_cloud_percentage(max: f64) -> Self {
        Self::new("CLOUDY_PIXEL_PERCENTAGE", max)
    }
}

/// Equality constraint on a string layer tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEquals {
    pub tag: String,
    pub value: String,
}

/// Date, bounds and metadata filter over a raster series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionFilter {
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub threshold: Option<MetadataThreshold>,
    #[serde(default)]
    pub tag: Option<TagEquals>,
}

impl CollectionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_threshold(mut self, threshold: MetadataThreshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.tag = Some(TagEquals { tag: tag.into(), value: value.into() });
        self
    }

    /// Keep layers inside the date range, overlapping the region and under the threshold
    ///
    /// Acquisition order is preserved. Layers without an acquisition date are
    /// excluded by a date filter; layers missing the threshold property are
    /// excluded by a threshold filter.
    pub fn apply(&self, series: &RasterSeries, region: &Geometry) -> SatResult<RasterSeries> {
        let bounds = region.bbox();
        let layers: Vec<_> = series
            .iter()
            .filter(|layer| match &self.date_range {
                Some(range) => layer.acquired.map_or(false, |d| range.contains(d)),
                None => true,
            })
            .filter(|layer| layer.transform.crs == region.crs && layer.extent().intersects(&bounds))
            .filter(|layer| match &self.threshold {
                Some(t) => layer.properties.get(&t.property).map_or(false, |v| *v < t.max),
                None => true,
            })
            .filter(|layer| match &self.tag {
                Some(t) => layer.tags.get(&t.tag) == Some(&t.value),
                None => true,
            })
            .cloned()
            .collect();

        log::info!(
            "Filtered '{}' over '{}': {} of {} layers kept",
            series.id,
            region.name,
            layers.len(),
            series.len()
        );

        if layers.is_empty() {
            return Err(PipelineError::EmptyResult(self.describe(&series.id, &region.name)));
        }
        Ok(RasterSeries::new(series.id.clone(), layers))
    }

    /// Identifying parameters for error messages
    pub fn describe(&self, series_id: &str, region: &str) -> String {
        let mut parts = vec![format!("series '{}'", series_id), format!("region '{}'", region)];
        if let Some(range) = &self.date_range {
            parts.push(format!("dates {}", range));
        }
        if let Some(t) = &self.threshold {
            parts.push(format!("{} < {}", t.property, t.max));
        }
        if let Some(t) = &self.tag {
            parts.push(format!("{} == {}", t.tag, t.value));
        }
        parts.join(", ")
    }
}
