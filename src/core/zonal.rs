use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::core::sampling::{estimated_samples, SampleGrid};
use crate::types::{BoundingBox, Geometry, PipelineError, RasterLayer, SatResult};

/// Default sample budget, matching the usual 1e9 pixel ceiling
pub const DEFAULT_MAX_SAMPLES: u64 = 1_000_000_000;

/// Scalar aggregate computed over a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Mean,
    Min,
    Max,
    Count,
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Statistic::Mean => "mean",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Count => "count",
        };
        f.write_str(name)
    }
}

/// What to compute, on which band, at which scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalRequest {
    pub band: String,
    pub statistics: BTreeSet<Statistic>,
    /// Ground distance per sample in metres
    pub scale: f64,
    #[serde(default = "default_max_samples")]
    pub max_samples: u64,
}

fn default_max_samples() -> u64 {
    DEFAULT_MAX_SAMPLES
}

impl ZonalRequest {
    pub fn new(band: impl Into<String>, statistics: &[Statistic], scale: f64) -> Self {
        Self {
            band: band.into(),
            statistics: statistics.iter().copied().collect(),
            scale,
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }

    pub fn with_max_samples(mut self, max_samples: u64) -> Self {
        self.max_samples = max_samples;
        self
    }

    fn context(&self, region: &Geometry) -> String {
        format!("statistics of band '{}' over region '{}' at {} m", self.band, region.name, self.scale)
    }

    pub fn validate(&self, region: &Geometry) -> SatResult<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(PipelineError::Validation {
                context: self.context(region),
                reason: format!("scale must be positive, got {}", self.scale),
            });
        }
        if self.statistics.is_empty() {
            return Err(PipelineError::Validation {
                context: self.context(region),
                reason: "no statistics requested".to_string(),
            });
        }
        Ok(())
    }
}

/// Immutable zonal result, tied to the region and scale it was computed at
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalStatistics {
    pub band: String,
    pub region: Geometry,
    pub scale: f64,
    pub requested: BTreeSet<Statistic>,
    pub values: BTreeMap<Statistic, f64>,
}

impl ZonalStatistics {
    pub fn get(&self, statistic: Statistic) -> Option<f64> {
        self.values.get(&statistic).copied()
    }

    pub fn mean(&self) -> Option<f64> {
        self.get(Statistic::Mean)
    }

    pub fn min(&self) -> Option<f64> {
        self.get(Statistic::Min)
    }

    pub fn max(&self) -> Option<f64> {
        self.get(Statistic::Max)
    }

    pub fn count(&self) -> Option<u64> {
        self.get(Statistic::Count).map(|c| c as u64)
    }

    /// Results are only comparable at the same scale over the same region
    pub fn is_comparable(&self, other: &ZonalStatistics) -> bool {
        self.scale == other.scale && self.region == other.region
    }
}

impl fmt::Display for ZonalStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} over '{}' at {} m:", self.band, self.region.name, self.scale)?;
        for statistic in &self.requested {
            match self.get(*statistic) {
                Some(v) => write!(f, " {}={}", statistic, v)?,
                None => write!(f, " {}=null", statistic)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    fn merge(self, other: Accumulator) -> Accumulator {
        if other.count == 0 {
            return self;
        }
        if self.count == 0 {
            return other;
        }
        Accumulator {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    fn value(&self, statistic: Statistic) -> Option<f64> {
        match statistic {
            Statistic::Count => Some(self.count as f64),
            _ if self.count == 0 => None,
            Statistic::Mean => Some(self.sum / self.count as f64),
            Statistic::Min => Some(self.min),
            Statistic::Max => Some(self.max),
        }
    }
}

/// Compute the requested statistics of one band over a region
///
/// Samples sit on a grid of whole cells at the requested scale and count only
/// when their entire cell lies inside the region, so `count * scale²` never
/// exceeds the region area. Fails with `BudgetExceeded` before any pixel is
/// read when either the area estimate or the evaluated grid is larger than
/// the request allows. Statistics that have no valid sample are absent.
pub fn reduce_region(layer: &RasterLayer, region: &Geometry, request: &ZonalRequest) -> SatResult<ZonalStatistics> {
    request.validate(region)?;
    if layer.transform.crs != region.crs {
        return Err(PipelineError::Validation {
            context: request.context(region),
            reason: format!("layer CRS {} differs from region CRS {}", layer.transform.crs, region.crs),
        });
    }
    let band = layer.band(&request.band)?;

    let grid = SampleGrid::inscribed(region, request.scale);
    let required = estimated_samples(region, request.scale).max(grid.len());
    if required > request.max_samples {
        return Err(PipelineError::BudgetExceeded {
            context: request.context(region),
            required,
            budget: request.max_samples,
        });
    }

    // shrink cells a hair so edges shared with the region boundary still count
    let half_x = grid.step_x * (0.5 - 1e-9);
    let half_y = grid.step_y * (0.5 - 1e-9);
    let dim = layer.dim();
    let sample_row = |row: usize| {
        let mut acc = Accumulator::default();
        for col in 0..grid.cols {
            let [x, y] = grid.center(row, col);
            if !region.contains(x, y) {
                continue;
            }
            let cell = BoundingBox::new(x - half_x, y - half_y, x + half_x, y + half_y);
            if !region.covers(&cell) {
                continue;
            }
            if let Some(value) = layer.transform.pixel_of(x, y, dim).and_then(|(r, c)| band.get(r, c)) {
                acc.push(value as f64);
            }
        }
        acc
    };

    #[cfg(feature = "parallel")]
    let acc = {
        use rayon::prelude::*;
        (0..grid.rows)
            .into_par_iter()
            .map(sample_row)
            .reduce(Accumulator::default, Accumulator::merge)
    };

    #[cfg(not(feature = "parallel"))]
    let acc = (0..grid.rows).map(sample_row).fold(Accumulator::default(), Accumulator::merge);

    let values = request
        .statistics
        .iter()
        .filter_map(|s| acc.value(*s).map(|v| (*s, v)))
        .collect();
    let stats = ZonalStatistics {
        band: request.band.clone(),
        region: region.clone(),
        scale: request.scale,
        requested: request.statistics.clone(),
        values,
    };
    log::info!("Zonal statistics for '{}': {}", layer.id, stats);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, GridTransform, Polygon};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn ramp_layer() -> RasterLayer {
        // 4x4 grid of 100 m pixels holding 0..16
        let values = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32);
        let bands = BTreeMap::from([("v".to_string(), Band::from_values(values))]);
        RasterLayer::new("ramp", GridTransform::new(0.0, 400.0, 100.0, 100.0, "EPSG:32643"), bands).unwrap()
    }

    fn square(side: f64) -> Geometry {
        Geometry::rectangle("sq", BoundingBox::new(0.0, 0.0, side, side), "EPSG:32643").unwrap()
    }

    #[test]
    fn test_full_statistics() {
        let request = ZonalRequest::new("v", &[Statistic::Mean, Statistic::Min, Statistic::Max, Statistic::Count], 100.0);
        let stats = reduce_region(&ramp_layer(), &square(400.0), &request).unwrap();
        assert_relative_eq!(stats.mean().unwrap(), 7.5);
        assert_eq!(stats.min(), Some(0.0));
        assert_eq!(stats.max(), Some(15.0));
        assert_eq!(stats.count(), Some(16));
    }

    #[test]
    fn test_unrequested_statistics_absent() {
        let request = ZonalRequest::new("v", &[Statistic::Mean], 100.0);
        let stats = reduce_region(&ramp_layer(), &square(400.0), &request).unwrap();
        assert!(stats.mean().is_some());
        assert_eq!(stats.max(), None);
        assert_eq!(stats.count(), None);
    }

    #[test]
    fn test_budget_exceeded_is_hard_stop() {
        let region = square(10_000.0);
        let request = ZonalRequest::new("v", &[Statistic::Mean], 500.0).with_max_samples(100);
        match reduce_region(&ramp_layer(), &region, &request) {
            Err(PipelineError::BudgetExceeded { required, budget, .. }) => {
                assert_eq!(required, 400);
                assert_eq!(budget, 100);
            }
            other => panic!("expected BudgetExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_l_shaped_region_counts_whole_cells() {
        // 400 m square minus its upper-right 200 m quadrant
        let outline = vec![[0.0, 0.0], [400.0, 0.0], [400.0, 200.0], [200.0, 200.0], [200.0, 400.0], [0.0, 400.0]];
        let region = Geometry::new("ell", vec![Polygon::new(outline)], "EPSG:32643").unwrap();
        let request = ZonalRequest::new("v", &[Statistic::Mean, Statistic::Count], 100.0);
        let stats = reduce_region(&ramp_layer(), &region, &request).unwrap();
        assert_eq!(stats.count(), Some(12));
        // the excluded quadrant holds 2, 3, 6 and 7
        assert_relative_eq!(stats.mean().unwrap(), 8.5);
    }

    #[test]
    fn test_diagonal_sliver_bounded_by_area() {
        // one metre wide strip along the diagonal of a 1 km box, about 1000 m²
        let outline = vec![[0.0, 0.0], [1000.0, 1000.0], [1000.0, 1001.0], [0.0, 1.0]];
        let region = Geometry::new("sliver", vec![Polygon::new(outline)], "EPSG:32643").unwrap();
        let area_cells = region.area_m2() / (100.0 * 100.0);

        let request = ZonalRequest::new("v", &[Statistic::Count], 100.0);
        let stats = reduce_region(&ramp_layer(), &region, &request).unwrap();
        assert!(stats.count().unwrap() as f64 <= area_cells);
        assert_eq!(stats.count(), Some(0));

        // the area estimate alone would allow a single sample
        let tight = ZonalRequest::new("v", &[Statistic::Count], 100.0).with_max_samples(1);
        match reduce_region(&ramp_layer(), &region, &tight) {
            Err(PipelineError::BudgetExceeded { required, budget, .. }) => {
                assert_eq!(required, 100);
                assert_eq!(budget, 1);
            }
            other => panic!("expected BudgetExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_no_valid_samples_leaves_count_only() {
        let values = Array2::from_elem((4, 4), -9999.0);
        let bands = BTreeMap::from([("v".to_string(), Band::with_nodata(values, -9999.0))]);
        let layer = RasterLayer::new("empty", GridTransform::new(0.0, 400.0, 100.0, 100.0, "EPSG:32643"), bands).unwrap();
        let request = ZonalRequest::new("v", &[Statistic::Mean, Statistic::Count], 100.0);
        let stats = reduce_region(&layer, &square(400.0), &request).unwrap();
        assert_eq!(stats.count(), Some(0));
        assert_eq!(stats.mean(), None);
        assert!(stats.to_string().contains("mean=null"));
    }

    #[test]
    fn test_coarser_scale_samples_fewer_pixels() {
        let fine = reduce_region(&ramp_layer(), &square(400.0), &ZonalRequest::new("v", &[Statistic::Count], 100.0)).unwrap();
        let coarse = reduce_region(&ramp_layer(), &square(400.0), &ZonalRequest::new("v", &[Statistic::Count], 200.0)).unwrap();
        assert_eq!(coarse.count(), Some(4));
        assert!(!fine.is_comparable(&coarse));
    }

    #[test]
    fn test_non_positive_scale_rejected() {
        let request = ZonalRequest::new("v", &[Statistic::Mean], 0.0);
        assert!(matches!(
            reduce_region(&ramp_layer(), &square(400.0), &request),
            Err(PipelineError::Validation { .. })
        ));
    }
}
