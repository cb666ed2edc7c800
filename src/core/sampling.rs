use std::collections::BTreeMap;

use crate::types::{
    Band, BoundingBox, Coord, Geometry, GridTransform, PipelineError, PixelValue, RasterLayer, SatResult,
};

/// Sample grid covering a bounding box, anchored at its top-left corner
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGrid {
    pub bbox: BoundingBox,
    pub step_x: f64,
    pub step_y: f64,
    pub cols: usize,
    pub rows: usize,
}

impl SampleGrid {
    pub fn over(bbox: BoundingBox, step: (f64, f64)) -> Self {
        let cols = cells(bbox.width(), step.0);
        let rows = cells(bbox.height(), step.1);
        Self { bbox, step_x: step.0, step_y: step.1, cols, rows }
    }

    /// Grid at a ground scale in metres over the region's bounding box
    pub fn for_region(region: &Geometry, scale_m: f64) -> Self {
        Self::over(region.bbox(), region.step_for_scale(scale_m))
    }

    /// Whole cells centred in the region's bounding box
    ///
    /// Partial edge cells are dropped, so a rectangular region never holds
    /// more than `area / scale²` samples.
    pub fn inscribed(region: &Geometry, scale_m: f64) -> Self {
        let bbox = region.bbox();
        let (step_x, step_y) = region.step_for_scale(scale_m);
        let cols = whole_cells(bbox.width(), step_x);
        let rows = whole_cells(bbox.height(), step_y);
        let margin_x = (bbox.width() - cols as f64 * step_x) / 2.0;
        let margin_y = (bbox.height() - rows as f64 * step_y) / 2.0;
        let inner = BoundingBox::new(
            bbox.min_x + margin_x,
            bbox.min_y + margin_y,
            bbox.max_x - margin_x,
            bbox.max_y - margin_y,
        );
        Self { bbox: inner, step_x, step_y, cols, rows }
    }

    /// Sample count, saturating at `u64::MAX` for degenerate scales
    pub fn len(&self) -> u64 {
        (self.cols as u64).saturating_mul(self.rows as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn center(&self, row: usize, col: usize) -> Coord {
        [
            self.bbox.min_x + (col as f64 + 0.5) * self.step_x,
            self.bbox.max_y - (row as f64 + 0.5) * self.step_y,
        ]
    }

    pub fn centers(&self) -> impl Iterator<Item = Coord> + '_ {
        (0..self.rows).flat_map(move |r| (0..self.cols).map(move |c| self.center(r, c)))
    }

    pub fn transform(&self, crs: &str) -> GridTransform {
        GridTransform::new(self.bbox.min_x, self.bbox.max_y, self.step_x, self.step_y, crs)
    }
}

fn cells(extent: f64, step: f64) -> usize {
    if extent <= 0.0 || step <= 0.0 || !step.is_finite() {
        return 0;
    }
    // tolerate float noise so 10 km / 500 m is exactly 20 cells
    (extent / step - 1e-9).ceil().max(0.0) as usize
}

fn whole_cells(extent: f64, step: f64) -> usize {
    if extent <= 0.0 || step <= 0.0 || !step.is_finite() {
        return 0;
    }
    (extent / step + 1e-9).floor().max(0.0) as usize
}

/// Samples implied by a region's ground area at a scale, `ceil(area / scale²)`
pub fn estimated_samples(region: &Geometry, scale_m: f64) -> u64 {
    let samples = region.area_m2() / (scale_m * scale_m);
    (samples - 1e-9).ceil().max(0.0) as u64
}

/// Nearest-neighbour resample of every band onto a sample grid
///
/// Samples falling outside the source grid or on invalid source cells are
/// invalid in the output.
pub fn resample_nearest(layer: &RasterLayer, grid: &SampleGrid) -> SatResult<RasterLayer> {
    let dim = layer.dim();
    let lookup: Vec<Option<(usize, usize)>> = grid
        .centers()
        .map(|[x, y]| layer.transform.pixel_of(x, y, dim))
        .collect();

    let bands = layer
        .bands
        .iter()
        .map(|(name, band)| {
            let (values, mask): (Vec<PixelValue>, Vec<bool>) = lookup
                .iter()
                .map(|pixel| match pixel.and_then(|(r, c)| band.get(r, c)) {
                    Some(v) => (v, true),
                    None => (PixelValue::NAN, false),
                })
                .unzip();
            let shape = (grid.rows, grid.cols);
            let values = ndarray::Array2::from_shape_vec(shape, values).map_err(shape_error)?;
            let mask = ndarray::Array2::from_shape_vec(shape, mask).map_err(shape_error)?;
            Ok((name.clone(), Band::new(values, mask)?))
        })
        .collect::<SatResult<BTreeMap<_, _>>>()?;

    let mut resampled = RasterLayer::new(layer.id.clone(), grid.transform(&layer.transform.crs), bands)?;
    resampled.acquired = layer.acquired;
    Ok(resampled)
}

fn shape_error(e: ndarray::ShapeError) -> PipelineError {
    PipelineError::Validation {
        context: "sample grid".to_string(),
        reason: format!("shape error: {}", e),
    }
}
