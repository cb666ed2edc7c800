use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::quality_mask::MaskingRule;
use crate::types::{
    Band, DateRange, Geometry, PipelineError, PixelValue, RasterLayer, RasterSeries, SatResult,
};

/// Fill value written into cells that stay invalid after reduction
pub const NODATA_FILL: PixelValue = PixelValue::NAN;

/// Per-pixel temporal reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Mean,
    Median,
}

impl Reducer {
    /// Band-name suffix used by reducer-named outputs (`population_mean`)
    pub fn suffix(&self) -> &'static str {
        match self {
            Reducer::Mean => "mean",
            Reducer::Median => "median",
        }
    }

    /// Reduce the valid values of one pixel stack; `None` for an empty stack
    pub fn reduce(&self, values: &mut [PixelValue]) -> Option<PixelValue> {
        if values.is_empty() {
            return None;
        }
        match self {
            Reducer::Mean => {
                let sum: f64 = values.iter().map(|&v| v as f64).sum();
                Some((sum / values.len() as f64) as PixelValue)
            }
            Reducer::Median => {
                values.sort_by(|a, b| a.total_cmp(b));
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    Some(((values[mid - 1] as f64 + values[mid] as f64) / 2.0) as PixelValue)
                } else {
                    Some(values[mid])
                }
            }
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Compositing parameters for one data product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeParams {
    pub reducer: Reducer,
    /// Bands to composite; empty means every band except the QA band
    #[serde(default)]
    pub bands: Vec<String>,
    /// Native integer encoding divisor (e.g. 10000 for Sentinel-2 reflectance)
    #[serde(default)]
    pub scale_divisor: Option<PixelValue>,
    #[serde(default)]
    pub masking: MaskingRule,
    /// Output band renames, applied after reduction
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
    /// Append `_<reducer>` to every output band name
    #[serde(default)]
    pub suffix_with_reducer: bool,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            reducer: Reducer::Mean,
            bands: Vec::new(),
            scale_divisor: None,
            masking: MaskingRule::None,
            renames: BTreeMap::new(),
            suffix_with_reducer: false,
        }
    }
}

impl CompositeParams {
    pub fn validate(&self, context: &str) -> SatResult<()> {
        if let Some(divisor) = self.scale_divisor {
            if !(divisor.is_finite() && divisor > 0.0) {
                return Err(PipelineError::Validation {
                    context: context.to_string(),
                    reason: format!("scale divisor must be positive, got {}", divisor),
                });
            }
        }
        if let MaskingRule::QaBits(mask) = &self.masking {
            mask.validate()?;
            if self.bands.iter().any(|b| *b == mask.band) {
                return Err(PipelineError::Validation {
                    context: context.to_string(),
                    reason: format!("QA band '{}' cannot be composited", mask.band),
                });
            }
        }
        Ok(())
    }
}

/// Where a composite came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub series_id: String,
    pub region: String,
    pub reducer: Reducer,
    pub date_range: Option<DateRange>,
    pub masking: String,
    pub scale_divisor: Option<PixelValue>,
    pub layer_ids: Vec<String>,
}

/// Temporal reduction of a series, clipped to a region
#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub layer: RasterLayer,
    pub provenance: Provenance,
}

impl Composite {
    pub fn band(&self, name: &str) -> SatResult<&Band> {
        self.layer.band(name)
    }

    pub fn crs(&self) -> &str {
        &self.layer.transform.crs
    }
}

/// Temporal compositor: mask, rescale and reduce a filtered series
#[derive(Debug, Clone)]
pub struct TemporalCompositor {
    params: CompositeParams,
}

impl TemporalCompositor {
    pub fn new(params: CompositeParams) -> Self {
        Self { params }
    }

    /// Validate inputs and build an unevaluated composite
    ///
    /// No pixel is touched until [`LazyComposite::realize`].
    pub fn plan<'g>(
        &self,
        series: RasterSeries,
        region: &'g Geometry,
        date_range: Option<DateRange>,
    ) -> SatResult<LazyComposite<'g>> {
        let context = format!("composite of '{}' over region '{}'", series.id, region.name);
        self.params.validate(&context)?;

        let first = series.layers.first().ok_or_else(|| {
            PipelineError::EmptyResult(format!("{}: series has no layers", context))
        })?;
        if first.transform.crs != region.crs {
            return Err(PipelineError::Validation {
                context,
                reason: format!("series CRS {} differs from region CRS {}", first.transform.crs, region.crs),
            });
        }
        if let Some(layer) = series
            .iter()
            .find(|l| l.dim() != first.dim() || !l.transform.aligned_with(&first.transform))
        {
            return Err(PipelineError::Validation {
                context,
                reason: format!("layer '{}' is not on the grid of '{}'", layer.id, first.id),
            });
        }
        if !first.extent().intersects(&region.bbox()) {
            return Err(PipelineError::EmptyResult(format!("{}: series does not overlap region", context)));
        }

        Ok(LazyComposite { series, region, params: self.params.clone(), date_range })
    }

    /// Plan and realize in one step
    pub fn composite(
        &self,
        series: RasterSeries,
        region: &Geometry,
        date_range: Option<DateRange>,
    ) -> SatResult<Composite> {
        self.plan(series, region, date_range)?.realize()
    }
}

/// Deferred composite: inputs validated, reduction not yet evaluated
#[derive(Debug, Clone)]
pub struct LazyComposite<'g> {
    series: RasterSeries,
    region: &'g Geometry,
    params: CompositeParams,
    date_range: Option<DateRange>,
}

impl<'g> LazyComposite<'g> {
    pub fn series_id(&self) -> &str {
        &self.series.id
    }

    pub fn layer_count(&self) -> usize {
        self.series.len()
    }

    /// Evaluate every pixel: rescale, mask, reduce over time, clip
    pub fn realize(self) -> SatResult<Composite> {
        let params = &self.params;
        log::info!(
            "Compositing {} layers of '{}' with {} over '{}' ({})",
            self.series.len(),
            self.series.id,
            params.reducer,
            self.region.name,
            params.masking
        );

        let slices = self
            .series
            .iter()
            .map(|layer| prepare_slice(layer, params))
            .collect::<SatResult<Vec<_>>>()?;

        let first = &self.series.layers[0];
        let band_names = slices[0].band_names();
        let mut bands = BTreeMap::new();
        for name in &band_names {
            let stack = slices.iter().map(|s| s.band(name)).collect::<SatResult<Vec<_>>>()?;
            let reduced = reduce_stack(&stack, params.reducer, first.dim());
            log::debug!("Band '{}': {}/{} pixels valid after reduction", name, reduced.valid_count(), reduced.values.len());
            bands.insert(output_name(name, params), reduced);
        }

        let id = format!("{}_{}", self.series.id, params.reducer.suffix());
        let reduced = RasterLayer::new(id, first.transform.clone(), bands)?;
        let layer = clip_to_region(&reduced, self.region)?;

        let provenance = Provenance {
            series_id: self.series.id.clone(),
            region: self.region.name.clone(),
            reducer: params.reducer,
            date_range: self.date_range,
            masking: params.masking.to_string(),
            scale_divisor: params.scale_divisor,
            layer_ids: self.series.iter().map(|l| l.id.clone()).collect(),
        };
        Ok(Composite { layer, provenance })
    }
}

/// Select, rescale, then mask one time-slice
///
/// Rescaling only touches valid cells, so native no-data sentinels are never
/// divided.
fn prepare_slice(layer: &RasterLayer, params: &CompositeParams) -> SatResult<RasterLayer> {
    let names: Vec<String> = if params.bands.is_empty() {
        layer
            .band_names()
            .into_iter()
            .filter(|n| Some(n.as_str()) != params.masking.qa_band())
            .collect()
    } else {
        params.bands.clone()
    };

    let quality = params.masking.derive_mask(layer)?;
    if let Some(mask) = &quality {
        if !mask.is_aligned_with(layer) {
            return Err(PipelineError::Validation {
                context: format!("layer '{}'", layer.id),
                reason: "quality mask grid does not match layer grid".to_string(),
            });
        }
    }

    let bands = names
        .iter()
        .map(|name| {
            let mut band = layer.band(name)?.clone();
            if let Some(divisor) = params.scale_divisor {
                band = band.rescaled(divisor);
            }
            if let Some(mask) = &quality {
                band = band.masked(&mask.valid);
            }
            Ok((name.clone(), band))
        })
        .collect::<SatResult<BTreeMap<_, _>>>()?;
    layer.with_bands(bands)
}

fn output_name(name: &str, params: &CompositeParams) -> String {
    let renamed = params.renames.get(name).map(String::as_str).unwrap_or(name);
    if params.suffix_with_reducer {
        format!("{}_{}", renamed, params.reducer.suffix())
    } else {
        renamed.to_string()
    }
}

/// Reduce congruent bands along time, skipping invalid cells per pixel
fn reduce_stack(stack: &[&Band], reducer: Reducer, dim: (usize, usize)) -> Band {
    let mut values = Array2::<PixelValue>::from_elem(dim, NODATA_FILL);
    let mut mask = Array2::<bool>::from_elem(dim, false);

    let reduce_pixel = |(row, col): (usize, usize), value: &mut PixelValue, valid: &mut bool| {
        let mut pixel_stack: Vec<PixelValue> = stack.iter().filter_map(|b| b.get(row, col)).collect();
        if let Some(v) = reducer.reduce(&mut pixel_stack) {
            *value = v;
            *valid = true;
        }
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut values).and(&mut mask).par_for_each(reduce_pixel);
    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut values).and(&mut mask).for_each(reduce_pixel);

    Band { values, mask }
}

/// Crop a layer to a region's bounding window and invalidate cells outside it
pub fn clip_to_region(layer: &RasterLayer, region: &Geometry) -> SatResult<RasterLayer> {
    let (row0, row1, col0, col1) = layer
        .transform
        .window(&region.bbox(), layer.dim())
        .ok_or_else(|| {
            PipelineError::EmptyResult(format!("layer '{}' does not overlap region '{}'", layer.id, region.name))
        })?;
    let transform = layer.transform.shifted(row0, col0);

    let inside = Array2::from_shape_fn((row1 - row0, col1 - col0), |(r, c)| {
        let [x, y] = transform.pixel_center(r, c);
        region.contains(x, y)
    });

    let bands = layer
        .bands
        .iter()
        .map(|(name, band)| {
            let values = band.values.slice(s![row0..row1, col0..col1]).to_owned();
            let mask = Zip::from(band.mask.slice(s![row0..row1, col0..col1]))
                .and(&inside)
                .map_collect(|&valid, &within| valid && within);
            (name.clone(), Band { values, mask })
        })
        .collect();

    let mut clipped = RasterLayer::new(layer.id.clone(), transform, bands)?;
    clipped.acquired = layer.acquired;
    clipped.properties = layer.properties.clone();
    clipped.tags = layer.tags.clone();
    Ok(clipped)
}
