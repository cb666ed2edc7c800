use chrono::NaiveDate;
use geo::{
    AffineTransform, Area, BoundingRect, Contains, GeodesicDistance, LineString, MultiPolygon, Point, Rect, Relate,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Raster sample value (reflectance, radiance, elevation, index)
pub type PixelValue = f32;

/// 2D raster grid (rows x cols)
pub type Grid = Array2<PixelValue>;

/// 2D validity grid (true = usable)
pub type ValidityGrid = Array2<bool>;

/// Planar coordinate pair [x, y] in the owning geometry's CRS
pub type Coord = [f64; 2];

/// Lon/lat identifier outside the EPSG registry
const OGC_CRS84: &str = "OGC:CRS84";

/// EPSG code from an `EPSG:<code>` identifier
pub fn epsg_code(crs: &str) -> Option<u16> {
    let (authority, code) = crs.split_once(':')?;
    if authority.eq_ignore_ascii_case("EPSG") {
        code.trim().parse().ok()
    } else {
        None
    }
}

/// PROJ4 definition of an EPSG identifier from the crs-definitions database
pub fn proj_string(crs: &str) -> Option<&'static str> {
    epsg_code(crs).and_then(crs_definitions::from_code).map(|def| def.proj4)
}

/// True when the CRS identifier is geographic (lon/lat in degrees)
pub fn is_geographic_crs(crs: &str) -> bool {
    if crs.eq_ignore_ascii_case(OGC_CRS84) {
        return true;
    }
    proj_string(crs).map_or(false, |proj| proj.contains("+proj=longlat"))
}

/// Metres per linear unit of a projected CRS; `None` for unknown codes
fn projected_unit_meters(crs: &str) -> Option<f64> {
    let proj = proj_string(crs)?;
    let param = |key: &str| {
        proj.split_whitespace()
            .find_map(|token| token.strip_prefix(key))
    };
    if let Some(factor) = param("+to_meter=").and_then(|v| v.parse().ok()) {
        return Some(factor);
    }
    match param("+units=") {
        Some("us-ft") => Some(1200.0 / 3937.0),
        Some("ft") => Some(0.3048),
        Some("km") => Some(1000.0),
        _ => Some(1.0),
    }
}

fn to_geo_coord(c: &Coord) -> geo::Coord<f64> {
    geo::Coord { x: c[0], y: c[1] }
}

/// Axis-aligned bounding box in CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Coord {
        [(self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0]
    }

    /// Inclusive overlap test (touching edges intersect)
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Overlap with positive area, if any
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let bbox = BoundingBox::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        if bbox.width() > 0.0 && bbox.height() > 0.0 {
            Some(bbox)
        } else {
            None
        }
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            geo::Coord { x: self.min_x, y: self.min_y },
            geo::Coord { x: self.max_x, y: self.max_y },
        )
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

/// Simple polygon: one exterior ring plus optional holes
///
/// Rings are stored open or closed; the closing vertex is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Coord>,
    #[serde(default)]
    pub holes: Vec<Vec<Coord>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Coord>) -> Self {
        Self { exterior, holes: Vec::new() }
    }

    pub fn with_holes(exterior: Vec<Coord>, holes: Vec<Vec<Coord>>) -> Self {
        Self { exterior, holes }
    }

    /// Rectangle covering a bounding box
    pub fn rectangle(bbox: &BoundingBox) -> Self {
        Self::new(vec![
            [bbox.min_x, bbox.min_y],
            [bbox.max_x, bbox.min_y],
            [bbox.max_x, bbox.max_y],
            [bbox.min_x, bbox.max_y],
        ])
    }

    /// `geo` polygon; rings are closed on conversion
    pub fn to_geo(&self) -> geo::Polygon<f64> {
        let ring = |coords: &[Coord]| LineString::new(coords.iter().map(to_geo_coord).collect());
        geo::Polygon::new(ring(&self.exterior), self.holes.iter().map(|h| ring(h)).collect())
    }

    /// Holes excluded; points on the boundary are outside
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.to_geo().contains(&Point::new(x, y))
    }

    /// Planar area in CRS units squared
    pub fn area(&self) -> f64 {
        self.to_geo().unsigned_area()
    }

    fn is_valid(&self) -> bool {
        let distinct = match (self.exterior.first(), self.exterior.last()) {
            (Some(first), Some(last)) if self.exterior.len() > 1 && first == last => self.exterior.len() - 1,
            _ => self.exterior.len(),
        };
        distinct >= 3
    }
}

/// Region of interest: one or more polygons in a single CRS
///
/// Produced by a region resolver and borrowed read-only by every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Human-readable region label, used in error context
    pub name: String,
    pub crs: String,
    shape: MultiPolygon<f64>,
}

impl Geometry {
    pub fn new(name: impl Into<String>, polygons: Vec<Polygon>, crs: impl Into<String>) -> SatResult<Self> {
        let name = name.into();
        if polygons.is_empty() {
            return Err(PipelineError::Validation {
                context: format!("region '{}'", name),
                reason: "geometry has no polygons".to_string(),
            });
        }
        if polygons.iter().any(|p| !p.is_valid()) {
            return Err(PipelineError::Validation {
                context: format!("region '{}'", name),
                reason: "polygon ring with fewer than 3 vertices".to_string(),
            });
        }
        let shape = MultiPolygon::new(polygons.iter().map(Polygon::to_geo).collect());
        Ok(Self { name, crs: crs.into(), shape })
    }

    /// Rectangular region covering a bounding box
    pub fn rectangle(name: impl Into<String>, bbox: BoundingBox, crs: impl Into<String>) -> SatResult<Self> {
        Self::new(name, vec![Polygon::rectangle(&bbox)], crs)
    }

    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    pub fn bbox(&self) -> BoundingBox {
        self.shape
            .bounding_rect()
            .map(BoundingBox::from)
            .unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.shape.contains(&Point::new(x, y))
    }

    /// True when a rectangle lies entirely inside the region
    pub fn covers(&self, cell: &BoundingBox) -> bool {
        self.shape.relate(&cell.to_rect().to_polygon()).is_contains()
    }

    pub fn is_geographic(&self) -> bool {
        is_geographic_crs(&self.crs)
    }

    /// Ground metres per CRS unit along (x, y), evaluated at the region centre
    ///
    /// Geographic regions use geodesic distances over a small step around the
    /// centre; projected regions use the unit of their EPSG definition.
    pub fn meters_per_unit(&self) -> (f64, f64) {
        if self.is_geographic() {
            const STEP_DEG: f64 = 0.01;
            let [lon, lat] = self.bbox().center();
            let origin = Point::new(lon, lat);
            let east = origin.geodesic_distance(&Point::new(lon + STEP_DEG, lat)) / STEP_DEG;
            let north = origin.geodesic_distance(&Point::new(lon, lat + STEP_DEG)) / STEP_DEG;
            (east, north)
        } else {
            let unit = projected_unit_meters(&self.crs).unwrap_or(1.0);
            (unit, unit)
        }
    }

    /// Ground area in square metres at the region's local scale
    pub fn area_m2(&self) -> f64 {
        let (mx, my) = self.meters_per_unit();
        self.shape.unsigned_area() * mx * my
    }

    /// Sample spacing in CRS units for a ground-sample distance in metres
    pub fn step_for_scale(&self, scale_m: f64) -> (f64, f64) {
        let (mx, my) = self.meters_per_unit();
        (scale_m / mx, scale_m / my)
    }
}

/// Closed acquisition date interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> SatResult<Self> {
        if start > end {
            return Err(PipelineError::Validation {
                context: format!("date range {}..={}", start, end),
                reason: "start date is after end date".to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` strings
    pub fn parse(start: &str, end: &str) -> SatResult<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| PipelineError::Config(format!("invalid date '{}': {}", s, e)))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Start date as `YYYYMMDD`, used in export names
    pub fn compact_start(&self) -> String {
        self.start.format("%Y%m%d").to_string()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// One raster band with its validity mask
///
/// Invalid cells keep their raw value but are never read by reducers.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub values: Grid,
    pub mask: ValidityGrid,
}

impl Band {
    pub fn new(values: Grid, mask: ValidityGrid) -> SatResult<Self> {
        if values.dim() != mask.dim() {
            return Err(PipelineError::Validation {
                context: "band".to_string(),
                reason: format!("mask shape {:?} does not match values {:?}", mask.dim(), values.dim()),
            });
        }
        Ok(Self { values, mask })
    }

    /// Every finite value is valid
    pub fn from_values(values: Grid) -> Self {
        let mask = values.mapv(|v| v.is_finite());
        Self { values, mask }
    }

    /// Cells equal to the native no-data sentinel are invalid
    pub fn with_nodata(values: Grid, nodata: PixelValue) -> Self {
        let mask = values.mapv(|v| v.is_finite() && v != nodata);
        Self { values, mask }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<PixelValue> {
        match self.mask.get((row, col)) {
            Some(true) => self.values.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Divide valid cells by a fixed divisor; no-data sentinels stay untouched
    pub fn rescaled(&self, divisor: PixelValue) -> Band {
        let mut values = self.values.clone();
        ndarray::Zip::from(&mut values).and(&self.mask).for_each(|v, &valid| {
            if valid {
                *v /= divisor;
            }
        });
        Band { values, mask: self.mask.clone() }
    }

    /// Intersect the validity mask with another congruent mask
    pub fn masked(&self, valid: &ValidityGrid) -> Band {
        let mask = ndarray::Zip::from(&self.mask).and(valid).map_collect(|&a, &b| a && b);
        Band { values: self.values.clone(), mask }
    }
}

/// Affine north-up grid placement (origin = top-left corner)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub crs: String,
}

impl GridTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64, crs: impl Into<String>) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height, crs: crs.into() }
    }

    /// Pixel-space to CRS affine (x = col, y = row, top-left corner origin)
    pub fn affine(&self) -> AffineTransform<f64> {
        AffineTransform::new(self.pixel_width, 0.0, self.origin_x, 0.0, -self.pixel_height, self.origin_y)
    }

    pub fn pixel_center(&self, row: usize, col: usize) -> Coord {
        let c = self.affine().apply(geo::Coord { x: col as f64 + 0.5, y: row as f64 + 0.5 });
        [c.x, c.y]
    }

    /// Pixel containing a point, if inside a grid of the given shape
    pub fn pixel_of(&self, x: f64, y: f64, dim: (usize, usize)) -> Option<(usize, usize)> {
        let pixel = self.affine().inverse()?.apply(geo::Coord { x, y });
        let (col, row) = (pixel.x.floor(), pixel.y.floor());
        if !(col >= 0.0 && row >= 0.0) {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        if row < dim.0 && col < dim.1 {
            Some((row, col))
        } else {
            None
        }
    }

    pub fn extent(&self, dim: (usize, usize)) -> BoundingBox {
        BoundingBox::new(
            self.origin_x,
            self.origin_y - dim.0 as f64 * self.pixel_height,
            self.origin_x + dim.1 as f64 * self.pixel_width,
            self.origin_y,
        )
    }

    /// Pixel window (row0, row1, col0, col1), half-open, covering a bbox
    pub fn window(&self, bbox: &BoundingBox, dim: (usize, usize)) -> Option<(usize, usize, usize, usize)> {
        let overlap = self.extent(dim).intersection(bbox)?;
        let col0 = ((overlap.min_x - self.origin_x) / self.pixel_width).floor().max(0.0) as usize;
        let col1 = (((overlap.max_x - self.origin_x) / self.pixel_width).ceil() as usize).min(dim.1);
        let row0 = ((self.origin_y - overlap.max_y) / self.pixel_height).floor().max(0.0) as usize;
        let row1 = (((self.origin_y - overlap.min_y) / self.pixel_height).ceil() as usize).min(dim.0);
        if row0 < row1 && col0 < col1 {
            Some((row0, row1, col0, col1))
        } else {
            None
        }
    }

    /// Transform of a sub-window starting at (row, col)
    pub fn shifted(&self, row: usize, col: usize) -> GridTransform {
        GridTransform {
            origin_x: self.origin_x + col as f64 * self.pixel_width,
            origin_y: self.origin_y - row as f64 * self.pixel_height,
            ..self.clone()
        }
    }

    pub fn aligned_with(&self, other: &GridTransform) -> bool {
        const EPS: f64 = 1e-9;
        self.crs == other.crs
            && (self.origin_x - other.origin_x).abs() < EPS
            && (self.origin_y - other.origin_y).abs() < EPS
            && (self.pixel_width - other.pixel_width).abs() < EPS
            && (self.pixel_height - other.pixel_height).abs() < EPS
    }
}

/// Multi-band raster on a single grid, tagged with acquisition metadata
#[derive(Debug, Clone, PartialEq)]
pub struct RasterLayer {
    pub id: String,
    pub acquired: Option<NaiveDate>,
    pub bands: BTreeMap<String, Band>,
    pub transform: GridTransform,
    /// Scalar metadata used by threshold filters (e.g. cloud percentage)
    pub properties: BTreeMap<String, f64>,
    /// String metadata used by equality filters
    pub tags: BTreeMap<String, String>,
    dim: (usize, usize),
}

impl RasterLayer {
    pub fn new(id: impl Into<String>, transform: GridTransform, bands: BTreeMap<String, Band>) -> SatResult<Self> {
        let id = id.into();
        let dim = match bands.values().next() {
            Some(band) => band.dim(),
            None => {
                return Err(PipelineError::Validation {
                    context: format!("layer '{}'", id),
                    reason: "layer has no bands".to_string(),
                })
            }
        };
        if let Some((name, band)) = bands.iter().find(|(_, b)| b.dim() != dim) {
            return Err(PipelineError::Validation {
                context: format!("layer '{}'", id),
                reason: format!("band '{}' shape {:?} differs from {:?}", name, band.dim(), dim),
            });
        }
        Ok(Self {
            id,
            acquired: None,
            bands,
            transform,
            properties: BTreeMap::new(),
            tags: BTreeMap::new(),
            dim,
        })
    }

    pub fn with_acquired(mut self, date: NaiveDate) -> Self {
        self.acquired = Some(date);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: f64) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn extent(&self) -> BoundingBox {
        self.transform.extent(self.dim)
    }

    pub fn band(&self, name: &str) -> SatResult<&Band> {
        self.bands.get(name).ok_or_else(|| PipelineError::NotFound {
            kind: "band",
            name: format!("{}/{}", self.id, name),
        })
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.keys().cloned().collect()
    }

    /// Same grid and metadata, new band set
    pub fn with_bands(&self, bands: BTreeMap<String, Band>) -> SatResult<RasterLayer> {
        let mut layer = RasterLayer::new(self.id.clone(), self.transform.clone(), bands)?;
        layer.acquired = self.acquired;
        layer.properties = self.properties.clone();
        layer.tags = self.tags.clone();
        Ok(layer)
    }
}

/// Time-ordered sequence of raster layers from one source collection
#[derive(Debug, Clone, PartialEq)]
pub struct RasterSeries {
    pub id: String,
    pub layers: Vec<RasterLayer>,
}

impl RasterSeries {
    pub fn new(id: impl Into<String>, layers: Vec<RasterLayer>) -> Self {
        Self { id: id.into(), layers }
    }

    /// A single image treated as a one-layer series
    pub fn single(layer: RasterLayer) -> Self {
        Self { id: layer.id.clone(), layers: vec![layer] }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RasterLayer> {
        self.layers.iter()
    }
}

/// Per-pixel validity derived from a layer's quality band
#[derive(Debug, Clone, PartialEq)]
pub struct QualityMask {
    pub valid: ValidityGrid,
    pub transform: GridTransform,
}

impl QualityMask {
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    pub fn is_aligned_with(&self, layer: &RasterLayer) -> bool {
        self.valid.dim() == layer.dim() && self.transform.aligned_with(&layer.transform)
    }
}

/// Vector feature geometry
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Point(Coord),
    MultiPoint(Vec<Coord>),
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
}

impl FeatureGeometry {
    pub fn to_geo(&self) -> geo::Geometry<f64> {
        match self {
            FeatureGeometry::Point([x, y]) => geo::Geometry::Point(Point::new(*x, *y)),
            FeatureGeometry::MultiPoint(points) => geo::Geometry::MultiPoint(
                points.iter().map(|[x, y]| Point::new(*x, *y)).collect(),
            ),
            FeatureGeometry::Polygon(polygon) => geo::Geometry::Polygon(polygon.to_geo()),
            FeatureGeometry::MultiPolygon(polygons) => {
                geo::Geometry::MultiPolygon(MultiPolygon::new(polygons.iter().map(Polygon::to_geo).collect()))
            }
        }
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.to_geo().bounding_rect().map(BoundingBox::from)
    }
}

/// Geometry plus attribute mapping
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<String>,
    pub geometry: FeatureGeometry,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Feature {
    pub fn new(geometry: FeatureGeometry) -> Self {
        Self { id: None, geometry, properties: serde_json::Map::new() }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Unordered feature set in one CRS
#[derive(Debug, Clone, PartialEq)]
pub struct VectorCollection {
    pub id: String,
    pub crs: String,
    pub features: Vec<Feature>,
}

impl VectorCollection {
    pub fn new(id: impl Into<String>, crs: impl Into<String>, features: Vec<Feature>) -> Self {
        Self { id: id.into(), crs: crs.into(), features }
    }

    pub fn size(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// First `n` features as a new collection
    pub fn limit(&self, n: usize) -> VectorCollection {
        VectorCollection {
            id: self.id.clone(),
            crs: self.crs.clone(),
            features: self.features.iter().take(n).cloned().collect(),
        }
    }
}

/// Error types for the compositing and export pipeline
///
/// Every variant is recoverable at the call site; messages carry the
/// identifying parameters (region, series, dates, job) that produced them.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{kind} not found: '{name}'")]
    NotFound { kind: &'static str, name: String },

    #[error("empty result: {0}")]
    EmptyResult(String),

    #[error("budget exceeded for {context}: {required} samples required, budget is {budget}")]
    BudgetExceeded { context: String, required: u64, budget: u64 },

    #[error("validation failed for {context}: {reason}")]
    Validation { context: String, reason: String },

    #[error("backend failure for {context}: {reason}")]
    BackendFailure { context: String, reason: String },

    #[error("timed out after {elapsed:?} waiting for {context}")]
    Timeout { context: String, elapsed: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TIFF encoding error: {0}")]
    Tiff(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Taxonomy errors never abort a whole run
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PipelineError::Config(_))
    }
}

/// Result type for pipeline operations
pub type SatResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square_km(side_km: f64) -> Geometry {
        Geometry::rectangle(
            "square",
            BoundingBox::new(0.0, 0.0, side_km * 1000.0, side_km * 1000.0),
            "EPSG:32643",
        )
        .unwrap()
    }

    #[test]
    fn test_polygon_contains_respects_holes() {
        let polygon = Polygon::with_holes(
            vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]],
            vec![vec![[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0]]],
        );
        assert!(polygon.contains(1.0, 1.0));
        assert!(!polygon.contains(5.0, 5.0));
        assert!(!polygon.contains(11.0, 5.0));
        assert_relative_eq!(polygon.area(), 96.0);
    }

    #[test]
    fn test_projected_area_and_step() {
        let geometry = square_km(10.0);
        assert_relative_eq!(geometry.area_m2(), 1.0e8);
        assert_eq!(geometry.step_for_scale(500.0), (500.0, 500.0));
    }

    #[test]
    fn test_geographic_step_shrinks_with_latitude() {
        let geometry = Geometry::rectangle("islamabad", BoundingBox::new(72.8, 33.5, 73.4, 33.8), "EPSG:4326").unwrap();
        let (sx, sy) = geometry.step_for_scale(500.0);
        assert!(sx > sy);
        // one degree of latitude is about 110.9 km at 33.65 N
        assert_relative_eq!(sy, 500.0 / 110_916.0, max_relative = 1e-3);
        assert_relative_eq!(sx, 500.0 / 92_760.0, max_relative = 1e-3);
    }

    #[test]
    fn test_crs_classification_from_registry() {
        assert!(is_geographic_crs("EPSG:4326"));
        assert!(is_geographic_crs("EPSG:4269"));
        assert!(is_geographic_crs("OGC:CRS84"));
        assert!(!is_geographic_crs("EPSG:32643"));
        assert!(!is_geographic_crs("LOCAL"));
        assert_eq!(epsg_code("epsg:32643"), Some(32643));
        assert_eq!(epsg_code("OGC:CRS84"), None);
    }

    #[test]
    fn test_pixel_lookup_round_trips_through_affine() {
        let transform = GridTransform::new(73.0, 33.7, 0.01, 0.01, "EPSG:4326");
        let [x, y] = transform.pixel_center(3, 7);
        assert_relative_eq!(x, 73.075, epsilon = 1e-12);
        assert_relative_eq!(y, 33.665, epsilon = 1e-12);
        assert_eq!(transform.pixel_of(x, y, (10, 10)), Some((3, 7)));
    }

    #[test]
    fn test_region_covers_whole_cells_only() {
        let region = Geometry::new(
            "ell",
            vec![Polygon::new(vec![[0.0, 0.0], [20.0, 0.0], [20.0, 10.0], [10.0, 10.0], [10.0, 20.0], [0.0, 20.0]])],
            "EPSG:32643",
        )
        .unwrap();
        assert!(region.covers(&BoundingBox::new(0.0, 0.0, 10.0, 10.0)));
        assert!(region.covers(&BoundingBox::new(1.0, 11.0, 9.0, 19.0)));
        assert!(!region.covers(&BoundingBox::new(11.0, 11.0, 19.0, 19.0)));
        // centre inside, corner outside
        assert!(region.contains(10.5, 9.5));
        assert!(!region.covers(&BoundingBox::new(9.0, 8.0, 12.0, 11.0)));
        assert_relative_eq!(region.area_m2(), 300.0);
    }

    #[test]
    fn test_geometry_requires_polygons() {
        assert!(matches!(
            Geometry::new("empty", vec![], "EPSG:4326"),
            Err(PipelineError::Validation { .. })
        ));
        let degenerate = Polygon::new(vec![[0.0, 0.0], [1.0, 1.0], [0.0, 0.0]]);
        assert!(Geometry::new("line", vec![degenerate], "EPSG:4326").is_err());
    }

    #[test]
    fn test_rescale_leaves_nodata_untouched() {
        let values = Array2::from_shape_vec((1, 3), vec![1000.0, 0.0, 2000.0]).unwrap();
        let band = Band::with_nodata(values, 0.0).rescaled(10000.0);
        assert_relative_eq!(band.values[[0, 0]], 0.1);
        assert_eq!(band.values[[0, 1]], 0.0);
        assert_eq!(band.get(0, 1), None);
        assert_relative_eq!(band.get(0, 2).unwrap(), 0.2);
    }

    #[test]
    fn test_grid_window_and_shift() {
        let transform = GridTransform::new(0.0, 100.0, 10.0, 10.0, "EPSG:32643");
        let window = transform.window(&BoundingBox::new(15.0, 45.0, 35.0, 85.0), (10, 10)).unwrap();
        assert_eq!(window, (1, 6, 1, 4));
        let shifted = transform.shifted(1, 1);
        assert_eq!(shifted.origin_x, 10.0);
        assert_eq!(shifted.origin_y, 90.0);
        assert_eq!(transform.pixel_of(15.0, 85.0, (10, 10)), Some((1, 1)));
        assert_eq!(transform.pixel_of(-1.0, 85.0, (10, 10)), None);
    }

    #[test]
    fn test_date_range_validation() {
        assert!(DateRange::parse("2025-12-31", "2025-04-01").is_err());
        let range = DateRange::parse("2025-04-01", "2025-12-31").unwrap();
        assert_eq!(range.compact_start(), "20250401");
        assert!(range.contains(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()));
    }
}
