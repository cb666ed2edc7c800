use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::types::{Coord, Feature, FeatureGeometry, PipelineError, Polygon, SatResult, VectorCollection};

/// The only CRS GeoJSON carries
pub const GEOJSON_CRS: &str = "EPSG:4326";

/// A GeoJSON FeatureCollection document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoJsonFeatureCollection {
    #[serde(rename = "type")]
    pub type_: String,
    pub features: Vec<GeoJsonFeature>,
}

/// A GeoJSON Feature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoJsonFeature {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: GeoJsonGeometry,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

/// Supported GeoJSON geometry objects
///
/// Positions are kept as plain number arrays so that 3D coordinates parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Point { coordinates: Vec<f64> },
    MultiPoint { coordinates: Vec<Vec<f64>> },
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

fn position(p: &[f64]) -> SatResult<Coord> {
    match p {
        [x, y, ..] => Ok([*x, *y]),
        _ => Err(PipelineError::Validation {
            context: "GeoJSON position".to_string(),
            reason: format!("expected at least 2 numbers, got {}", p.len()),
        }),
    }
}

fn ring(r: &[Vec<f64>]) -> SatResult<Vec<Coord>> {
    r.iter().map(|p| position(p)).collect()
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> SatResult<Polygon> {
    let (exterior, holes) = rings.split_first().ok_or_else(|| PipelineError::Validation {
        context: "GeoJSON polygon".to_string(),
        reason: "polygon has no rings".to_string(),
    })?;
    Ok(Polygon::with_holes(ring(exterior)?, holes.iter().map(|h| ring(h)).collect::<SatResult<_>>()?))
}

fn to_ring(r: &[Coord]) -> Vec<Vec<f64>> {
    let mut out: Vec<Vec<f64>> = r.iter().map(|c| c.to_vec()).collect();
    // GeoJSON rings are explicitly closed
    if let (Some(first), Some(last)) = (r.first(), r.last()) {
        if first != last {
            out.push(first.to_vec());
        }
    }
    out
}

fn to_rings(p: &Polygon) -> Vec<Vec<Vec<f64>>> {
    std::iter::once(&p.exterior).chain(p.holes.iter()).map(|r| to_ring(r)).collect()
}

impl GeoJsonGeometry {
    pub fn to_geometry(&self) -> SatResult<FeatureGeometry> {
        Ok(match self {
            GeoJsonGeometry::Point { coordinates } => FeatureGeometry::Point(position(coordinates)?),
            GeoJsonGeometry::MultiPoint { coordinates } => FeatureGeometry::MultiPoint(ring(coordinates)?),
            GeoJsonGeometry::Polygon { coordinates } => FeatureGeometry::Polygon(polygon(coordinates)?),
            GeoJsonGeometry::MultiPolygon { coordinates } => FeatureGeometry::MultiPolygon(
                coordinates.iter().map(|p| polygon(p)).collect::<SatResult<_>>()?,
            ),
        })
    }

    pub fn from_geometry(geometry: &FeatureGeometry) -> Self {
        match geometry {
            FeatureGeometry::Point(p) => GeoJsonGeometry::Point { coordinates: p.to_vec() },
            FeatureGeometry::MultiPoint(points) => GeoJsonGeometry::MultiPoint {
                coordinates: points.iter().map(|p| p.to_vec()).collect(),
            },
            FeatureGeometry::Polygon(p) => GeoJsonGeometry::Polygon { coordinates: to_rings(p) },
            FeatureGeometry::MultiPolygon(polygons) => GeoJsonGeometry::MultiPolygon {
                coordinates: polygons.iter().map(to_rings).collect(),
            },
        }
    }
}

impl GeoJsonFeatureCollection {
    pub fn from_collection(collection: &VectorCollection) -> Self {
        let features = collection
            .features
            .iter()
            .map(|f| GeoJsonFeature {
                type_: "Feature".to_string(),
                id: f.id.clone().map(Value::String),
                geometry: GeoJsonGeometry::from_geometry(&f.geometry),
                properties: Some(f.properties.clone()),
            })
            .collect();
        Self { type_: "FeatureCollection".to_string(), features }
    }

    pub fn into_collection(self, id: impl Into<String>) -> SatResult<VectorCollection> {
        if self.type_ != "FeatureCollection" {
            return Err(PipelineError::Validation {
                context: "GeoJSON document".to_string(),
                reason: format!("expected FeatureCollection, got {}", self.type_),
            });
        }
        let features = self
            .features
            .into_iter()
            .map(|f| {
                Ok(Feature {
                    id: f.id.map(|v| match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    }),
                    geometry: f.geometry.to_geometry()?,
                    properties: f.properties.unwrap_or_default(),
                })
            })
            .collect::<SatResult<Vec<_>>>()?;
        Ok(VectorCollection::new(id, GEOJSON_CRS, features))
    }
}

/// Parse a FeatureCollection document
pub fn parse_collection(id: impl Into<String>, json: &str) -> SatResult<VectorCollection> {
    let document: GeoJsonFeatureCollection = serde_json::from_str(json)?;
    document.into_collection(id)
}

/// Read a FeatureCollection file; the collection id is the file stem
pub fn read_collection<P: AsRef<Path>>(path: P) -> SatResult<VectorCollection> {
    let path = path.as_ref();
    log::info!("Reading GeoJSON: {}", path.display());
    let json = std::fs::read_to_string(path)?;
    let id = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    parse_collection(id, &json)
}

/// Serialize a collection; only EPSG:4326 collections are valid GeoJSON
pub fn to_string(collection: &VectorCollection) -> SatResult<String> {
    if collection.crs != GEOJSON_CRS {
        return Err(PipelineError::Validation {
            context: format!("GeoJSON encoding of '{}'", collection.id),
            reason: format!("GeoJSON requires {}, collection is {}", GEOJSON_CRS, collection.crs),
        });
    }
    Ok(serde_json::to_string(&GeoJsonFeatureCollection::from_collection(collection))?)
}
