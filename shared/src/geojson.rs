use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{DecodeError, json_kind};
use crate::extent::Extent;

/// Feature attributes, keyed by property name.
pub type PropertyMap = Map<String, Value>;

/// A coordinate pair. Extra ordinates (altitude, measure) are dropped on read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "[f64; 2]")]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl TryFrom<Vec<f64>> for Position {
    type Error = DecodeError;

    fn try_from(ordinates: Vec<f64>) -> Result<Self, Self::Error> {
        match ordinates.as_slice() {
            [x, y, ..] => Ok(Self::new(*x, *y)),
            _ => Err(DecodeError::Position {
                len: ordinates.len(),
            }),
        }
    }
}

impl From<Position> for [f64; 2] {
    fn from(p: Position) -> Self {
        [p.x, p.y]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    /// Exterior ring first, then holes.
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Point(_) => "Point",
            Self::MultiPoint(_) => "MultiPoint",
            Self::LineString(_) => "LineString",
            Self::MultiLineString(_) => "MultiLineString",
            Self::Polygon(_) => "Polygon",
            Self::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Apply `f` to every position, preserving structure.
    pub fn map_positions(&self, mut f: impl FnMut(Position) -> Position) -> Self {
        fn ring(points: &[Position], f: &mut impl FnMut(Position) -> Position) -> Vec<Position> {
            points.iter().map(|p| f(*p)).collect()
        }

        match self {
            Self::Point(p) => Self::Point(f(*p)),
            Self::MultiPoint(points) => Self::MultiPoint(ring(points, &mut f)),
            Self::LineString(points) => Self::LineString(ring(points, &mut f)),
            Self::MultiLineString(lines) => {
                Self::MultiLineString(lines.iter().map(|l| ring(l, &mut f)).collect())
            }
            Self::Polygon(rings) => Self::Polygon(rings.iter().map(|r| ring(r, &mut f)).collect()),
            Self::MultiPolygon(polygons) => Self::MultiPolygon(
                polygons
                    .iter()
                    .map(|rings| rings.iter().map(|r| ring(r, &mut f)).collect())
                    .collect(),
            ),
        }
    }

    pub fn for_each_position(&self, mut f: impl FnMut(Position)) {
        match self {
            Self::Point(p) => f(*p),
            Self::MultiPoint(points) | Self::LineString(points) => points.iter().copied().for_each(f),
            Self::MultiLineString(rings) | Self::Polygon(rings) => {
                rings.iter().flatten().copied().for_each(f)
            }
            Self::MultiPolygon(polygons) => polygons.iter().flatten().flatten().copied().for_each(f),
        }
    }

    pub fn extent(&self) -> Extent {
        let mut extent = Extent::EMPTY;
        self.for_each_position(|p| extent.extend(p));
        extent
    }
}

/// Identifier assigned by the remote store. Stores hand out either integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureId {
    Number(i64),
    Text(String),
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FeatureId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FeatureId>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default, deserialize_with = "properties_or_empty")]
    pub properties: PropertyMap,
}

fn properties_or_empty<'de, D>(deserializer: D) -> Result<PropertyMap, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<PropertyMap>::deserialize(deserializer)?.unwrap_or_default())
}

impl Feature {
    pub fn new(geometry: Geometry, properties: PropertyMap) -> Self {
        Self {
            id: None,
            geometry: Some(geometry),
            properties,
        }
    }

    /// Read a store's answer to a create or update request.
    ///
    /// Stores answer with either a GeoJSON Feature or a flat record whose
    /// top-level keys are the properties (plus `id` and possibly `geometry`).
    pub fn from_store_response(value: Value) -> Result<Self, DecodeError> {
        if value.get("type").and_then(Value::as_str) == Some("Feature") {
            return Ok(serde_json::from_value(value)?);
        }

        let mut record = match value {
            Value::Object(record) => record,
            other => {
                return Err(DecodeError::Unrecognized {
                    found: json_kind(&other),
                });
            }
        };

        let id = record
            .remove("id")
            .filter(|v| !v.is_null())
            .map(serde_json::from_value)
            .transpose()?;
        let geometry = record
            .remove("geometry")
            .filter(|v| !v.is_null())
            .map(serde_json::from_value)
            .transpose()?;
        let properties = match record.remove("properties") {
            Some(Value::Object(properties)) => properties,
            _ => record,
        };

        Ok(Self {
            id,
            geometry,
            properties,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn extent(&self) -> Extent {
        let mut extent = Extent::EMPTY;
        for geometry in self.features.iter().filter_map(|f| f.geometry.as_ref()) {
            extent.merge(&geometry.extent());
        }
        extent
    }
}
