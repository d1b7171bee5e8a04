use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::colors::Rgba;
use crate::error::DecodeError;
use crate::geojson::Geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
}

impl GeometryKind {
    /// Whether `geometry` (single or multi part) belongs to this kind.
    pub fn accepts(self, geometry: &Geometry) -> bool {
        matches!(
            (self, geometry),
            (Self::Point, Geometry::Point(_) | Geometry::MultiPoint(_))
                | (
                    Self::Line,
                    Geometry::LineString(_) | Geometry::MultiLineString(_)
                )
                | (Self::Polygon, Geometry::Polygon(_) | Geometry::MultiPolygon(_))
        )
    }
}

/// Where a layer's features come from: a static file read as-is, or a
/// collection of the remote feature store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceDescriptor {
    Static(String),
    Dynamic(String),
}

impl FromStr for SourceDescriptor {
    type Err = DecodeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || DecodeError::SourceDescriptor(input.to_string());
        let (scheme, target) = input.split_once(':').ok_or_else(invalid)?;
        let target = target.trim();
        if target.is_empty() {
            return Err(invalid());
        }
        match scheme.trim() {
            "static" => Ok(Self::Static(target.to_string())),
            "dynamic" => Ok(Self::Dynamic(target.trim_matches('/').to_string())),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(path) => write!(f, "static:{path}"),
            Self::Dynamic(key) => write!(f, "dynamic:{key}"),
        }
    }
}

impl TryFrom<String> for SourceDescriptor {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceDescriptor> for String {
    fn from(source: SourceDescriptor) -> Self {
        source.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    #[serde(default)]
    pub stroke: Option<Rgba>,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
    #[serde(default)]
    pub fill: Option<Rgba>,
    /// Circle radius in pixels for point geometries.
    #[serde(default)]
    pub point_radius: Option<f64>,
}

fn default_stroke_width() -> f64 {
    2.0
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            stroke: None,
            stroke_width: default_stroke_width(),
            fill: None,
            point_radius: None,
        }
    }
}

/// One-time viewport fit applied the first time a layer is built while visible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitPolicy {
    pub max_zoom: f64,
    pub duration_ms: f64,
    /// Screen padding in pixels: top, right, bottom, left.
    #[serde(default = "default_fit_padding")]
    pub padding: [f64; 4],
}

pub const DEFAULT_FIT_PADDING_PX: f64 = 50.0;

fn default_fit_padding() -> [f64; 4] {
    [DEFAULT_FIT_PADDING_PX; 4]
}

impl FitPolicy {
    pub fn new(max_zoom: f64, duration_ms: f64) -> Self {
        Self {
            max_zoom,
            duration_ms,
            padding: default_fit_padding(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub id: String,
    pub name: String,
    pub kind: GeometryKind,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub style: LayerStyle,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub fit: Option<FitPolicy>,
    /// An optional source that fails to load is treated as empty instead of reported.
    #[serde(default)]
    pub optional: bool,
    /// Features of this layer may be drawn, modified and deleted.
    #[serde(default)]
    pub editable: bool,
}

fn default_visible() -> bool {
    true
}
