use serde_json::Value;
use tracing::warn;

use crate::error::{DecodeError, json_kind};
use crate::geojson::{Feature, FeatureCollection};

/// Bring any supported payload shape into a [`FeatureCollection`].
///
/// Accepted shapes, checked in order:
/// - a FeatureCollection,
/// - a pagination envelope `{count, next, previous, results: [...]}`,
/// - a bare array of features,
/// - a single Feature.
///
/// `null` and unrecognised payloads mean "no data" and yield `Ok(None)`.
/// Inside a collection, features that cannot be read are skipped; a lone
/// Feature that cannot be read is an error.
pub fn normalize_geojson(input: Value) -> Result<Option<FeatureCollection>, DecodeError> {
    match shape_of(&input) {
        Shape::Absent => Ok(None),
        Shape::Collection => Ok(Some(lenient_collection(take_array(input, "features")))),
        Shape::Envelope => Ok(Some(lenient_collection(take_array(input, "results")))),
        Shape::List => match input {
            Value::Array(items) => Ok(Some(lenient_collection(items))),
            _ => Ok(None),
        },
        Shape::Single => {
            let feature: Feature = serde_json::from_value(input)?;
            Ok(Some(FeatureCollection::new(vec![feature])))
        }
        Shape::Unknown => {
            warn!(found = json_kind(&input), "payload is not feature data, treating as empty");
            Ok(None)
        }
    }
}

fn take_array(input: Value, key: &str) -> Vec<Value> {
    match input {
        Value::Object(mut object) => match object.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn lenient_collection(items: Vec<Value>) -> FeatureCollection {
    let total = items.len();
    let features: Vec<Feature> = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<Feature>(item) {
            Ok(feature) => Some(feature),
            Err(e) => {
                warn!(index, error = %e, "skipping unreadable feature");
                None
            }
        })
        .collect();
    if features.len() < total {
        warn!(kept = features.len(), total, "some features were skipped");
    }
    FeatureCollection::new(features)
}

enum Shape {
    Absent,
    Collection,
    Envelope,
    List,
    Single,
    Unknown,
}

fn shape_of(input: &Value) -> Shape {
    let type_name = input.get("type").and_then(Value::as_str);
    if input.is_null() {
        Shape::Absent
    } else if type_name == Some("FeatureCollection")
        && input.get("features").is_some_and(Value::is_array)
    {
        Shape::Collection
    } else if input.get("results").is_some_and(Value::is_array) {
        Shape::Envelope
    } else if input.is_array() {
        Shape::List
    } else if type_name == Some("Feature") {
        Shape::Single
    } else {
        Shape::Unknown
    }
}

/// The `next` link of a pagination envelope, if there is another page.
pub fn pagination_next(payload: &Value) -> Option<&str> {
    payload
        .get("results")
        .filter(|results| results.is_array())
        .and_then(|_| payload.get("next"))
        .and_then(Value::as_str)
        .filter(|next| !next.is_empty())
}
