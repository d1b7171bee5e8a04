use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use carte_shared::projection::{geometry_to_lonlat, geometry_to_planar};
use carte_shared::{Feature, FeatureId, Geometry, PropertyMap};
use serde_json::Value;

/// Property carrying the display name of the layer a feature was loaded into.
pub const LAYER_NAME_KEY: &str = "layerName";
pub const NAME_KEY: &str = "nom";
pub const ADDRESS_KEY: &str = "adresse";

static NEXT_RECORD_KEY: AtomicU64 = AtomicU64::new(1);

/// Client-side handle of a record, stable for its whole local lifetime
/// whether or not the store has assigned it an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(u64);

impl RecordKey {
    pub(crate) fn next() -> Self {
        Self(NEXT_RECORD_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    None,
    Create,
    Update,
}

/// A feature as held by a render layer. Geometry is planar.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub key: RecordKey,
    pub id: Option<FeatureId>,
    pub geometry: Geometry,
    pub properties: PropertyMap,
    pub layer_id: String,
    pub pending: PendingState,
    /// Latest update revision issued for this record; 0 until the first update.
    pub revision: u64,
}

impl FeatureRecord {
    /// Materialise a loaded feature. Features without geometry have nothing to draw.
    pub fn from_feature(feature: Feature, layer_id: &str, layer_name: &str) -> Option<Self> {
        let geometry = geometry_to_planar(feature.geometry.as_ref()?);
        let mut properties = feature.properties;
        properties.insert(LAYER_NAME_KEY.into(), Value::String(layer_name.to_string()));
        Some(Self {
            key: RecordKey::next(),
            id: feature.id,
            geometry,
            properties,
            layer_id: layer_id.to_string(),
            pending: PendingState::None,
            revision: 0,
        })
    }

    /// A freshly drawn record, not yet known to the store.
    pub fn drawn(geometry: Geometry, properties: PropertyMap, layer_id: &str) -> Self {
        Self {
            key: RecordKey::next(),
            id: None,
            geometry,
            properties,
            layer_id: layer_id.to_string(),
            pending: PendingState::Create,
            revision: 0,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.properties.get(NAME_KEY).and_then(Value::as_str)
    }

    /// Wire form for create/update: lon/lat geometry, properties without the
    /// client-side layer tag, `nom` and `adresse` always present.
    pub fn submission(&self, default_name: &str) -> Feature {
        let mut properties = self.properties.clone();
        properties.remove(LAYER_NAME_KEY);
        if properties.get(NAME_KEY).is_none_or(Value::is_null) {
            properties.insert(NAME_KEY.into(), Value::String(default_name.to_string()));
        }
        properties.entry(ADDRESS_KEY).or_insert(Value::Null);
        Feature {
            id: None,
            geometry: Some(geometry_to_lonlat(&self.geometry)),
            properties,
        }
    }

    /// Adopt the store's canonical properties. Keys the store sent win; the layer tag stays.
    pub(crate) fn reconcile(&mut self, canonical: PropertyMap) {
        for (key, value) in canonical {
            if key != LAYER_NAME_KEY {
                self.properties.insert(key, value);
            }
        }
    }
}
