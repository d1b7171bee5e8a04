use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use carte_shared::{Feature, FeatureCollection, FeatureId};
use dashmap::DashMap;

use crate::config;

/// Features of one collection, keyed and ordered by id.
pub type Collection = BTreeMap<i64, Feature>;

#[derive(Clone)]
pub struct AppState {
    pub collections: Arc<DashMap<String, Collection>>,
    pub next_id: Arc<AtomicI64>,
    pub static_dir: PathBuf,
    pub max_page_size: usize,
}

impl AppState {
    pub fn new<I, S>(collections: I, static_dir: PathBuf, max_page_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let map = DashMap::new();
        for name in collections {
            map.insert(name.into(), Collection::new());
        }
        Self {
            collections: Arc::new(map),
            next_id: Arc::new(AtomicI64::new(0)),
            static_dir,
            max_page_size: max_page_size.max(1),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            config::collections(),
            config::static_dir(),
            config::max_page_size(),
        )
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Keep future ids above one that was handed in from outside.
    fn reserve_id(&self, id: i64) {
        self.next_id.fetch_max(id, Ordering::Relaxed);
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    pub fn list(&self, name: &str) -> Option<Vec<Feature>> {
        self.collections
            .get(name)
            .map(|collection| collection.values().cloned().collect())
    }

    /// Store `feature` under a fresh id and return it as stored.
    pub fn insert(&self, name: &str, mut feature: Feature) -> Option<Feature> {
        let mut collection = self.collections.get_mut(name)?;
        let id = self.allocate_id();
        feature.id = Some(FeatureId::Number(id));
        collection.insert(id, feature.clone());
        Some(feature)
    }

    pub fn get(&self, name: &str, id: i64) -> Option<Feature> {
        self.collections.get(name)?.get(&id).cloned()
    }

    /// Merge a partial feature: geometry replaces, properties are merged key by key.
    pub fn patch(&self, name: &str, id: i64, patch: Feature) -> Option<Feature> {
        let mut collection = self.collections.get_mut(name)?;
        let stored = collection.get_mut(&id)?;
        if let Some(geometry) = patch.geometry {
            stored.geometry = Some(geometry);
        }
        for (key, value) in patch.properties {
            stored.properties.insert(key, value);
        }
        Some(stored.clone())
    }

    pub fn remove(&self, name: &str, id: i64) -> Option<Feature> {
        self.collections.get_mut(name)?.remove(&id)
    }

    /// Load initial features. Numeric ids are kept; anything else gets a fresh id.
    pub fn seed(&self, name: &str, features: FeatureCollection) -> usize {
        let Some(mut collection) = self.collections.get_mut(name) else {
            return 0;
        };
        let mut loaded = 0;
        for mut feature in features.features {
            let id = match feature.id {
                Some(FeatureId::Number(id)) if !collection.contains_key(&id) => {
                    self.reserve_id(id);
                    id
                }
                _ => self.allocate_id(),
            };
            feature.id = Some(FeatureId::Number(id));
            collection.insert(id, feature);
            loaded += 1;
        }
        loaded
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.collections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use carte_shared::{Geometry, Position, PropertyMap};
    use serde_json::json;

    use super::*;

    fn state() -> AppState {
        AppState::new(["hopitaux"], PathBuf::from("public"), 100)
    }

    fn point(id: Option<FeatureId>) -> Feature {
        Feature {
            id,
            geometry: Some(Geometry::Point(Position::new(-17.4, 14.7))),
            properties: PropertyMap::new(),
        }
    }

    #[test]
    fn ids_are_sequential_after_seeded_ones() {
        let state = state();
        let seeded = state.seed(
            "hopitaux",
            FeatureCollection::new(vec![point(Some(FeatureId::Number(7))), point(None)]),
        );
        assert_eq!(seeded, 2);
        let created = state.insert("hopitaux", point(None)).expect("known collection");
        assert_eq!(created.id, Some(FeatureId::Number(9)));
        assert_eq!(state.list("hopitaux").map(|f| f.len()), Some(3));
    }

    #[test]
    fn patch_merges_properties() {
        let state = state();
        let mut feature = point(None);
        feature.properties = json!({"nom": "Fann", "lits": 40}).as_object().cloned().unwrap_or_default();
        let id = match state.insert("hopitaux", feature).and_then(|f| f.id) {
            Some(FeatureId::Number(id)) => id,
            other => panic!("unexpected id {other:?}"),
        };

        let patch = Feature {
            id: None,
            geometry: None,
            properties: json!({"nom": "Fann II"}).as_object().cloned().unwrap_or_default(),
        };
        let patched = state.patch("hopitaux", id, patch).expect("patched");
        assert_eq!(patched.properties["nom"], "Fann II");
        assert_eq!(patched.properties["lits"], 40);
        assert!(patched.geometry.is_some());
    }

    #[test]
    fn unknown_collection_is_rejected() {
        let state = state();
        assert!(state.insert("ecoles", point(None)).is_none());
        assert!(state.list("ecoles").is_none());
        assert_eq!(state.seed("ecoles", FeatureCollection::default()), 0);
        assert!(state.remove("hopitaux", 1).is_none());
    }
}
