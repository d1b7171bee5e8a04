//! In-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use carte_shared::{
    Feature, FeatureId, GeometryKind, LayerDefinition, LayerStyle, SourceDescriptor,
};
use serde_json::{Value, json};

use crate::assets::AssetSource;
use crate::error::{LoadError, SyncError, SyncOperation};
use crate::notify::{Notification, Notifier};
use crate::store::{FeatureStore, PageRequest, StoreFuture};

pub fn point_feature(id: i64, lon: f64, lat: f64) -> Value {
    json!({
        "type": "Feature",
        "id": id,
        "geometry": {"type": "Point", "coordinates": [lon, lat]},
        "properties": {"nom": format!("feature {id}"), "adresse": null}
    })
}

/// Axis-aligned square polygon centred on (lon, lat).
pub fn square_feature(id: i64, lon: f64, lat: f64, half: f64) -> Value {
    json!({
        "type": "Feature",
        "id": id,
        "geometry": {"type": "Polygon", "coordinates": [[
            [lon - half, lat - half],
            [lon + half, lat - half],
            [lon + half, lat + half],
            [lon - half, lat + half],
            [lon - half, lat - half]
        ]]},
        "properties": {"nom": format!("zone {id}")}
    })
}

pub fn feature_collection(features: Vec<Value>) -> Value {
    json!({"type": "FeatureCollection", "features": features})
}

pub fn static_def(id: &str, path: &str) -> LayerDefinition {
    LayerDefinition {
        id: id.into(),
        name: format!("{id} layer"),
        kind: GeometryKind::Polygon,
        source: SourceDescriptor::Static(path.into()),
        style: LayerStyle::default(),
        visible: true,
        fit: None,
        optional: false,
        editable: false,
    }
}

pub fn dynamic_def(id: &str) -> LayerDefinition {
    LayerDefinition {
        id: id.into(),
        name: format!("{id} layer"),
        kind: GeometryKind::Point,
        source: SourceDescriptor::Dynamic(id.into()),
        style: LayerStyle::default(),
        visible: true,
        fit: None,
        optional: false,
        editable: true,
    }
}

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<String, Vec<Value>>,
    next_id: i64,
    failing_lists: HashSet<String>,
    hold_lists: bool,
    list_delay: Option<Duration>,
    fail_create: bool,
    fail_update: bool,
    fail_delete: bool,
    list_requests: usize,
    updates: Vec<(FeatureId, Feature)>,
    deletes: Vec<FeatureId>,
}

/// Feature store over in-memory collections. Every call resolves immediately
/// unless lists are held.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        let mut state = self.state.lock().expect("store state lock");
        f(&mut state)
    }

    pub fn seed(&self, collection: &str, feature: Value) {
        self.with_state(|s| {
            s.collections
                .entry(collection.to_string())
                .or_default()
                .push(feature)
        });
    }

    pub fn fail_list(&self, collection: &str) {
        self.with_state(|s| s.failing_lists.insert(collection.to_string()));
    }

    /// List requests never complete.
    pub fn hold_lists(&self) {
        self.with_state(|s| s.hold_lists = true);
    }

    /// List requests answer after `delay`; `list_requests` counts only answered ones.
    pub fn delay_lists(&self, delay: Duration) {
        self.with_state(|s| s.list_delay = Some(delay));
    }

    pub fn fail_create(&self, fail: bool) {
        self.with_state(|s| s.fail_create = fail);
    }

    pub fn fail_update(&self, fail: bool) {
        self.with_state(|s| s.fail_update = fail);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.with_state(|s| s.fail_delete = fail);
    }

    pub fn list_requests(&self) -> usize {
        self.with_state(|s| s.list_requests)
    }

    pub fn updates(&self) -> Vec<(FeatureId, Feature)> {
        self.with_state(|s| s.updates.clone())
    }

    pub fn deletes(&self) -> Vec<FeatureId> {
        self.with_state(|s| s.deletes.clone())
    }

    pub fn len(&self, collection: &str) -> usize {
        self.with_state(|s| s.collections.get(collection).map_or(0, Vec::len))
    }

    fn rejected(operation: SyncOperation, collection: &str) -> SyncError {
        SyncError::Rejected {
            operation,
            url: format!("memory://{collection}"),
            status: 500,
        }
    }

    fn list_now(&self, collection: &str, page: &PageRequest) -> Result<Value, LoadError> {
        self.with_state(|s| {
            s.list_requests += 1;
            if s.failing_lists.contains(collection) {
                return Err(LoadError::Unreachable {
                    url: format!("memory://{collection}"),
                    reason: "connection refused".into(),
                });
            }
            let features = s.collections.get(collection).cloned().unwrap_or_default();
            let Some(size) = page.page_size else {
                return Ok(feature_collection(features));
            };
            let number: usize = page
                .next
                .as_deref()
                .and_then(|next| next.strip_prefix("page="))
                .and_then(|n| n.parse().ok())
                .unwrap_or(1);
            let start = (number - 1) * size;
            let results: Vec<Value> = features.iter().skip(start).take(size).cloned().collect();
            let next = (start + size < features.len()).then(|| format!("page={}", number + 1));
            Ok(json!({
                "count": features.len(),
                "next": next,
                "previous": null,
                "results": results
            }))
        })
    }

    fn create_now(&self, collection: &str, feature: Feature) -> Result<Feature, SyncError> {
        self.with_state(|s| {
            if s.fail_create {
                return Err(Self::rejected(SyncOperation::Create, collection));
            }
            s.next_id += 1;
            let mut created = feature;
            created.id = Some(FeatureId::Number(1000 + s.next_id));
            created
                .properties
                .insert("statut".into(), Value::String("enregistré".into()));
            let stored = serde_json::to_value(&created).expect("serialize created feature");
            s.collections
                .entry(collection.to_string())
                .or_default()
                .push(stored);
            Ok(created)
        })
    }

    fn update_now(
        &self,
        collection: &str,
        id: &FeatureId,
        feature: Feature,
    ) -> Result<Option<Feature>, SyncError> {
        self.with_state(|s| {
            s.updates.push((id.clone(), feature.clone()));
            if s.fail_update {
                return Err(Self::rejected(SyncOperation::Update, collection));
            }
            let mut canonical = feature;
            canonical.id = Some(id.clone());
            Ok(Some(canonical))
        })
    }

    fn delete_now(&self, collection: &str, id: &FeatureId) -> Result<(), SyncError> {
        self.with_state(|s| {
            s.deletes.push(id.clone());
            if s.fail_delete {
                return Err(Self::rejected(SyncOperation::Delete, collection));
            }
            if let Some(features) = s.collections.get_mut(collection) {
                let wanted = serde_json::to_value(id).expect("serialize id");
                features.retain(|f| f.get("id") != Some(&wanted));
            }
            Ok(())
        })
    }
}

impl FeatureStore for MemoryStore {
    fn list<'a>(
        &'a self,
        collection: &'a str,
        page: &'a PageRequest,
    ) -> StoreFuture<'a, Value, LoadError> {
        if self.with_state(|s| s.hold_lists) {
            return Box::pin(std::future::pending());
        }
        if let Some(delay) = self.with_state(|s| s.list_delay) {
            return Box::pin(async move {
                tokio::time::sleep(delay).await;
                self.list_now(collection, page)
            });
        }
        Box::pin(std::future::ready(self.list_now(collection, page)))
    }

    fn create<'a>(
        &'a self,
        collection: &'a str,
        feature: Feature,
    ) -> StoreFuture<'a, Feature, SyncError> {
        Box::pin(std::future::ready(self.create_now(collection, feature)))
    }

    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a FeatureId,
        feature: Feature,
    ) -> StoreFuture<'a, Option<Feature>, SyncError> {
        Box::pin(std::future::ready(self.update_now(collection, id, feature)))
    }

    fn delete<'a>(
        &'a self,
        collection: &'a str,
        id: &'a FeatureId,
    ) -> StoreFuture<'a, (), SyncError> {
        Box::pin(std::future::ready(self.delete_now(collection, id)))
    }
}

/// Static assets keyed by path; unknown paths answer 404.
#[derive(Debug, Default)]
pub struct MemoryAssets {
    files: Mutex<HashMap<String, Value>>,
}

impl MemoryAssets {
    pub fn insert(&self, path: &str, value: Value) {
        self.files
            .lock()
            .expect("assets lock")
            .insert(path.to_string(), value);
    }
}

impl AssetSource for MemoryAssets {
    fn read<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Value, LoadError> {
        let found = self.files.lock().expect("assets lock").get(path).cloned();
        let result = found.ok_or_else(|| LoadError::Status {
            url: format!("memory://{path}"),
            status: 404,
        });
        Box::pin(std::future::ready(result))
    }
}

/// Keeps every notification for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().expect("notifier lock").clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notifications()
            .into_iter()
            .map(|n| n.message)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().expect("notifier lock").push(notification);
    }
}
