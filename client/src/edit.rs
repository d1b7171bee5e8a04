use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use carte_shared::{Feature, FeatureId, Geometry, GeometryKind, LayerDefinition, PropertyMap, SourceDescriptor};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{EditError, SyncError};
use crate::layers::LayerManager;
use crate::notify::{Notification, Notifier};
use crate::record::{ADDRESS_KEY, FeatureRecord, LAYER_NAME_KEY, NAME_KEY, PendingState, RecordKey};
use crate::selection::SelectionController;
use crate::store::FeatureStore;
use crate::view::ViewEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditMode {
    #[default]
    Idle,
    Drawing,
    Modifying,
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Drawing => "drawing",
            Self::Modifying => "modifying",
        })
    }
}

/// View state a store answer is applied to.
pub struct EditContext<'a> {
    pub layers: &'a mut LayerManager,
    pub selection: &'a mut SelectionController,
    pub notifier: &'a dyn Notifier,
}

#[derive(Debug, Clone)]
struct BoundLayer {
    layer_id: String,
    name: String,
    collection: String,
    kind: GeometryKind,
}

/// Draw / modify / delete state machine for the one editable layer bound to
/// a view, and the optimistic sync of those edits with the feature store.
pub struct EditSession {
    mode: EditMode,
    bound: Option<BoundLayer>,
    store: Arc<dyn FeatureStore>,
    events: mpsc::UnboundedSender<ViewEvent>,
    default_name: String,
    in_flight: usize,
    deleting: HashSet<FeatureId>,
}

impl fmt::Debug for EditSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditSession")
            .field("mode", &self.mode)
            .field("bound", &self.bound.as_ref().map(|b| &b.layer_id))
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl EditSession {
    pub fn new(
        store: Arc<dyn FeatureStore>,
        events: mpsc::UnboundedSender<ViewEvent>,
        default_name: impl Into<String>,
    ) -> Self {
        Self {
            mode: EditMode::Idle,
            bound: None,
            store,
            events,
            default_name: default_name.into(),
            in_flight: 0,
            deleting: HashSet::new(),
        }
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn bound_layer(&self) -> Option<&str> {
        self.bound.as_ref().map(|b| b.layer_id.as_str())
    }

    /// Create/update/delete requests still awaiting an answer.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn bind(&mut self, def: &LayerDefinition) -> Result<(), EditError> {
        let SourceDescriptor::Dynamic(collection) = &def.source else {
            return Err(EditError::NotEditable(def.id.clone()));
        };
        if !def.editable {
            return Err(EditError::NotEditable(def.id.clone()));
        }
        if self.mode != EditMode::Idle && self.bound_layer() != Some(def.id.as_str()) {
            return Err(EditError::Busy(self.mode));
        }
        debug!(layer = %def.id, "editable layer bound");
        self.bound = Some(BoundLayer {
            layer_id: def.id.clone(),
            name: def.name.clone(),
            collection: collection.clone(),
            kind: def.kind,
        });
        Ok(())
    }

    pub fn unbind(&mut self) -> Result<(), EditError> {
        if self.mode != EditMode::Idle {
            return Err(EditError::Busy(self.mode));
        }
        self.bound = None;
        Ok(())
    }

    pub fn toggle_drawing(&mut self, layers: &LayerManager) -> Result<EditMode, EditError> {
        self.toggle(EditMode::Drawing, layers)
    }

    pub fn toggle_modifying(&mut self, layers: &LayerManager) -> Result<EditMode, EditError> {
        self.toggle(EditMode::Modifying, layers)
    }

    /// idle <-> `target`; switching straight between drawing and modifying is refused.
    fn toggle(&mut self, target: EditMode, layers: &LayerManager) -> Result<EditMode, EditError> {
        self.mode = match self.mode {
            current if current == target => EditMode::Idle,
            EditMode::Idle => {
                let bound = self.bound.as_ref().ok_or(EditError::NoEditableLayer)?;
                if layers.layer(&bound.layer_id).is_none() {
                    return Err(EditError::LayerNotLoaded(bound.layer_id.clone()));
                }
                target
            }
            current => {
                return Err(EditError::WrongMode {
                    expected: EditMode::Idle,
                    actual: current,
                });
            }
        };
        debug!(mode = %self.mode, "edit mode changed");
        Ok(self.mode)
    }

    fn require_mode(&self, expected: EditMode) -> Result<&BoundLayer, EditError> {
        if self.mode != expected {
            return Err(EditError::WrongMode {
                expected,
                actual: self.mode,
            });
        }
        self.bound.as_ref().ok_or(EditError::NoEditableLayer)
    }

    /// Insert a freshly drawn feature at once and ask the store to create it.
    /// `geometry` is planar.
    pub fn complete_draw(
        &mut self,
        geometry: Geometry,
        mut properties: PropertyMap,
        layers: &mut LayerManager,
    ) -> Result<RecordKey, EditError> {
        let bound = self.require_mode(EditMode::Drawing)?.clone();
        if !bound.kind.accepts(&geometry) {
            return Err(EditError::GeometryKind {
                layer: bound.layer_id,
                expected: format!("{:?}", bound.kind).to_lowercase(),
                actual: geometry.type_name(),
            });
        }
        let layer = layers
            .layer_mut(&bound.layer_id)
            .ok_or_else(|| EditError::LayerNotLoaded(bound.layer_id.clone()))?;

        if properties.get(NAME_KEY).is_none_or(Value::is_null) {
            properties.insert(NAME_KEY.into(), Value::String(self.default_name.clone()));
        }
        properties.entry(ADDRESS_KEY).or_insert(Value::Null);
        properties.insert(LAYER_NAME_KEY.into(), Value::String(bound.name.clone()));

        let record = FeatureRecord::drawn(geometry, properties, &bound.layer_id);
        let key = record.key;
        let submission = record.submission(&self.default_name);
        layer.insert(record);
        debug!(layer = %bound.layer_id, %key, "drawn feature inserted, create pending");

        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let layer_id = bound.layer_id.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = store.create(&bound.collection, submission).await;
            let _ = events.send(ViewEvent::CreateResolved {
                layer_id,
                key,
                result,
            });
        });
        Ok(key)
    }

    /// Apply geometry edits locally, then send one update per persisted record.
    /// Returns how many updates were sent. Geometries are planar.
    pub fn complete_modify(
        &mut self,
        edits: Vec<(RecordKey, Geometry)>,
        layers: &mut LayerManager,
    ) -> Result<usize, EditError> {
        let bound = self.require_mode(EditMode::Modifying)?.clone();
        let layer = layers
            .layer_mut(&bound.layer_id)
            .ok_or_else(|| EditError::LayerNotLoaded(bound.layer_id.clone()))?;

        for (key, geometry) in &edits {
            let Some(record) = layer.get(*key) else {
                return Err(EditError::UnknownRecord(key.to_string()));
            };
            // The create request already carries the drawn geometry
            if record.id.is_none() {
                return Err(EditError::SavePending(key.to_string()));
            }
            if !bound.kind.accepts(geometry) {
                return Err(EditError::GeometryKind {
                    layer: bound.layer_id.clone(),
                    expected: format!("{:?}", bound.kind).to_lowercase(),
                    actual: geometry.type_name(),
                });
            }
        }

        let mut sent = 0;
        for (key, geometry) in edits {
            layer.update_geometry(key, geometry);
            let Some(record) = layer.get_mut(key) else {
                continue;
            };
            let Some(id) = record.id.clone() else {
                continue;
            };
            record.revision += 1;
            record.pending = PendingState::Update;
            let revision = record.revision;
            let submission = record.submission(&self.default_name);

            let store = Arc::clone(&self.store);
            let events = self.events.clone();
            let layer_id = bound.layer_id.clone();
            let collection = bound.collection.clone();
            self.in_flight += 1;
            sent += 1;
            tokio::spawn(async move {
                let result = store.update(&collection, &id, submission).await;
                let _ = events.send(ViewEvent::UpdateResolved {
                    layer_id,
                    key,
                    revision,
                    result,
                });
            });
        }
        Ok(sent)
    }

    /// Ask the store to delete the selected feature. Local state changes only
    /// once the store confirms.
    pub fn delete_selected(&mut self, selection: &SelectionController) -> Result<FeatureId, EditError> {
        let bound = self.bound.clone().ok_or(EditError::NoEditableLayer)?;
        let selected = selection.current().ok_or(EditError::NoSelection)?;
        if selected.layer_id != bound.layer_id {
            return Err(EditError::SelectionOutsideLayer(bound.layer_id));
        }
        let id = selected.id.clone().ok_or(EditError::NotPersisted)?;
        if !self.deleting.insert(id.clone()) {
            return Err(EditError::DeleteInFlight(id.to_string()));
        }

        let key = selected.key;
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let request_id = id.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = store.delete(&bound.collection, &request_id).await;
            let _ = events.send(ViewEvent::DeleteResolved {
                layer_id: bound.layer_id,
                key,
                id: request_id,
                result,
            });
        });
        Ok(id)
    }

    fn settle_request(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    pub fn on_create_resolved(
        &mut self,
        layer_id: &str,
        key: RecordKey,
        result: Result<Feature, SyncError>,
        ctx: EditContext<'_>,
    ) {
        let EditContext {
            layers,
            selection,
            notifier,
        } = ctx;
        self.settle_request();
        let Some(layer) = layers.layer_mut(layer_id) else {
            warn!(layer = layer_id, %key, "create answered after the layer was replaced");
            return self.report_orphan(&result, notifier);
        };

        match result {
            Ok(created) => {
                let Some(record) = layer.get_mut(key) else {
                    warn!(layer = layer_id, %key, "create answered after the layer was replaced");
                    return;
                };
                record.id = created.id;
                record.reconcile(created.properties);
                record.pending = PendingState::None;
                info!(
                    layer = layer_id,
                    id = %record.id.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "feature created"
                );
                let name = layer.name.clone();
                if let Some(record) = layer.get(key) {
                    selection.sync_record(&name, record);
                }
            }
            Err(e) => {
                error!(layer = layer_id, %key, error = %e, "create failed, rolling back");
                layer.remove(key);
                selection.forget_record(key);
                notifier.notify(Notification::error("The new feature could not be saved", &e));
            }
        }
    }

    pub fn on_update_resolved(
        &mut self,
        layer_id: &str,
        key: RecordKey,
        revision: u64,
        result: Result<Option<Feature>, SyncError>,
        ctx: EditContext<'_>,
    ) {
        let EditContext {
            layers,
            selection,
            notifier,
        } = ctx;
        self.settle_request();
        let Some((name, record)) = layers
            .layer_mut(layer_id)
            .and_then(|layer| {
                let name = layer.name.clone();
                layer.get_mut(key).map(|record| (name, record))
            })
        else {
            warn!(layer = layer_id, %key, "update answered after the layer was replaced");
            return self.report_orphan(&result, notifier);
        };

        let id = record.id.as_ref().map(ToString::to_string).unwrap_or_default();
        if revision < record.revision {
            warn!(
                layer = layer_id,
                %id,
                revision,
                latest = record.revision,
                "stale update response ignored"
            );
            if let Err(e) = &result {
                error!(layer = layer_id, %id, error = %e, "superseded update failed");
                notifier.notify(Notification::error(format!("Update of feature {id} failed"), e));
            }
            return;
        }

        record.pending = PendingState::None;
        match result {
            Ok(canonical) => {
                if let Some(canonical) = canonical {
                    record.reconcile(canonical.properties);
                }
                info!(layer = layer_id, %id, revision, "feature updated");
                selection.sync_record(&name, record);
            }
            Err(e) => {
                error!(layer = layer_id, %id, error = %e, "update failed");
                warn!(layer = layer_id, %id, "local edit kept, store may differ");
                selection.sync_record(&name, record);
                notifier.notify(Notification::error(format!("Update of feature {id} failed"), &e));
            }
        }
    }

    pub fn on_delete_resolved(
        &mut self,
        layer_id: &str,
        key: RecordKey,
        id: FeatureId,
        result: Result<(), SyncError>,
        ctx: EditContext<'_>,
    ) {
        let EditContext {
            layers,
            selection,
            notifier,
        } = ctx;
        self.settle_request();
        self.deleting.remove(&id);
        match result {
            Ok(()) => {
                let removed = layers.layer_mut(layer_id).and_then(|layer| layer.remove(key));
                if removed.is_none() {
                    warn!(layer = layer_id, %id, "deleted feature was no longer loaded");
                }
                selection.forget_record(key);
                info!(layer = layer_id, %id, "feature deleted");
            }
            Err(e) => {
                error!(layer = layer_id, %id, error = %e, "delete failed");
                notifier.notify(Notification::error(format!("Feature {id} could not be deleted"), &e));
            }
        }
    }

    /// Answers for records a rebuild discarded are dropped, but failures still surface.
    fn report_orphan<T>(&self, result: &Result<T, SyncError>, notifier: &dyn Notifier) {
        if let Err(e) = result {
            error!(error = %e, "request for a discarded feature failed");
            notifier.notify(Notification::error(format!("{} failed", e.operation()), e));
        }
    }
}
