use std::collections::HashMap;
use std::sync::Arc;

use carte_shared::projection::{geometry_to_planar, lonlat_to_planar};
use carte_shared::{Feature, FeatureCollection, FeatureId, Geometry, Position, PropertyMap};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config;
use crate::edit::{EditContext, EditMode, EditSession};
use crate::error::{EditError, LoadError, RegistryError, SyncError};
use crate::layers::{LayerChange, LayerManager};
use crate::loader::{CancelSignal, DataLoader, LoadTicket};
use crate::notify::{Notification, Notifier};
use crate::record::RecordKey;
use crate::registry::LayerRegistry;
use crate::selection::{Selection, SelectionController, SelectionEvent};
use crate::viewport::{BaseMap, Viewport};

/// Completions delivered back to the view's thread.
#[derive(Debug)]
pub enum ViewEvent {
    LayerLoaded {
        layer_id: String,
        ticket: LoadTicket,
        outcome: Result<Option<FeatureCollection>, LoadError>,
    },
    CreateResolved {
        layer_id: String,
        key: RecordKey,
        result: Result<Feature, SyncError>,
    },
    UpdateResolved {
        layer_id: String,
        key: RecordKey,
        revision: u64,
        result: Result<Option<Feature>, SyncError>,
    },
    DeleteResolved {
        layer_id: String,
        key: RecordKey,
        id: FeatureId,
        result: Result<(), SyncError>,
    },
}

#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub canvas_width: f64,
    pub canvas_height: f64,
    pub hit_tolerance_px: f64,
    pub default_feature_name: String,
    pub selection_capacity: usize,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            canvas_width: config::DEFAULT_CANVAS_WIDTH,
            canvas_height: config::DEFAULT_CANVAS_HEIGHT,
            hit_tolerance_px: config::DEFAULT_HIT_TOLERANCE_PX,
            default_feature_name: config::DEFAULT_FEATURE_NAME.to_string(),
            selection_capacity: config::SELECTION_CHANNEL_CAPACITY,
        }
    }
}

impl ViewSettings {
    pub fn from_env() -> Self {
        Self {
            default_feature_name: config::default_feature_name(),
            ..Self::default()
        }
    }
}

/// One mounted map. Owns every piece of per-view state; all of it is mutated
/// only from the thread that drives `handle_event`.
pub struct MapView {
    loader: DataLoader,
    layers: LayerManager,
    selection: SelectionController,
    edit: EditSession,
    viewport: Viewport,
    notifier: Arc<dyn Notifier>,
    settings: ViewSettings,
    cancel: CancelSignal,
    events_tx: mpsc::UnboundedSender<ViewEvent>,
    events_rx: mpsc::UnboundedReceiver<ViewEvent>,
    pending_loads: HashMap<String, LoadTicket>,
    clock: Instant,
}

impl MapView {
    /// Build the view and start loading every layer concurrently.
    /// Must be called inside a tokio runtime.
    pub fn mount(
        registry: LayerRegistry,
        loader: DataLoader,
        notifier: Arc<dyn Notifier>,
        settings: ViewSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let edit = EditSession::new(
            loader.store(),
            events_tx.clone(),
            settings.default_feature_name.clone(),
        );
        let mut view = Self {
            loader,
            layers: LayerManager::new(registry),
            selection: SelectionController::new(settings.selection_capacity),
            edit,
            viewport: Viewport::new(settings.canvas_width, settings.canvas_height),
            notifier,
            settings,
            cancel: CancelSignal::new(),
            events_tx,
            events_rx,
            pending_loads: HashMap::new(),
            clock: Instant::now(),
        };
        view.reload_all();
        info!(layers = view.layers.registry().len(), "map view mounted");
        view
    }

    /// Milliseconds since mount.
    pub fn now(&self) -> f64 {
        self.clock.elapsed().as_secs_f64() * 1000.0
    }

    pub fn reload_all(&mut self) {
        let ids: Vec<String> = self.layers.registry().iter().map(|d| d.id.clone()).collect();
        for id in ids {
            // Ids come straight from the registry
            let _ = self.reload_layer(&id);
        }
    }

    pub fn reload_layer(&mut self, layer_id: &str) -> Result<LoadTicket, RegistryError> {
        let def = self
            .layers
            .registry()
            .get(layer_id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownLayer(layer_id.to_string()))?;
        let ticket = self.layers.issue_ticket(layer_id);
        self.pending_loads.insert(layer_id.to_string(), ticket);
        debug!(layer = layer_id, ?ticket, "load issued");
        self.loader
            .spawn(def, ticket, self.cancel.clone(), self.events_tx.clone());
        Ok(ticket)
    }

    /// Wait for the next completion. The view holds a sender, so this only
    /// returns `None` if the channel is closed from outside.
    pub async fn next_event(&mut self) -> Option<ViewEvent> {
        self.events_rx.recv().await
    }

    pub fn handle_event(&mut self, event: ViewEvent) {
        let ctx = EditContext {
            layers: &mut self.layers,
            selection: &mut self.selection,
            notifier: self.notifier.as_ref(),
        };
        match event {
            ViewEvent::CreateResolved {
                layer_id,
                key,
                result,
            } => self.edit.on_create_resolved(&layer_id, key, result, ctx),
            ViewEvent::UpdateResolved {
                layer_id,
                key,
                revision,
                result,
            } => self
                .edit
                .on_update_resolved(&layer_id, key, revision, result, ctx),
            ViewEvent::DeleteResolved {
                layer_id,
                key,
                id,
                result,
            } => self.edit.on_delete_resolved(&layer_id, key, id, result, ctx),
            ViewEvent::LayerLoaded {
                layer_id,
                ticket,
                outcome,
            } => self.on_layer_loaded(&layer_id, ticket, outcome),
        }
    }

    fn on_layer_loaded(
        &mut self,
        layer_id: &str,
        ticket: LoadTicket,
        outcome: Result<Option<FeatureCollection>, LoadError>,
    ) {
        if self.pending_loads.get(layer_id) == Some(&ticket) {
            self.pending_loads.remove(layer_id);
        }
        let now = self.now();
        let change = self
            .layers
            .apply_load(layer_id, ticket, outcome, &mut self.viewport, now);
        match change {
            LayerChange::Stale => {}
            LayerChange::Built { .. } | LayerChange::Cleared => {
                self.selection.forget_layer(layer_id);
            }
            LayerChange::Failed(e) => {
                self.selection.forget_layer(layer_id);
                let name = self
                    .layers
                    .registry()
                    .get(layer_id)
                    .map_or(layer_id, |def| def.name.as_str());
                self.notifier.notify(Notification::warning(
                    format!("Layer {name} could not be loaded"),
                    &e,
                ));
            }
        }
    }

    /// Handle events until no load or edit request is outstanding.
    pub async fn settle(&mut self) {
        while self.is_busy() {
            let Some(event) = self.next_event().await else {
                break;
            };
            self.handle_event(event);
        }
    }

    pub fn is_busy(&self) -> bool {
        !self.pending_loads.is_empty() || self.edit.in_flight() > 0
    }

    fn report<T>(&self, result: Result<T, EditError>) -> Result<T, EditError> {
        if let Err(e) = &result {
            debug!(error = %e, "edit action refused");
            self.notifier.notify(Notification::warning(e.to_string(), e));
        }
        result
    }

    /// Select whatever is under a screen position, or clear the selection.
    pub fn click(&mut self, sx: f64, sy: f64) -> Option<&Selection> {
        let at = self.viewport.screen_to_world(sx, sy);
        self.click_world(at)
    }

    pub fn click_lonlat(&mut self, lon: f64, lat: f64) -> Option<&Selection> {
        self.click_world(lonlat_to_planar(Position::new(lon, lat)))
    }

    fn click_world(&mut self, at: Position) -> Option<&Selection> {
        let hit = self.layers.hit_test(
            at,
            self.viewport.resolution(),
            self.settings.hit_tolerance_px,
        );
        self.selection.click(hit);
        self.selection.current()
    }

    pub fn set_layer_visible(&mut self, layer_id: &str, visible: bool) -> Result<(), RegistryError> {
        self.layers.set_visible(layer_id, visible)
    }

    pub fn toggle_layer(&mut self, layer_id: &str) -> Result<bool, RegistryError> {
        self.layers.toggle(layer_id)
    }

    pub fn bind_editable(&mut self, layer_id: &str) -> Result<(), EditError> {
        let result = match self.layers.registry().get(layer_id) {
            Some(def) => self.edit.bind(def),
            None => Err(EditError::NotEditable(layer_id.to_string())),
        };
        self.report(result)
    }

    pub fn toggle_drawing(&mut self) -> Result<EditMode, EditError> {
        let result = self.edit.toggle_drawing(&self.layers);
        self.report(result)
    }

    pub fn toggle_modifying(&mut self) -> Result<EditMode, EditError> {
        let result = self.edit.toggle_modifying(&self.layers);
        self.report(result)
    }

    /// Finish a drawn geometry given in lon/lat.
    pub fn draw(&mut self, geometry: Geometry, properties: PropertyMap) -> Result<RecordKey, EditError> {
        let planar = geometry_to_planar(&geometry);
        let result = self.edit.complete_draw(planar, properties, &mut self.layers);
        self.report(result)
    }

    /// Finish a modify gesture; geometries are lon/lat.
    pub fn modify(&mut self, edits: Vec<(RecordKey, Geometry)>) -> Result<usize, EditError> {
        let edits = edits
            .into_iter()
            .map(|(key, geometry)| (key, geometry_to_planar(&geometry)))
            .collect();
        let result = self.edit.complete_modify(edits, &mut self.layers);
        self.report(result)
    }

    /// Translate the selected feature so its centre lands on (lon, lat).
    pub fn move_selected(&mut self, lon: f64, lat: f64) -> Result<usize, EditError> {
        let moved = self.translated_selection(lonlat_to_planar(Position::new(lon, lat)));
        let result = moved.and_then(|(key, geometry)| {
            self.edit.complete_modify(vec![(key, geometry)], &mut self.layers)
        });
        self.report(result)
    }

    fn translated_selection(&self, target: Position) -> Result<(RecordKey, Geometry), EditError> {
        let selected = self.selection.current().ok_or(EditError::NoSelection)?;
        let bound = self.edit.bound_layer().ok_or(EditError::NoEditableLayer)?;
        if selected.layer_id != bound {
            return Err(EditError::SelectionOutsideLayer(bound.to_string()));
        }
        let record = self
            .layers
            .layer(bound)
            .and_then(|layer| layer.get(selected.key))
            .ok_or_else(|| EditError::UnknownRecord(selected.key.to_string()))?;
        let center = record.geometry.extent().center();
        let (dx, dy) = (target.x - center.x, target.y - center.y);
        let geometry = record
            .geometry
            .map_positions(|p| Position::new(p.x + dx, p.y + dy));
        Ok((selected.key, geometry))
    }

    pub fn delete_selected(&mut self) -> Result<FeatureId, EditError> {
        let result = self.edit.delete_selected(&self.selection);
        self.report(result)
    }

    pub fn home(&mut self) {
        let now = self.now();
        self.viewport.reset_home(now);
    }

    pub fn set_basemap(&mut self, key: &str) -> BaseMap {
        self.viewport.set_basemap(key)
    }

    /// Advance camera animation. Returns true while it is still moving.
    pub fn tick(&mut self) -> bool {
        let now = self.now();
        self.viewport.tick(now)
    }

    pub fn layers(&self) -> &LayerManager {
        &self.layers
    }

    pub fn registry(&self) -> &LayerRegistry {
        self.layers.registry()
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn subscribe_selection(&self) -> broadcast::Receiver<SelectionEvent> {
        self.selection.subscribe()
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn edit_mode(&self) -> EditMode {
        self.edit.mode()
    }

    pub fn edit_session(&self) -> &EditSession {
        &self.edit
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Tear the view down, aborting every load still in flight.
    pub fn unmount(self) {
        info!("map view unmounted");
    }
}

impl Drop for MapView {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.layers.clear();
    }
}

#[cfg(test)]
mod tests {
    use carte_shared::FitPolicy;
    use serde_json::json;

    use super::*;
    use crate::testing::{
        MemoryAssets, MemoryStore, RecordingNotifier, dynamic_def, feature_collection, point_feature,
        square_feature, static_def,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        assets: Arc<MemoryAssets>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::default());
            store.seed("hopitaux", point_feature(1, -17.44, 14.69));
            store.seed("hopitaux", point_feature(2, -17.40, 14.75));
            let assets = Arc::new(MemoryAssets::default());
            assets.insert(
                "/regions.geojson",
                feature_collection(vec![square_feature(10, -15.0, 14.5, 2.0)]),
            );
            assets.insert(
                "/communes.geojson",
                feature_collection(vec![square_feature(20, -17.4, 14.7, 0.2)]),
            );
            Self {
                store,
                assets,
                notifier: Arc::new(RecordingNotifier::default()),
            }
        }

        fn registry() -> LayerRegistry {
            let mut regions = static_def("regions", "/regions.geojson");
            regions.fit = Some(FitPolicy::new(10.0, 500.0));
            LayerRegistry::new(vec![
                regions,
                static_def("communes", "/communes.geojson"),
                dynamic_def("hopitaux"),
            ])
            .expect("registry")
        }

        fn mount(&self, registry: LayerRegistry) -> MapView {
            let loader = DataLoader::new(self.store.clone(), self.assets.clone());
            MapView::mount(registry, loader, self.notifier.clone(), ViewSettings::default())
        }
    }

    async fn mounted() -> (Fixture, MapView) {
        let fixture = Fixture::new();
        let mut view = fixture.mount(Fixture::registry());
        view.settle().await;
        (fixture, view)
    }

    #[tokio::test]
    async fn mount_loads_every_layer() {
        let (_fixture, view) = mounted().await;
        assert_eq!(view.layers().feature_count("regions"), 1);
        assert_eq!(view.layers().feature_count("communes"), 1);
        assert_eq!(view.layers().feature_count("hopitaux"), 2);
        assert!(view.layers().has_fitted("regions"));
        assert!(!view.is_busy());
    }

    #[tokio::test]
    async fn missing_static_source_does_not_block_siblings() {
        let fixture = Fixture::new();
        let mut registry_defs: Vec<_> = Fixture::registry().iter().cloned().collect();
        registry_defs.insert(1, static_def("routes", "/missing.geojson"));
        let mut view = fixture.mount(LayerRegistry::new(registry_defs).expect("registry"));
        view.settle().await;

        assert!(view.layers().layer("routes").is_none());
        assert_eq!(view.layers().layers().count(), 3);
        assert_eq!(fixture.notifier.messages(), vec!["Layer routes layer could not be loaded"]);
    }

    #[tokio::test]
    async fn optional_source_failure_is_silent() {
        let fixture = Fixture::new();
        fixture.store.fail_list("ecoles");
        let mut ecoles = dynamic_def("ecoles");
        ecoles.optional = true;
        let mut defs: Vec<_> = Fixture::registry().iter().cloned().collect();
        defs.push(ecoles);
        let mut view = fixture.mount(LayerRegistry::new(defs).expect("registry"));
        view.settle().await;

        assert!(view.layers().layer("ecoles").is_none());
        assert_eq!(view.layers().layers().count(), 3);
        assert!(fixture.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn empty_collection_produces_no_layer() {
        let fixture = Fixture::new();
        fixture.assets.insert("/communes.geojson", feature_collection(vec![]));
        let mut view = fixture.mount(Fixture::registry());
        view.settle().await;
        assert!(view.layers().layer("communes").is_none());
        assert!(fixture.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn unrecognized_static_payload_is_absent_data() {
        let fixture = Fixture::new();
        fixture.assets.insert("/communes.geojson", json!({"detail": "Not found."}));
        let mut view = fixture.mount(Fixture::registry());
        view.settle().await;

        assert!(view.layers().layer("communes").is_none());
        assert!(view.layers().layer("regions").is_some());
        assert!(fixture.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn reloading_twice_never_refits() {
        let (_fixture, mut view) = mounted().await;
        view.viewport_mut().tick(f64::MAX);
        let settled = view.viewport().target();

        for _ in 0..2 {
            view.reload_layer("regions").expect("known layer");
            view.settle().await;
            assert!(!view.viewport().is_animating());
        }
        assert_eq!(view.viewport().target(), settled);
    }

    #[tokio::test]
    async fn visibility_toggle_makes_no_requests() {
        let (fixture, mut view) = mounted().await;
        let requests = fixture.store.list_requests();
        let before: Vec<RecordKey> = view
            .layers()
            .layer("hopitaux")
            .map(|l| l.features().iter().map(|r| r.key).collect())
            .unwrap_or_default();

        assert!(!view.toggle_layer("hopitaux").expect("known"));
        assert!(view.toggle_layer("hopitaux").expect("known"));
        view.set_layer_visible("hopitaux", true).expect("known");

        assert_eq!(fixture.store.list_requests(), requests);
        assert!(!view.is_busy());
        let after: Vec<RecordKey> = view
            .layers()
            .layer("hopitaux")
            .map(|l| l.features().iter().map(|r| r.key).collect())
            .unwrap_or_default();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn click_selects_topmost_and_publishes() {
        let (_fixture, mut view) = mounted().await;
        let mut rx = view.subscribe_selection();

        let selected = view.click_lonlat(-17.44, 14.69).cloned().expect("hit");
        assert_eq!(selected.layer_id, "hopitaux");
        assert_eq!(selected.id, Some(FeatureId::Number(1)));
        assert!(view.selection().highlight().is_visible());
        let Ok(SelectionEvent::Selected(published)) = rx.try_recv() else {
            panic!("expected selection");
        };
        assert_eq!(published["layerName"], "hopitaux layer");

        // Inside the commune square but away from any hospital
        let selected = view.click_lonlat(-17.3, 14.6).cloned().expect("hit");
        assert_eq!(selected.layer_id, "communes");

        assert!(view.click_lonlat(30.0, 50.0).is_none());
        assert!(!view.selection().highlight().is_visible());
    }

    #[tokio::test]
    async fn screen_click_uses_viewport() {
        let (_fixture, mut view) = mounted().await;
        let target = lonlat_to_planar(Position::new(-17.44, 14.69));
        let (sx, sy) = view.viewport().world_to_screen(target);
        let selected = view.click(sx, sy).cloned().expect("hit");
        assert_eq!(selected.id, Some(FeatureId::Number(1)));
    }

    #[tokio::test]
    async fn draw_then_move_then_delete() {
        let (fixture, mut view) = mounted().await;
        view.bind_editable("hopitaux").expect("bind");
        view.toggle_drawing().expect("drawing");

        let props = json!({"nom": "Clinique"}).as_object().cloned().unwrap_or_default();
        let key = view
            .draw(Geometry::Point(Position::new(-17.2, 14.8)), props)
            .expect("draw");
        assert_eq!(view.layers().feature_count("hopitaux"), 3);
        view.settle().await;
        assert_eq!(fixture.store.len("hopitaux"), 3);

        view.toggle_drawing().expect("idle");
        view.toggle_modifying().expect("modifying");
        let selected = view.click_lonlat(-17.2, 14.8).cloned().expect("hit");
        assert_eq!(selected.key, key);
        assert!(selected.id.is_some());

        assert_eq!(view.move_selected(-17.1, 14.9), Ok(1));
        view.settle().await;
        let moved = view.click_lonlat(-17.1, 14.9).cloned().expect("hit moved");
        assert_eq!(moved.key, key);

        view.delete_selected().expect("delete");
        view.settle().await;
        assert_eq!(view.layers().feature_count("hopitaux"), 2);
        assert!(view.selection().current().is_none());
        assert_eq!(fixture.store.len("hopitaux"), 2);
        assert!(fixture.notifier.notifications().is_empty());
    }

    #[tokio::test]
    async fn refused_actions_reach_the_notifier() {
        let (fixture, mut view) = mounted().await;
        assert_eq!(view.delete_selected(), Err(EditError::NoEditableLayer));
        view.bind_editable("hopitaux").expect("bind");
        assert_eq!(view.delete_selected(), Err(EditError::NoSelection));
        assert_eq!(
            fixture.notifier.messages(),
            vec!["no editable layer is bound", "select a feature first"]
        );
    }

    #[tokio::test]
    async fn reload_clears_selection_in_that_layer() {
        let (_fixture, mut view) = mounted().await;
        view.click_lonlat(-17.44, 14.69).expect("hit");
        view.reload_layer("hopitaux").expect("known");
        view.settle().await;
        assert!(view.selection().current().is_none());
    }

    async fn run_background_tasks() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_cancels_pending_loads() {
        let fixture = Fixture::new();
        fixture.store.delay_lists(std::time::Duration::from_millis(200));
        let view = fixture.mount(Fixture::registry());
        let cancel = view.cancel_signal().clone();
        assert!(view.is_busy());

        view.unmount();
        assert!(cancel.is_cancelled());

        tokio::time::advance(std::time::Duration::from_millis(500)).await;
        run_background_tasks().await;
        assert_eq!(fixture.store.list_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_loads_deliver_no_layer_events() {
        let fixture = Fixture::new();
        fixture.store.delay_lists(std::time::Duration::from_millis(200));
        let mut view = fixture.mount(Fixture::registry());
        view.cancel_signal().cancel();

        tokio::time::advance(std::time::Duration::from_millis(500)).await;
        run_background_tasks().await;

        assert!(view.events_rx.try_recv().is_err());
        assert_eq!(view.layers().layers().count(), 0);
        assert_eq!(fixture.store.list_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn home_animates_to_fixed_camera() {
        let (_fixture, mut view) = mounted().await;
        view.home();
        assert!(view.viewport().is_animating());
        tokio::time::advance(std::time::Duration::from_millis(config::HOME_DURATION_MS as u64 + 1)).await;
        assert!(!view.tick());
        assert_eq!(view.viewport().zoom, config::HOME_ZOOM);
        assert_eq!(view.set_basemap("googleM"), BaseMap::GoogleRoad);
    }
}
