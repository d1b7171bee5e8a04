use std::collections::{HashMap, HashSet};

use carte_shared::{Extent, FeatureCollection, FeatureId, Geometry, GeometryKind, LayerDefinition, LayerStyle, Position};
use tracing::{debug, error, info};

use crate::error::{LoadError, RegistryError};
use crate::loader::LoadTicket;
use crate::record::{FeatureRecord, RecordKey};
use crate::registry::LayerRegistry;
use crate::spatial::{SpatialGrid, geometry_hit};
use crate::viewport::Viewport;

/// The drawable features of one successfully loaded layer definition.
#[derive(Debug, Clone)]
pub struct RenderLayer {
    pub id: String,
    pub name: String,
    pub kind: GeometryKind,
    pub style: LayerStyle,
    pub visible: bool,
    features: Vec<FeatureRecord>,
    index: SpatialGrid,
}

impl RenderLayer {
    /// `None` when the collection holds nothing drawable.
    pub fn build(def: &LayerDefinition, collection: FeatureCollection, visible: bool) -> Option<Self> {
        let features: Vec<FeatureRecord> = collection
            .features
            .into_iter()
            .filter_map(|feature| FeatureRecord::from_feature(feature, &def.id, &def.name))
            .collect();
        if features.is_empty() {
            return None;
        }
        let index = SpatialGrid::build(&features);
        Some(Self {
            id: def.id.clone(),
            name: def.name.clone(),
            kind: def.kind,
            style: def.style.clone(),
            visible,
            features,
            index,
        })
    }

    pub fn features(&self) -> &[FeatureRecord] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, key: RecordKey) -> Option<&FeatureRecord> {
        self.features.iter().find(|r| r.key == key)
    }

    pub fn get_mut(&mut self, key: RecordKey) -> Option<&mut FeatureRecord> {
        self.features.iter_mut().find(|r| r.key == key)
    }

    pub fn find_by_id(&self, id: &FeatureId) -> Option<&FeatureRecord> {
        self.features.iter().find(|r| r.id.as_ref() == Some(id))
    }

    pub fn insert(&mut self, record: FeatureRecord) {
        self.features.push(record);
        self.reindex();
    }

    pub fn remove(&mut self, key: RecordKey) -> Option<FeatureRecord> {
        let pos = self.features.iter().position(|r| r.key == key)?;
        let removed = self.features.remove(pos);
        self.reindex();
        Some(removed)
    }

    /// Replace a record's geometry. Returns false if the record is gone.
    pub fn update_geometry(&mut self, key: RecordKey, geometry: Geometry) -> bool {
        let Some(record) = self.get_mut(key) else {
            return false;
        };
        record.geometry = geometry;
        self.reindex();
        true
    }

    pub fn extent(&self) -> Extent {
        let mut extent = Extent::EMPTY;
        for record in &self.features {
            extent.merge(&record.geometry.extent());
        }
        extent
    }

    /// Topmost record under `at`; later features draw above earlier ones.
    pub fn hit(&self, at: Position, tolerance: f64, point_tolerance: f64) -> Option<&FeatureRecord> {
        self.index
            .candidates(at, tolerance.max(point_tolerance))
            .into_iter()
            .map(|idx| &self.features[idx])
            .find(|record| geometry_hit(&record.geometry, at, tolerance, point_tolerance))
    }

    fn reindex(&mut self) {
        self.index = SpatialGrid::build(&self.features);
    }
}

/// What a finished load did to the layer set.
#[derive(Debug)]
pub enum LayerChange {
    Built { features: usize, fitted: bool },
    /// No data: any previous render layer is gone and none replaces it.
    Cleared,
    /// The load failed; any previous render layer is gone.
    Failed(LoadError),
    /// A newer load of the same layer was issued; nothing changed.
    Stale,
}

/// Keeps the render layers in step with the registry and the latest load of
/// each definition. Owned by one view.
#[derive(Debug)]
pub struct LayerManager {
    registry: LayerRegistry,
    /// Registry order.
    layers: Vec<RenderLayer>,
    visibility: HashMap<String, bool>,
    fitted: HashSet<String>,
    latest_ticket: HashMap<String, LoadTicket>,
    next_ticket: u64,
}

impl LayerManager {
    pub fn new(registry: LayerRegistry) -> Self {
        let visibility = registry
            .iter()
            .map(|def| (def.id.clone(), def.visible))
            .collect();
        Self {
            registry,
            layers: Vec::new(),
            visibility,
            fitted: HashSet::new(),
            latest_ticket: HashMap::new(),
            next_ticket: 0,
        }
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    /// Start a new load attempt for `layer_id`; older attempts become stale.
    pub fn issue_ticket(&mut self, layer_id: &str) -> LoadTicket {
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        self.latest_ticket.insert(layer_id.to_string(), ticket);
        ticket
    }

    /// Replace the render layer of `layer_id` with the outcome of a load.
    pub fn apply_load(
        &mut self,
        layer_id: &str,
        ticket: LoadTicket,
        outcome: Result<Option<FeatureCollection>, LoadError>,
        viewport: &mut Viewport,
        now: f64,
    ) -> LayerChange {
        if self.latest_ticket.get(layer_id) != Some(&ticket) {
            debug!(layer = layer_id, ?ticket, "superseded load discarded");
            return LayerChange::Stale;
        }
        let Some(def) = self.registry.get(layer_id).cloned() else {
            debug!(layer = layer_id, "load for unknown layer discarded");
            return LayerChange::Stale;
        };

        if let Some(old) = self.remove_layer(layer_id) {
            info!(layer = layer_id, features = old.len(), "render layer removed");
        }

        let collection = match outcome {
            Ok(Some(collection)) => collection,
            Ok(None) => {
                debug!(layer = layer_id, "no data, layer left empty");
                return LayerChange::Cleared;
            }
            Err(e) => {
                error!(layer = layer_id, error = %e, "layer failed to load");
                return LayerChange::Failed(e);
            }
        };

        let visible = self.is_visible(layer_id);
        let Some(layer) = RenderLayer::build(&def, collection, visible) else {
            debug!(layer = layer_id, "zero features, no render layer");
            return LayerChange::Cleared;
        };
        let features = layer.len();
        let extent = layer.extent();
        self.insert_layer(layer);
        info!(layer = layer_id, features, "render layer built");

        let fitted = self.maybe_fit(&def, &extent, viewport, now);
        LayerChange::Built { features, fitted }
    }

    fn maybe_fit(&mut self, def: &LayerDefinition, extent: &Extent, viewport: &mut Viewport, now: f64) -> bool {
        let Some(policy) = &def.fit else {
            return false;
        };
        if self.fitted.contains(&def.id) || !self.is_visible(&def.id) || !extent.is_finite() {
            return false;
        }
        if !viewport.fit_extent(extent, policy, now) {
            return false;
        }
        info!(layer = %def.id, "viewport fitted to layer");
        self.fitted.insert(def.id.clone());
        true
    }

    fn insert_layer(&mut self, layer: RenderLayer) {
        let rank = |id: &str| self.registry.position(id).unwrap_or(usize::MAX);
        let own = rank(&layer.id);
        let at = self
            .layers
            .iter()
            .position(|existing| rank(&existing.id) > own)
            .unwrap_or(self.layers.len());
        self.layers.insert(at, layer);
    }

    fn remove_layer(&mut self, layer_id: &str) -> Option<RenderLayer> {
        let pos = self.layers.iter().position(|l| l.id == layer_id)?;
        Some(self.layers.remove(pos))
    }

    pub fn layer(&self, layer_id: &str) -> Option<&RenderLayer> {
        self.layers.iter().find(|l| l.id == layer_id)
    }

    pub fn layer_mut(&mut self, layer_id: &str) -> Option<&mut RenderLayer> {
        self.layers.iter_mut().find(|l| l.id == layer_id)
    }

    /// Render layers in draw order, bottom first.
    pub fn layers(&self) -> impl Iterator<Item = &RenderLayer> {
        self.layers.iter()
    }

    pub fn feature_count(&self, layer_id: &str) -> usize {
        self.layer(layer_id).map_or(0, RenderLayer::len)
    }

    pub fn is_visible(&self, layer_id: &str) -> bool {
        self.visibility.get(layer_id).copied().unwrap_or(false)
    }

    /// Only flips the flag; data is never touched or reloaded.
    pub fn set_visible(&mut self, layer_id: &str, visible: bool) -> Result<(), RegistryError> {
        let flag = self
            .visibility
            .get_mut(layer_id)
            .ok_or_else(|| RegistryError::UnknownLayer(layer_id.to_string()))?;
        if *flag != visible {
            debug!(layer = layer_id, visible, "visibility changed");
        }
        *flag = visible;
        if let Some(layer) = self.layer_mut(layer_id) {
            layer.visible = visible;
        }
        Ok(())
    }

    /// Returns the new visibility.
    pub fn toggle(&mut self, layer_id: &str) -> Result<bool, RegistryError> {
        let visible = !self.is_visible(layer_id);
        self.set_visible(layer_id, visible)?;
        Ok(visible)
    }

    pub fn has_fitted(&self, layer_id: &str) -> bool {
        self.fitted.contains(layer_id)
    }

    /// Topmost visible feature at `at` (planar). Tolerances are in pixels and
    /// scaled by `resolution`; point layers add their circle radius.
    pub fn hit_test(
        &self,
        at: Position,
        resolution: f64,
        tolerance_px: f64,
    ) -> Option<(&RenderLayer, &FeatureRecord)> {
        let tolerance = tolerance_px * resolution;
        self.layers.iter().rev().filter(|l| l.visible).find_map(|layer| {
            let radius = layer.style.point_radius.unwrap_or(0.0);
            let point_tolerance = (tolerance_px + radius) * resolution;
            layer
                .hit(at, tolerance, point_tolerance)
                .map(|record| (layer, record))
        })
    }

    /// Drop every render layer. Fit bookkeeping survives.
    pub fn clear(&mut self) {
        self.layers.clear();
    }
}
