use carte_shared::{FeatureId, Geometry, LayerStyle, PropertyMap, Rgba};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::layers::RenderLayer;
use crate::record::{FeatureRecord, LAYER_NAME_KEY, RecordKey};

const FALLBACK_LAYER_NAME: &str = "Layer";
const HIGHLIGHT_COLOR: Rgba = Rgba::rgb(0xFF, 0xD7, 0x00);

/// Published to passive observers whenever the selection changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionEvent {
    /// Every property of the selected feature plus `layerName`; never geometry.
    Selected(PropertyMap),
    Cleared,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub layer_id: String,
    pub key: RecordKey,
    pub id: Option<FeatureId>,
    pub properties: PropertyMap,
}

/// Overlay drawn over the selected feature. Holds a copy of its geometry.
#[derive(Debug, Clone)]
pub struct HighlightLayer {
    geometry: Option<Geometry>,
    visible: bool,
    style: LayerStyle,
}

impl Default for HighlightLayer {
    fn default() -> Self {
        Self {
            geometry: None,
            visible: false,
            style: LayerStyle {
                stroke: Some(HIGHLIGHT_COLOR),
                stroke_width: 3.0,
                fill: Some(Rgba::rgba(0xFF, 0xD7, 0x00, 0.25)),
                point_radius: Some(8.0),
            },
        }
    }
}

impl HighlightLayer {
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn style(&self) -> &LayerStyle {
        &self.style
    }

    fn show(&mut self, geometry: Geometry) {
        self.geometry = Some(geometry);
        self.visible = true;
    }

    fn hide(&mut self) {
        self.geometry = None;
        self.visible = false;
    }
}

/// Single selection plus its highlight, local to one view.
#[derive(Debug)]
pub struct SelectionController {
    current: Option<Selection>,
    highlight: HighlightLayer,
    events: broadcast::Sender<SelectionEvent>,
}

impl SelectionController {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            current: None,
            highlight: HighlightLayer::default(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SelectionEvent> {
        self.events.subscribe()
    }

    pub fn current(&self) -> Option<&Selection> {
        self.current.as_ref()
    }

    pub fn highlight(&self) -> &HighlightLayer {
        &self.highlight
    }

    /// Outcome of a hit test: a hit replaces the selection, a miss clears it.
    pub fn click(&mut self, hit: Option<(&RenderLayer, &FeatureRecord)>) {
        match hit {
            Some((layer, record)) => self.select(&layer.name, record),
            None => {
                debug!("click missed every feature");
                self.clear();
            }
        }
    }

    pub fn select(&mut self, layer_name: &str, record: &FeatureRecord) {
        self.highlight.show(record.geometry.clone());
        self.current = Some(Selection {
            layer_id: record.layer_id.clone(),
            key: record.key,
            id: record.id.clone(),
            properties: record.properties.clone(),
        });
        self.publish(SelectionEvent::Selected(published_properties(layer_name, record)));
    }

    pub fn clear(&mut self) {
        self.highlight.hide();
        if self.current.take().is_some() {
            self.publish(SelectionEvent::Cleared);
        }
    }

    /// Clear the selection if it points at `key`. Returns whether it did.
    pub fn forget_record(&mut self, key: RecordKey) -> bool {
        let selected = self.current.as_ref().is_some_and(|s| s.key == key);
        if selected {
            self.clear();
        }
        selected
    }

    /// Clear the selection if it belongs to `layer_id`, whose records were replaced.
    pub fn forget_layer(&mut self, layer_id: &str) -> bool {
        let selected = self.current.as_ref().is_some_and(|s| s.layer_id == layer_id);
        if selected {
            self.clear();
        }
        selected
    }

    /// Follow a confirmed or edited record if it is the selected one.
    pub fn sync_record(&mut self, layer_name: &str, record: &FeatureRecord) {
        let Some(current) = self.current.as_mut().filter(|s| s.key == record.key) else {
            return;
        };
        current.id = record.id.clone();
        self.highlight.show(record.geometry.clone());
        if current.properties != record.properties {
            current.properties = record.properties.clone();
            self.publish(SelectionEvent::Selected(published_properties(layer_name, record)));
        }
    }

    fn publish(&self, event: SelectionEvent) {
        // No observers is fine
        let _ = self.events.send(event);
    }
}

fn published_properties(layer_name: &str, record: &FeatureRecord) -> PropertyMap {
    let mut properties = record.properties.clone();
    if !properties.get(LAYER_NAME_KEY).is_some_and(Value::is_string) {
        let name = if layer_name.is_empty() {
            FALLBACK_LAYER_NAME
        } else {
            layer_name
        };
        properties.insert(LAYER_NAME_KEY.into(), Value::String(name.to_string()));
    }
    properties
}
