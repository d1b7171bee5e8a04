pub mod animation;
pub mod assets;
pub mod charts;
pub mod commands;
pub mod config;
pub mod edit;
pub mod error;
pub mod layers;
pub mod loader;
pub mod notify;
pub mod record;
pub mod registry;
pub mod selection;
pub mod spatial;
pub mod store;
pub mod view;
pub mod viewport;

#[cfg(test)]
mod testing;

pub use edit::{EditContext, EditMode, EditSession};
pub use error::{EditError, LoadError, RegistryError, SyncError};
pub use layers::{LayerChange, LayerManager, RenderLayer};
pub use loader::{CancelSignal, DataLoader};
pub use notify::{Notification, Notifier, Severity, TracingNotifier};
pub use record::{FeatureRecord, PendingState, RecordKey};
pub use registry::LayerRegistry;
pub use selection::{Selection, SelectionController, SelectionEvent};
pub use view::{MapView, ViewEvent, ViewSettings};
pub use viewport::{BaseMap, Viewport};
