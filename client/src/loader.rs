use std::sync::Arc;

use carte_shared::{
    FeatureCollection, LayerDefinition, SourceDescriptor, normalize_geojson, pagination_next,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::assets::AssetSource;
use crate::config;
use crate::error::LoadError;
use crate::store::{FeatureStore, PageRequest};
use crate::view::ViewEvent;

/// Identifies one load attempt of one layer. Later attempts get larger tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadTicket(pub(crate) u64);

/// One-shot cancellation shared by every load issued for a view.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // A closed channel can never be un-cancelled, so treat it the same way
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Resolves layer definitions into feature collections.
#[derive(Clone)]
pub struct DataLoader {
    store: Arc<dyn FeatureStore>,
    assets: Arc<dyn AssetSource>,
    page_size: Option<usize>,
    max_pages: usize,
}

impl DataLoader {
    pub fn new(store: Arc<dyn FeatureStore>, assets: Arc<dyn AssetSource>) -> Self {
        Self {
            store,
            assets,
            page_size: None,
            max_pages: config::DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_page_size(mut self, page_size: Option<usize>) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn store(&self) -> Arc<dyn FeatureStore> {
        Arc::clone(&self.store)
    }

    /// `Ok(None)` means the source has no data. Failures of optional sources
    /// are logged and reported as no data.
    pub async fn load(
        &self,
        def: &LayerDefinition,
    ) -> Result<Option<FeatureCollection>, LoadError> {
        let result = match &def.source {
            SourceDescriptor::Static(path) => self.load_static(path).await,
            SourceDescriptor::Dynamic(key) => self.load_dynamic(key).await,
        };
        match result {
            Err(e) if def.optional => {
                warn!(layer = %def.id, error = %e, "optional source unavailable");
                Ok(None)
            }
            other => other,
        }
    }

    async fn load_static(&self, path: &str) -> Result<Option<FeatureCollection>, LoadError> {
        let payload = self.assets.read(path).await?;
        Ok(normalize_geojson(payload)?)
    }

    async fn load_dynamic(&self, key: &str) -> Result<Option<FeatureCollection>, LoadError> {
        let mut request = PageRequest::first(self.page_size);
        let mut collected: Option<FeatureCollection> = None;

        for page_number in 1..=self.max_pages {
            let payload = self.store.list(key, &request).await?;
            let next = pagination_next(&payload).map(str::to_string);

            if let Some(page) = normalize_geojson(payload)? {
                match &mut collected {
                    Some(all) => all.features.extend(page.features),
                    None => collected = Some(page),
                }
            }

            match next {
                Some(next) if page_number < self.max_pages => request = request.follow(&next),
                Some(_) => {
                    warn!(
                        collection = key,
                        max_pages = self.max_pages,
                        "page limit reached, remaining pages skipped"
                    );
                    break;
                }
                None => break,
            }
        }

        Ok(collected)
    }

    /// Load `def` in the background and report the outcome on `events`,
    /// unless `cancel` fires first.
    pub fn spawn(
        &self,
        def: LayerDefinition,
        ticket: LoadTicket,
        cancel: CancelSignal,
        events: mpsc::UnboundedSender<ViewEvent>,
    ) -> JoinHandle<()> {
        let loader = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(layer = %def.id, "load cancelled");
                    return;
                }
                outcome = loader.load(&def) => outcome,
            };
            // The view may already be gone; nothing left to notify then
            let _ = events.send(ViewEvent::LayerLoaded {
                layer_id: def.id,
                ticket,
                outcome,
            });
        })
    }
}
