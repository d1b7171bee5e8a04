use std::future::Future;
use std::pin::Pin;

use carte_shared::{Feature, FeatureId};
use reqwest::header::{CACHE_CONTROL, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use crate::error::{LoadError, SyncError, SyncOperation};

/// Boxed future returned by the store and asset seams.
pub type StoreFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// One list request. `next` is a link taken from the previous page's envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: Option<usize>,
    pub next: Option<String>,
}

impl PageRequest {
    pub fn first(page_size: Option<usize>) -> Self {
        Self {
            page_size,
            next: None,
        }
    }

    pub fn follow(&self, next: &str) -> Self {
        Self {
            page_size: self.page_size,
            next: Some(next.to_string()),
        }
    }
}

/// The remote feature store, one collection per dynamic layer.
pub trait FeatureStore: Send + Sync {
    /// Raw list payload: a FeatureCollection or a pagination envelope.
    fn list<'a>(&'a self, collection: &'a str, page: &'a PageRequest)
    -> StoreFuture<'a, Value, LoadError>;

    /// Returns the created feature, which always carries an id.
    fn create<'a>(&'a self, collection: &'a str, feature: Feature)
    -> StoreFuture<'a, Feature, SyncError>;

    /// Returns the store's canonical record when it sent one back.
    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a FeatureId,
        feature: Feature,
    ) -> StoreFuture<'a, Option<Feature>, SyncError>;

    fn delete<'a>(&'a self, collection: &'a str, id: &'a FeatureId)
    -> StoreFuture<'a, (), SyncError>;
}

/// REST feature store: `{api}/api/{collection}/` and `{api}/api/{collection}/{id}/`.
#[derive(Debug, Clone)]
pub struct HttpFeatureStore {
    client: Client,
    api_base: String,
}

impl HttpFeatureStore {
    pub fn new(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn collection_url(&self, collection: &str) -> String {
        format!("{}/api/{}/", self.api_base, collection.trim_matches('/'))
    }

    pub fn record_url(&self, collection: &str, id: &FeatureId) -> String {
        format!("{}{}/", self.collection_url(collection), id)
    }

    async fn list_page(&self, collection: &str, page: &PageRequest) -> Result<Value, LoadError> {
        let base = self.collection_url(collection);
        let invalid = |url: &str, reason: String| LoadError::InvalidUrl {
            url: url.to_string(),
            reason,
        };
        let url = match &page.next {
            Some(next) => Url::parse(&base)
                .and_then(|base_url| base_url.join(next))
                .map_err(|e| invalid(next, e.to_string()))?,
            None => {
                let mut url = Url::parse(&base).map_err(|e| invalid(&base, e.to_string()))?;
                if let Some(size) = page.page_size {
                    url.query_pairs_mut()
                        .append_pair("page_size", &size.to_string());
                }
                url
            }
        };

        debug!(%url, "listing features");
        let response = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, HeaderValue::from_static("no-store"))
            .send()
            .await
            .map_err(|e| LoadError::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(LoadError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| LoadError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn send(
        &self,
        operation: SyncOperation,
        method: Method,
        url: String,
        body: Option<&Feature>,
    ) -> Result<Response, SyncError> {
        let mut request = self.client.request(method, &url);
        if let Some(feature) = body {
            request = request.json(feature);
        }
        let response = request.send().await.map_err(|e| SyncError::Unreachable {
            operation,
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(SyncError::Rejected {
                operation,
                url,
                status: response.status().as_u16(),
            })
        }
    }

    async fn create_feature(&self, collection: &str, feature: Feature) -> Result<Feature, SyncError> {
        let url = self.collection_url(collection);
        let response = self
            .send(SyncOperation::Create, Method::POST, url, Some(&feature))
            .await?;
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| SyncError::InvalidResponse {
                operation: SyncOperation::Create,
                reason: e.to_string(),
            })?;
        let created = Feature::from_store_response(body).map_err(|e| SyncError::InvalidResponse {
            operation: SyncOperation::Create,
            reason: e.to_string(),
        })?;
        if created.id.is_none() {
            return Err(SyncError::MissingId);
        }
        Ok(created)
    }

    async fn update_feature(
        &self,
        collection: &str,
        id: &FeatureId,
        feature: Feature,
    ) -> Result<Option<Feature>, SyncError> {
        let url = self.record_url(collection, id);
        let response = self
            .send(SyncOperation::Update, Method::PATCH, url, Some(&feature))
            .await?;
        // An empty or non-JSON body is still a successful update
        let canonical = match response.bytes().await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|body| Feature::from_store_response(body).ok()),
            _ => None,
        };
        Ok(canonical)
    }

    async fn delete_feature(&self, collection: &str, id: &FeatureId) -> Result<(), SyncError> {
        let url = self.record_url(collection, id);
        match self.send(SyncOperation::Delete, Method::DELETE, url, None).await {
            Ok(_) => Ok(()),
            Err(SyncError::Rejected { status, .. })
                if status == StatusCode::NOT_FOUND.as_u16() || status == StatusCode::GONE.as_u16() =>
            {
                debug!(%id, status, "feature already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl FeatureStore for HttpFeatureStore {
    fn list<'a>(
        &'a self,
        collection: &'a str,
        page: &'a PageRequest,
    ) -> StoreFuture<'a, Value, LoadError> {
        Box::pin(self.list_page(collection, page))
    }

    fn create<'a>(
        &'a self,
        collection: &'a str,
        feature: Feature,
    ) -> StoreFuture<'a, Feature, SyncError> {
        Box::pin(self.create_feature(collection, feature))
    }

    fn update<'a>(
        &'a self,
        collection: &'a str,
        id: &'a FeatureId,
        feature: Feature,
    ) -> StoreFuture<'a, Option<Feature>, SyncError> {
        Box::pin(self.update_feature(collection, id, feature))
    }

    fn delete<'a>(
        &'a self,
        collection: &'a str,
        id: &'a FeatureId,
    ) -> StoreFuture<'a, (), SyncError> {
        Box::pin(self.delete_feature(collection, id))
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use carte_server::state::AppState;
    use carte_shared::{FeatureCollection, Geometry, Position, PropertyMap, normalize_geojson, pagination_next};
    use serde_json::json;

    use super::*;
    use crate::assets::{AssetSource, StaticAssets};
    use crate::loader::DataLoader;
    use crate::testing::dynamic_def;

    async fn spawn_test_server(state: AppState) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let app = carte_server::app::build_app(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        (addr, handle)
    }

    fn hospital(name: &str, lon: f64, lat: f64) -> Feature {
        let mut properties = PropertyMap::new();
        properties.insert("nom".into(), json!(name));
        properties.insert("adresse".into(), Value::Null);
        Feature::new(Geometry::Point(Position::new(lon, lat)), properties)
    }

    fn seeded_state(n: usize) -> AppState {
        let state = AppState::new(["hopitaux"], std::env::temp_dir(), 100);
        let features = (0..n)
            .map(|i| hospital(&format!("Hôpital {i}"), -17.4 + i as f64 * 0.01, 14.7))
            .collect();
        state.seed("hopitaux", FeatureCollection::new(features));
        state
    }

    #[tokio::test]
    async fn list_follows_absolute_next_links() {
        let (addr, server_handle) = spawn_test_server(seeded_state(3)).await;
        let store = HttpFeatureStore::new(Client::new(), format!("http://{addr}/"));

        let first = PageRequest::first(Some(2));
        let page = store.list("hopitaux", &first).await.expect("first page");
        assert_eq!(page["count"], 3);
        let next = pagination_next(&page).expect("second page link").to_string();

        let second = store
            .list("hopitaux", &first.follow(&next))
            .await
            .expect("second page");
        assert!(pagination_next(&second).is_none());
        let features = normalize_geojson(second).expect("decode").expect("some data");
        assert_eq!(features.len(), 1);

        server_handle.abort();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn loader_concatenates_every_page() {
        let (addr, server_handle) = spawn_test_server(seeded_state(5)).await;
        let client = Client::new();
        let store = Arc::new(HttpFeatureStore::new(client.clone(), format!("http://{addr}")));
        let assets = Arc::new(StaticAssets::http(client, format!("http://{addr}")));
        let loader = DataLoader::new(store, assets).with_page_size(Some(2));

        let loaded = loader
            .load(&dynamic_def("hopitaux"))
            .await
            .expect("load")
            .expect("features");
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.features[0].properties["nom"], "Hôpital 0");
        assert_eq!(loaded.features[4].properties["nom"], "Hôpital 4");

        server_handle.abort();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn unknown_collection_is_a_status_error() {
        let (addr, server_handle) = spawn_test_server(seeded_state(0)).await;
        let store = HttpFeatureStore::new(Client::new(), format!("http://{addr}"));

        let err = store
            .list("pharmacies", &PageRequest::first(None))
            .await
            .expect_err("unknown collection");
        assert!(matches!(err, LoadError::Status { status: 404, .. }));

        server_handle.abort();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn create_update_delete_round_trip() {
        let state = seeded_state(1);
        let (addr, server_handle) = spawn_test_server(state.clone()).await;
        let store = HttpFeatureStore::new(Client::new(), format!("http://{addr}"));

        let created = store
            .create("hopitaux", hospital("Nouveau", -17.45, 14.69))
            .await
            .expect("create");
        let id = created.id.clone().expect("server id");
        assert_eq!(id, FeatureId::Number(2));
        assert_eq!(created.properties["nom"], "Nouveau");

        let mut moved = hospital("Déplacé", -17.50, 14.70);
        moved.id = Some(id.clone());
        let canonical = store
            .update("hopitaux", &id, moved)
            .await
            .expect("update")
            .expect("canonical record");
        assert_eq!(canonical.properties["nom"], "Déplacé");
        assert_eq!(
            canonical.geometry,
            Some(Geometry::Point(Position::new(-17.50, 14.70)))
        );

        store.delete("hopitaux", &id).await.expect("delete");
        assert!(state.get("hopitaux", 2).is_none());
        // A second delete finds nothing and still counts as done
        store.delete("hopitaux", &id).await.expect("delete again");

        server_handle.abort();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn update_of_missing_record_is_rejected() {
        let (addr, server_handle) = spawn_test_server(seeded_state(0)).await;
        let store = HttpFeatureStore::new(Client::new(), format!("http://{addr}"));

        let err = store
            .update("hopitaux", &FeatureId::Number(42), hospital("X", 0.0, 0.0))
            .await
            .expect_err("missing record");
        assert!(matches!(
            err,
            SyncError::Rejected {
                operation: SyncOperation::Update,
                status: 404,
                ..
            }
        ));

        server_handle.abort();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn unreachable_store_reports_operation() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind probe");
        let addr = listener.local_addr().expect("probe address");
        drop(listener);

        let store = HttpFeatureStore::new(Client::new(), format!("http://{addr}"));
        let err = store
            .create("hopitaux", hospital("Nulle part", 0.0, 0.0))
            .await
            .expect_err("nothing listening");
        assert_eq!(err.operation(), SyncOperation::Create);
        assert!(matches!(err, SyncError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn static_assets_are_fetched_over_http() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir(dir.path().join("donnees_shp")).expect("mkdir");
        std::fs::write(
            dir.path().join("donnees_shp/regions.geojson"),
            r#"{"type":"FeatureCollection","features":[]}"#,
        )
        .expect("write asset");
        let state = AppState::new(["hopitaux"], dir.path().to_path_buf(), 100);
        let (addr, server_handle) = spawn_test_server(state).await;
        let assets = StaticAssets::http(Client::new(), format!("http://{addr}/"));

        let value = assets
            .read("/donnees_shp/regions.geojson")
            .await
            .expect("asset");
        assert_eq!(value["type"], "FeatureCollection");

        let missing = assets.read("/donnees_shp/absent.geojson").await;
        assert!(matches!(missing, Err(LoadError::Status { status: 404, .. })));

        server_handle.abort();
        let _ = server_handle.await;
    }
}
