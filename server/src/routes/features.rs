use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use carte_shared::{Feature, FeatureCollection};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown collection `{0}`")]
    UnknownCollection(String),
    #[error("feature {id} not found in `{collection}`")]
    FeatureNotFound { collection: String, id: String },
    #[error("page {0} is out of range")]
    PageOutOfRange(usize),
    #[error("invalid feature payload: {0}")]
    InvalidPayload(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page_size: Option<usize>,
    pub page: Option<usize>,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "collections": state.counts(),
    }))
}

/// Without `page_size` the whole collection is returned as a FeatureCollection.
/// With it, one page is wrapped in a `{count, next, previous, results}` envelope.
pub async fn list_features(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<ListQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let features = state
        .list(&collection)
        .ok_or_else(|| ApiError::UnknownCollection(collection.clone()))?;

    let Some(page_size) = query.page_size else {
        return Ok(Json(FeatureCollection::new(features)).into_response());
    };
    let page_size = page_size.clamp(1, state.max_page_size);
    let page = query.page.unwrap_or(1).max(1);
    let count = features.len();
    let start = (page - 1).saturating_mul(page_size);
    if page > 1 && start >= count {
        return Err(ApiError::PageOutOfRange(page));
    }

    let results: Vec<Feature> = features.into_iter().skip(start).take(page_size).collect();
    let base = collection_base(&headers, &collection);
    let link = |page: usize| Value::String(format!("{base}?page={page}&page_size={page_size}"));
    let next = if start + results.len() < count {
        link(page + 1)
    } else {
        Value::Null
    };
    let previous = if page > 1 { link(page - 1) } else { Value::Null };

    debug!(%collection, page, page_size, count, "listing features");
    Ok(Json(json!({
        "count": count,
        "next": next,
        "previous": previous,
        "results": results,
    }))
    .into_response())
}

/// Absolute when the request named its host, otherwise a path the client resolves itself.
fn collection_base(headers: &HeaderMap, collection: &str) -> String {
    let path = format!("/api/{collection}/");
    match headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty())
    {
        Some(host) => format!("http://{host}{path}"),
        None => path,
    }
}

pub async fn create_feature(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Feature>), ApiError> {
    if !state.has_collection(&collection) {
        return Err(ApiError::UnknownCollection(collection));
    }
    let feature = Feature::from_store_response(payload)
        .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
    if feature.geometry.is_none() {
        return Err(ApiError::InvalidPayload("geometry is required".into()));
    }

    let created = state
        .insert(&collection, feature)
        .ok_or_else(|| ApiError::UnknownCollection(collection.clone()))?;
    if let Some(id) = &created.id {
        info!(%collection, %id, "feature created");
    }
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_feature(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Feature>, ApiError> {
    let key = parse_id(&collection, &id)?;
    state
        .get(&collection, key)
        .map(Json)
        .ok_or_else(|| missing(&state, collection, id))
}

pub async fn patch_feature(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Result<Json<Feature>, ApiError> {
    let key = parse_id(&collection, &id)?;
    let patch = Feature::from_store_response(payload)
        .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
    let patched = state
        .patch(&collection, key, patch)
        .ok_or_else(|| missing(&state, collection.clone(), id.clone()))?;
    info!(%collection, %id, "feature updated");
    Ok(Json(patched))
}

pub async fn delete_feature(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let key = parse_id(&collection, &id)?;
    state
        .remove(&collection, key)
        .ok_or_else(|| missing(&state, collection.clone(), id.clone()))?;
    info!(%collection, %id, "feature deleted");
    Ok(StatusCode::NO_CONTENT)
}

fn parse_id(collection: &str, id: &str) -> Result<i64, ApiError> {
    id.parse().map_err(|_| ApiError::FeatureNotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    })
}

fn missing(state: &AppState, collection: String, id: String) -> ApiError {
    if state.has_collection(&collection) {
        ApiError::FeatureNotFound { collection, id }
    } else {
        ApiError::UnknownCollection(collection)
    }
}
