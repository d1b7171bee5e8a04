use std::path::Path;

use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, header},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::routes::features;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let static_assets = Router::new()
        .fallback_service(ServeDir::new(&state.static_dir).precompressed_gzip())
        .layer(middleware::from_fn(set_static_cache_control));

    let app = Router::new()
        .route("/api/health", get(features::health))
        .route(
            "/api/{collection}/",
            get(features::list_features).post(features::create_feature),
        )
        .route(
            "/api/{collection}/{id}/",
            get(features::get_feature)
                .patch(features::patch_feature)
                .delete(features::delete_feature),
        );

    app.layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .fallback_service(static_assets)
        .with_state(state)
}

async fn set_static_cache_control(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let mut response = next.run(request).await;

    if response.status().is_success()
        && let Some(cache_control) = cache_control_for_path(&path)
    {
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(cache_control),
        );
    }

    response
}

/// Reference layers change rarely; tiles and icons even less.
fn cache_control_for_path(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension().and_then(|ext| ext.to_str());
    if path.starts_with("/donnees_shp/") && matches!(ext, Some("geojson" | "json")) {
        return Some("public, max-age=3600");
    }

    if path.starts_with("/icons/") || matches!(ext, Some("png" | "svg" | "webp")) {
        return Some("public, max-age=86400");
    }

    None
}
