use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_STATIC_ROOT: &str = "public";
pub const DEFAULT_MAX_PAGES: usize = 50;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_FEATURE_NAME: &str = "New feature";
pub const USER_AGENT: &str = "carte-client/0.1";

// View
pub const DEFAULT_CANVAS_WIDTH: f64 = 1280.0;
pub const DEFAULT_CANVAS_HEIGHT: f64 = 850.0;
pub const DEFAULT_HIT_TOLERANCE_PX: f64 = 5.0;
pub const SELECTION_CHANNEL_CAPACITY: usize = 64;

// Camera, in lon/lat degrees
pub const INITIAL_CENTER_LONLAT: (f64, f64) = (-14.5, 14.5);
pub const INITIAL_ZOOM: f64 = 8.0;
pub const HOME_CENTER_LONLAT: (f64, f64) = (-17.35, 14.76);
pub const HOME_ZOOM: f64 = 12.0;
pub const HOME_DURATION_MS: f64 = 800.0;
pub const MIN_ZOOM: f64 = 0.0;
pub const MAX_ZOOM: f64 = 20.0;

/// Base URL of the remote feature store, without a trailing slash.
pub fn api_base_url() -> String {
    std::env::var("CARTE_API_BASE_URL")
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
}

/// Root for `static:` sources: an http(s) URL or a local directory.
pub fn static_root() -> String {
    std::env::var("CARTE_STATIC_ROOT")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_STATIC_ROOT.to_string())
}

pub fn page_size() -> Option<usize> {
    std::env::var("CARTE_PAGE_SIZE")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

pub fn max_pages() -> usize {
    std::env::var("CARTE_MAX_PAGES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_PAGES)
}

pub fn http_timeout() -> Duration {
    std::env::var("CARTE_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
}

pub fn connect_timeout() -> Duration {
    std::env::var("CARTE_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
}

pub fn layers_file() -> Option<PathBuf> {
    std::env::var("CARTE_LAYERS_FILE")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

pub fn default_feature_name() -> String {
    std::env::var("CARTE_DEFAULT_FEATURE_NAME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FEATURE_NAME.to_string())
}

pub fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    let request_timeout = http_timeout();
    let connect_timeout = connect_timeout();
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .build()
        .or_else(|e| {
            warn!(
                error = %e,
                "failed to build configured HTTP client, retrying without custom user-agent"
            );
            reqwest::Client::builder()
                .timeout(request_timeout)
                .connect_timeout(connect_timeout)
                .build()
        })
}
