use std::path::{Component, Path, PathBuf};

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::error::LoadError;
use crate::store::StoreFuture;

/// Reads the files behind `static:` sources.
pub trait AssetSource: Send + Sync {
    fn read<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Value, LoadError>;
}

#[derive(Debug, Clone)]
enum AssetRoot {
    Http { base: String, client: Client },
    Dir(PathBuf),
}

/// Static GeoJSON files served over HTTP or read from a local directory.
#[derive(Debug, Clone)]
pub struct StaticAssets {
    root: AssetRoot,
}

impl StaticAssets {
    pub fn http(client: Client, base: impl Into<String>) -> Self {
        Self {
            root: AssetRoot::Http {
                base: base.into().trim_end_matches('/').to_string(),
                client,
            },
        }
    }

    pub fn dir(root: impl Into<PathBuf>) -> Self {
        Self {
            root: AssetRoot::Dir(root.into()),
        }
    }

    /// An `http(s)://` location is fetched, anything else is a directory.
    pub fn from_location(location: &str, client: Client) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::http(client, location)
        } else {
            Self::dir(location)
        }
    }

    async fn fetch(base: &str, client: &Client, path: &str) -> Result<Value, LoadError> {
        let url = format!("{base}/{}", path.trim_start_matches('/'));
        debug!(%url, "fetching static asset");
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| LoadError::Unreachable {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(LoadError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        response.json::<Value>().await.map_err(|e| LoadError::Body {
            url,
            reason: e.to_string(),
        })
    }

    async fn read_file(root: &Path, path: &str) -> Result<Value, LoadError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let io_error = |reason: String| LoadError::Io {
            path: path.to_string(),
            reason,
        };
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io_error("path escapes the asset root".into()));
        }

        let full = root.join(relative);
        debug!(path = %full.display(), "reading static asset");
        let bytes = tokio::fs::read(&full)
            .await
            .map_err(|e| io_error(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| io_error(e.to_string()))
    }
}

impl AssetSource for StaticAssets {
    fn read<'a>(&'a self, path: &'a str) -> StoreFuture<'a, Value, LoadError> {
        match &self.root {
            AssetRoot::Http { base, client } => Box::pin(Self::fetch(base, client, path)),
            AssetRoot::Dir(root) => Box::pin(Self::read_file(root, path)),
        }
    }
}
