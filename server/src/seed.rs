use std::path::{Path, PathBuf};

use carte_shared::{DecodeError, normalize_geojson};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} is not JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{path} is not GeoJSON: {source}")]
    Decode {
        path: PathBuf,
        source: DecodeError,
    },
}

/// Load `<dir>/<collection>.geojson` into every configured collection.
/// Missing files are skipped; unreadable ones are logged and skipped.
pub async fn seed_from_dir(state: &AppState, dir: &Path) -> usize {
    let names: Vec<String> = state.collections.iter().map(|e| e.key().clone()).collect();
    let mut total = 0;
    for name in names {
        let path = dir.join(format!("{name}.geojson"));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            continue;
        }
        match seed_collection(state, &name, &path).await {
            Ok(loaded) => {
                info!(collection = %name, loaded, "seeded collection");
                total += loaded;
            }
            Err(e) => warn!(collection = %name, error = %e, "skipping seed file"),
        }
    }
    total
}

pub async fn seed_collection(state: &AppState, name: &str, path: &Path) -> Result<usize, SeedError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| SeedError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value = serde_json::from_slice(&bytes).map_err(|source| SeedError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let collection = normalize_geojson(value)
        .map_err(|source| SeedError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .unwrap_or_default();
    Ok(state.seed(name, collection))
}
