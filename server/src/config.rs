use std::path::PathBuf;

pub const DEFAULT_SERVER_PORT: u16 = 8000;
pub const DEFAULT_STATIC_DIR: &str = "public";
pub const DEFAULT_COLLECTIONS: &str = "hopitaux,ecoles";
pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

pub fn server_port() -> u16 {
    std::env::var("CARTE_SERVER_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_SERVER_PORT)
}

pub fn static_dir() -> PathBuf {
    std::env::var("CARTE_STATIC_DIR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR))
}

/// Collection names served under `/api/{name}/`.
pub fn collections() -> Vec<String> {
    let raw = std::env::var("CARTE_COLLECTIONS").unwrap_or_else(|_| DEFAULT_COLLECTIONS.into());
    let names = parse_collections(&raw);
    if names.is_empty() {
        parse_collections(DEFAULT_COLLECTIONS)
    } else {
        names
    }
}

fn parse_collections(raw: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(',').map(|n| n.trim().trim_matches('/')) {
        if !name.is_empty() && !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}

pub fn seed_dir() -> Option<PathBuf> {
    std::env::var("CARTE_SEED_DIR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

pub fn max_page_size() -> usize {
    std::env::var("CARTE_MAX_PAGE_SIZE")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_PAGE_SIZE)
}
