use thiserror::Error;

/// A payload that could not be read as feature data.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not feature data (found {found})")]
    Unrecognized { found: &'static str },
    #[error("malformed feature data: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("position needs at least 2 ordinates, got {len}")]
    Position { len: usize },
    #[error("invalid source descriptor {0:?} (expected static:<path> or dynamic:<key>)")]
    SourceDescriptor(String),
    #[error("invalid color {0:?}")]
    Color(String),
}

/// Short JSON kind name used in diagnostics.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
