use std::fmt;

use carte_shared::DecodeError;
use thiserror::Error;

use crate::edit::EditMode;

/// One layer's data could not be loaded. Isolated to that layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{url} unreachable: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned an unreadable body: {reason}")]
    Body { url: String, reason: String },
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// The remote store rejected, or never answered, a create/update/delete.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("{operation} {url} unreachable: {reason}")]
    Unreachable {
        operation: SyncOperation,
        url: String,
        reason: String,
    },
    #[error("{operation} {url} rejected with HTTP {status}")]
    Rejected {
        operation: SyncOperation,
        url: String,
        status: u16,
    },
    #[error("{operation} response unreadable: {reason}")]
    InvalidResponse {
        operation: SyncOperation,
        reason: String,
    },
    #[error("created feature came back without an id")]
    MissingId,
}

impl SyncError {
    pub fn operation(&self) -> SyncOperation {
        match self {
            Self::Unreachable { operation, .. }
            | Self::Rejected { operation, .. }
            | Self::InvalidResponse { operation, .. } => *operation,
            Self::MissingId => SyncOperation::Create,
        }
    }
}

/// A user edit action whose preconditions do not hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("no editable layer is bound")]
    NoEditableLayer,
    #[error("layer {0} is not editable")]
    NotEditable(String),
    #[error("layer {0} has no loaded features to edit")]
    LayerNotLoaded(String),
    #[error("cannot switch layers or modes while {0}")]
    Busy(EditMode),
    #[error("this action requires {expected} mode (currently {actual})")]
    WrongMode { expected: EditMode, actual: EditMode },
    #[error("layer {layer} expects {expected} geometries, got {actual}")]
    GeometryKind {
        layer: String,
        expected: String,
        actual: &'static str,
    },
    #[error("select a feature first")]
    NoSelection,
    #[error("the selected feature does not belong to the editable layer {0}")]
    SelectionOutsideLayer(String),
    #[error("the selected feature has not been saved yet")]
    NotPersisted,
    #[error("a delete for feature {0} is already in flight")]
    DeleteInFlight(String),
    #[error("feature {0} is not in the editable layer")]
    UnknownRecord(String),
    #[error("feature {0} is still being saved, edit it once the save is confirmed")]
    SavePending(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate layer id {0:?}")]
    DuplicateId(String),
    #[error("layer id must not be empty")]
    EmptyId,
    #[error("layer {id}: fit policy needs a finite max zoom and a non-negative duration")]
    InvalidFit { id: String },
    #[error("unknown layer {0:?}")]
    UnknownLayer(String),
    #[error("cannot read layer definitions from {path}: {reason}")]
    File { path: String, reason: String },
}
