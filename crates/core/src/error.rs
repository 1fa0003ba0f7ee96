use crate::ResourceKindTag;

/// Errors raised while subscribing to or translating change events.
///
/// None of these is fatal: translation errors drop a single event and setup
/// errors leave a single kind unwired.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("object type mismatch for kind {kind}: {detail}")]
    TypeMismatch { kind: ResourceKindTag, detail: String },
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("lookup: {0}")]
    Lookup(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("subscription setup failed for kind {kind}: {reason}")]
    Setup { kind: ResourceKindTag, reason: String },
    #[error("no handler registered for kind {0}")]
    UnknownKind(ResourceKindTag),
}

impl WatchError {
    pub fn mismatch(kind: ResourceKindTag, detail: impl Into<String>) -> Self {
        WatchError::TypeMismatch { kind, detail: detail.into() }
    }

    /// Short stable label used for metrics.
    pub fn class(&self) -> &'static str {
        match self {
            WatchError::TypeMismatch { .. } => "type_mismatch",
            WatchError::NotFound(_) => "not_found",
            WatchError::Lookup(_) => "lookup",
            WatchError::Encode(_) => "encode",
            WatchError::Setup { .. } => "setup",
            WatchError::UnknownKind(_) => "unknown_kind",
        }
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
