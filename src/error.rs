//! Error handling for the scene synchronization core
//!
//! Every fallible operation returns [`SceneResult`]. Errors are grouped in
//! categories so the session can decide how loud to be about them: parse
//! failures drop a whole message, missing ids are routine (late deletes),
//! unsupported constructs and texture failures degrade to placeholders.

use crate::scene::NodeId;

/// Result type for scene operations
pub type SceneResult<T> = Result<T, SceneError>;

/// Coarse classification of a [`SceneError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Parse,
    NotFound,
    UnsupportedField,
    AsyncLoad,
    Protocol,
    Config,
}

/// Errors raised while parsing, mutating or loading a scene
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("Malformed markup at byte {position}: {message}")]
    MalformedMarkup { position: usize, message: String },

    #[error("Invalid value for {kind}.{field}: {message}")]
    InvalidField {
        kind: String,
        field: String,
        message: String,
    },

    #[error("USE reference to unknown node '{id}'")]
    UnresolvedUse { id: String },

    #[error("No such node: {id}")]
    NotFound { id: String },

    #[error("Node id '{id}' is already registered to a live node")]
    DuplicateId { id: String },

    #[error("The scene already has a root node")]
    RootExists,

    #[error("Field '{field}' cannot be addressed on {kind} node '{id}'")]
    InvalidFieldPath {
        id: String,
        kind: String,
        field: String,
    },

    #[error("Unsupported {kind}.{field}: {reason}")]
    UnsupportedField {
        kind: String,
        field: String,
        reason: String,
    },

    #[error("Texture '{url}' failed to load: {error}")]
    AsyncLoad { url: String, error: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl SceneError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SceneError::MalformedMarkup { .. }
            | SceneError::InvalidField { .. }
            | SceneError::UnresolvedUse { .. }
            | SceneError::Json(_) => ErrorCategory::Parse,
            SceneError::NotFound { .. } => ErrorCategory::NotFound,
            SceneError::DuplicateId { .. }
            | SceneError::RootExists
            | SceneError::InvalidFieldPath { .. }
            | SceneError::Protocol { .. } => ErrorCategory::Protocol,
            SceneError::UnsupportedField { .. } => ErrorCategory::UnsupportedField,
            SceneError::AsyncLoad { .. } => ErrorCategory::AsyncLoad,
            SceneError::Config { .. } => ErrorCategory::Config,
        }
    }

    /// Whether the message that raised this error can simply be dropped
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::NotFound | ErrorCategory::UnsupportedField | ErrorCategory::AsyncLoad
        )
    }
}

/// Create a field parse error
pub fn invalid_field(kind: &str, field: &str, message: impl Into<String>) -> SceneError {
    SceneError::InvalidField {
        kind: kind.to_string(),
        field: field.to_string(),
        message: message.into(),
    }
}

/// Create a missing-node error
pub fn not_found(id: impl std::fmt::Display) -> SceneError {
    SceneError::NotFound { id: id.to_string() }
}

/// Create a protocol error
pub fn protocol_error(message: impl Into<String>) -> SceneError {
    SceneError::Protocol {
        message: message.into(),
    }
}

/// Create an unsupported construct error
pub fn unsupported_field(kind: &str, field: &str, reason: impl Into<String>) -> SceneError {
    SceneError::UnsupportedField {
        kind: kind.to_string(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Helper trait turning lookups into [`SceneError::NotFound`]
pub trait SceneErrorContext<T> {
    fn or_not_found(self, id: &NodeId) -> SceneResult<T>;
}

impl<T> SceneErrorContext<T> for Option<T> {
    fn or_not_found(self, id: &NodeId) -> SceneResult<T> {
        self.ok_or_else(|| not_found(id))
    }
}
