//! Error types for the execution core.
//!
//! One crate-wide error enum covers the whole taxonomy; the wire-facing
//! [`ErrorCode`] and [`ErrorEnvelope`] are derived from it so transport
//! adapters never match on the enum directly.

use serde::{Deserialize, Serialize};

/// A type alias for `Result<T, CoreError>`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The main error type for core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed input at a boundary. Nothing is persisted or executed.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// An identifier did not resolve.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// The kind of entity looked up ("agent", "tool", ...).
        kind: &'static str,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// An agent id collided on create.
    #[error("agent '{0}' already exists")]
    DuplicateId(String),

    /// A tool name collided on registration.
    #[error("tool '{0}' is already registered")]
    DuplicateName(String),

    /// Tool input failed to parse against the declared schema.
    ///
    /// Recovered into an observation by the runner; never fatal.
    #[error("bad arguments for tool '{tool}': {message}")]
    ToolBadArguments {
        /// The tool whose input failed to parse.
        tool: String,
        /// The parse failure.
        message: String,
    },

    /// A tool invoker failed or panicked.
    ///
    /// Recovered into an observation by the runner; never fatal.
    #[error("tool '{tool}' failed: {message}")]
    ToolInternal {
        /// The tool whose invoker failed.
        tool: String,
        /// The underlying failure.
        message: String,
    },

    /// The chat capability returned an error or timed out.
    #[error("model call failed: {message}")]
    ModelCall {
        /// The underlying failure.
        message: String,
    },

    /// The execution was cancelled from outside.
    #[error("execution cancelled")]
    Cancelled,

    /// The execution deadline elapsed.
    #[error("execution deadline exceeded")]
    DeadlineExceeded,

    /// Writing the catalog document failed; the mutation was rolled back.
    #[error("catalog persistence failed: {message}")]
    CatalogPersistence {
        /// The underlying I/O or serialization failure.
        message: String,
    },

    /// An optional capability (embedding, summarization) is not wired up or
    /// returned an error. Triggers the defined fallback; visible in logs only.
    #[error("capability unavailable: {capability}")]
    CapabilityUnavailable {
        /// Which capability was missing ("embedding", "summarization", ...).
        capability: &'static str,
    },
}

impl CoreError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error for the given entity kind.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a bad-arguments error for a tool invocation.
    #[must_use]
    pub fn bad_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolBadArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create an internal tool failure.
    #[must_use]
    pub fn tool_internal(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolInternal {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a model-call failure.
    #[must_use]
    pub fn model_call(message: impl Into<String>) -> Self {
        Self::ModelCall {
            message: message.into(),
        }
    }

    /// Create a catalog persistence failure.
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::CatalogPersistence {
            message: message.into(),
        }
    }

    /// The wire code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::DuplicateId(_) => ErrorCode::DuplicateId,
            Self::DuplicateName(_) => ErrorCode::DuplicateName,
            Self::ToolBadArguments { .. } => ErrorCode::ToolBadArguments,
            Self::ToolInternal { .. } => ErrorCode::ToolInternalError,
            Self::ModelCall { .. } => ErrorCode::ModelCallFailed,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            Self::CatalogPersistence { .. } => ErrorCode::CatalogPersistenceError,
            Self::CapabilityUnavailable { .. } => ErrorCode::CapabilityUnavailable,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation {
            message: err.to_string(),
        }
    }
}

/// Stable wire codes for the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed input at the boundary.
    ValidationError,
    /// Identifier does not resolve.
    NotFound,
    /// Agent id uniqueness violation.
    DuplicateId,
    /// Tool name uniqueness violation.
    DuplicateName,
    /// Tool input parse or schema mismatch.
    ToolBadArguments,
    /// Tool invoker failed or panicked.
    ToolInternalError,
    /// Inference capability errored or timed out.
    ModelCallFailed,
    /// Execution cancelled by the caller.
    Cancelled,
    /// Execution deadline elapsed.
    DeadlineExceeded,
    /// Catalog disk write failed.
    CatalogPersistenceError,
    /// Embedding or summarization capability unavailable.
    CapabilityUnavailable,
}

/// The structured error shape returned on the management and execution
/// surfaces: `(code, message, details?)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Taxonomy code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&CoreError> for ErrorEnvelope {
    fn from(err: &CoreError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            details: None,
        }
    }
}

impl From<CoreError> for ErrorEnvelope {
    fn from(err: CoreError) -> Self {
        Self::from(&err)
    }
}
