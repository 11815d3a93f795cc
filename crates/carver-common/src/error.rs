//! Error types for Carver service composition
//!
//! Errors are structured with fields so callers can tell which extension,
//! listener, or resource path tripped them. None of them are retryable:
//! a failed composition leaves no valid service behind and the caller must
//! discard the attempt.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Carver operations
#[derive(Debug, Error)]
pub enum Error {
    /// The same extension instance was registered twice on one service
    #[error("extension {type_name} was registered twice on the same service")]
    DuplicateExtension {
        /// Type tag of the offending extension
        type_name: String,
    },

    /// More than one listener binding produced a mesh-level listener
    #[error("found {count} mesh listeners but a virtual node supports at most one")]
    MultipleMeshListeners {
        /// Number of bindings that carried a mesh listener
        count: usize,
    },

    /// Environment given a service discovery namespace kind it cannot use
    #[error("namespace type {namespace_type} is not supported; only public and private DNS namespaces are")]
    UnsupportedNamespaceType {
        /// The rejected namespace type
        namespace_type: String,
    },

    /// Route match prefix that does not start with a forward slash
    #[error("prefix path '{path}' must start with a forward slash")]
    InvalidPath {
        /// The rejected prefix
        path: String,
    },

    /// Proxy listener given both or neither credential sources
    #[error("conflicting credentials: {message}")]
    ConflictingCredentials {
        /// Description of the conflict
        message: String,
    },

    /// Two resources were emitted under the same scope path
    #[error("a resource already exists at {path}")]
    DuplicateResourceId {
        /// Full scope path of the resource
        path: String,
    },

    /// Environment variables were published after containers were finalized
    #[error("environment variables [{}] were published after the workload environment was frozen", keys.join(", "))]
    EnvironmentFrozen {
        /// Keys of the late variables
        keys: Vec<String>,
    },

    /// Invalid configuration
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "containerPort")
        field: Option<String>,
    },

    /// The infrastructure collaborator refused or failed a request
    #[error("infrastructure error at {path}: {message}")]
    Infrastructure {
        /// Scope path of the resource being provisioned
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being (de)serialized (if known)
        kind: Option<String>,
    },
}

impl Error {
    /// Create a duplicate extension error
    pub fn duplicate_extension(type_name: impl Into<String>) -> Self {
        Self::DuplicateExtension {
            type_name: type_name.into(),
        }
    }

    /// Create an invalid path error
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    /// Create a conflicting credentials error
    pub fn conflicting_credentials(msg: impl Into<String>) -> Self {
        Self::ConflictingCredentials {
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an infrastructure error without a known resource path
    pub fn infrastructure(msg: impl Into<String>) -> Self {
        Self::Infrastructure {
            path: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create an infrastructure error for a resource path
    pub fn infrastructure_at(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Infrastructure {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
