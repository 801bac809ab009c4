//! Error types for the ring simulator
//!
//! This module defines the error taxonomy shared by ring membership,
//! routing, storage and bulk transfer.

use std::fmt;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, RingError>;

/// Error type for ring operations
#[derive(Debug, Clone)]
pub enum RingError {
    /// `join` was called on a node that is already part of a ring
    AlreadyJoined {
        node: String,
    },

    /// `leave` was called on a node that is not part of a ring
    NotJoined {
        node: String,
    },

    /// The owning node has no entry for the requested key
    KeyNotFound {
        key: String,
        node: Option<String>,
    },

    /// Blob relocation during join/leave could not complete
    MigrationFailure {
        message: String,
        node: Option<String>,
        source: Option<String>,
    },

    /// Storage backend errors
    StorageError {
        message: String,
        namespace: Option<String>,
        source: Option<String>,
    },

    /// A node name was not found in the network
    UnknownNode {
        node: String,
    },

    /// A node with the same name or identifier already exists
    DuplicateNode {
        node: String,
    },

    /// The ring walk did not reach an owner
    RoutingError {
        message: String,
        key: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Validation errors
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl RingError {
    /// Create a new AlreadyJoined error
    pub fn already_joined(node: impl Into<String>) -> Self {
        RingError::AlreadyJoined { node: node.into() }
    }

    /// Create a new NotJoined error
    pub fn not_joined(node: impl Into<String>) -> Self {
        RingError::NotJoined { node: node.into() }
    }

    /// Create a new KeyNotFound error naming the owning node
    pub fn key_not_found_at(key: impl Into<String>, node: impl Into<String>) -> Self {
        RingError::KeyNotFound {
            key: key.into(),
            node: Some(node.into()),
        }
    }

    /// Create a new MigrationFailure with node and source
    pub fn migration_failure_full(
        message: impl Into<String>,
        node: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        RingError::MigrationFailure {
            message: message.into(),
            node: Some(node.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new StorageError
    pub fn storage_error(message: impl Into<String>) -> Self {
        RingError::StorageError {
            message: message.into(),
            namespace: None,
            source: None,
        }
    }

    /// Create a new StorageError with namespace
    pub fn storage_error_with_namespace(message: impl Into<String>, namespace: impl Into<String>) -> Self {
        RingError::StorageError {
            message: message.into(),
            namespace: Some(namespace.into()),
            source: None,
        }
    }

    /// Create a new StorageError with namespace and source
    pub fn storage_error_full(
        message: impl Into<String>,
        namespace: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        RingError::StorageError {
            message: message.into(),
            namespace: Some(namespace.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new UnknownNode error
    pub fn unknown_node(node: impl Into<String>) -> Self {
        RingError::UnknownNode { node: node.into() }
    }

    /// Create a new DuplicateNode error
    pub fn duplicate_node(node: impl Into<String>) -> Self {
        RingError::DuplicateNode { node: node.into() }
    }

    /// Create a new RoutingError
    pub fn routing_error(message: impl Into<String>) -> Self {
        RingError::RoutingError {
            message: message.into(),
            key: None,
        }
    }

    /// Create a new RoutingError with key
    pub fn routing_error_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        RingError::RoutingError {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        RingError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new ValidationError
    pub fn validation_error(message: impl Into<String>) -> Self {
        RingError::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ValidationError with field
    pub fn validation_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        RingError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Whether the error is an informational no-op (the call was skipped)
    pub fn is_noop(&self) -> bool {
        matches!(self, RingError::AlreadyJoined { .. } | RingError::NotJoined { .. })
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            RingError::MigrationFailure { source, .. } | RingError::StorageError { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            RingError::RoutingError { message, .. }
            | RingError::ConfigError { message, .. }
            | RingError::ValidationError { message, .. } => {
                *message = format!("{}: {}", message, ctx);
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::AlreadyJoined { node } => write!(f, "Node already in the network: {}", node),
            RingError::NotJoined { node } => write!(f, "Node not in any network: {}", node),
            RingError::KeyNotFound { key, node } => match node {
                Some(n) => write!(f, "Key not found: {} (owner: {})", key, n),
                None => write!(f, "Key not found: {}", key),
            },
            RingError::MigrationFailure { message, node, source } => match (node, source) {
                (Some(n), Some(s)) => write!(f, "Migration failure: {} (node: {}, source: {})", message, n, s),
                (Some(n), None) => write!(f, "Migration failure: {} (node: {})", message, n),
                (None, Some(s)) => write!(f, "Migration failure: {} (source: {})", message, s),
                (None, None) => write!(f, "Migration failure: {}", message),
            },
            RingError::StorageError { message, namespace, source } => match (namespace, source) {
                (Some(ns), Some(s)) => write!(f, "Storage error: {} (namespace: {}, source: {})", message, ns, s),
                (Some(ns), None) => write!(f, "Storage error: {} (namespace: {})", message, ns),
                (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                (None, None) => write!(f, "Storage error: {}", message),
            },
            RingError::UnknownNode { node } => write!(f, "Unknown node: {}", node),
            RingError::DuplicateNode { node } => write!(f, "Duplicate node: {}", node),
            RingError::RoutingError { message, key } => {
                if let Some(k) = key {
                    write!(f, "Routing error: {} (key: {})", message, k)
                } else {
                    write!(f, "Routing error: {}", message)
                }
            }
            RingError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            RingError::ValidationError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Validation error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Validation error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for RingError {}

impl From<std::io::Error> for RingError {
    fn from(err: std::io::Error) -> Self {
        RingError::storage_error_full(err.to_string(), "unknown".to_string(), err.kind().to_string())
    }
}

impl From<serde_json::Error> for RingError {
    fn from(err: serde_json::Error) -> Self {
        RingError::validation_error(format!("Failed to parse JSON data: {}", err))
    }
}

impl From<hex::FromHexError> for RingError {
    fn from(err: hex::FromHexError) -> Self {
        RingError::validation_error(format!("Invalid hex payload: {}", err))
    }
}
