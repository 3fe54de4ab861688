//! Storage error types for the registry and the device backend.

use std::fmt;

use deepsea_core::CoreError;

/// Errors that can occur during registry or backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested resource was not found.
    #[error("Resource not found: {kind}/{name}")]
    NotFound {
        /// The kind of resource that was not found.
        kind: String,
        /// The name of the resource that was not found.
        name: String,
    },

    /// The resource data is invalid.
    #[error("Invalid resource: {message}")]
    InvalidResource {
        /// Description of why the resource is invalid.
        message: String,
    },

    /// A write named a value the device does not have and the system does not know.
    #[error("Unknown value '{value}' on device {device}")]
    UnknownValue { device: String, value: String },

    /// The write contradicts the stored record.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// The simulated backend cannot be reached.
    #[error("Backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(kind: impl fmt::Display, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            name: name.into(),
        }
    }

    /// Creates a new `InvalidResource` error.
    #[must_use]
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_value(device: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UnknownValue {
            device: device.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::BackendUnavailable { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::UnknownValue { .. } => ErrorCategory::NotFound,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::InvalidResource { .. } => ErrorCategory::Validation,
            Self::BackendUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownValue(value) => Self::UnknownValue {
                device: String::new(),
                value,
            },
            other => Self::invalid_resource(other.to_string()),
        }
    }
}

/// Categories of storage errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Validation,
    Infrastructure,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
