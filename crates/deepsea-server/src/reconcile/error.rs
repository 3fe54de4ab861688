use deepsea_core::CoreError;
use deepsea_storage::StorageError;
use thiserror::Error;

/// Outcome classes of a failed reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A dependency is missing or unreachable; the key is retried with backoff.
    #[error("Transient reconcile failure: {0}")]
    Transient(String),

    /// The record itself is bad; the key is dropped until it changes again.
    #[error("Permanent reconcile failure: {0}")]
    Permanent(String),

    /// The registry can no longer be trusted; the controller halts.
    #[error("Fatal reconcile failure: {0}")]
    Fatal(String),
}

impl ReconcileError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<StorageError> for ReconcileError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } | StorageError::BackendUnavailable { .. } => {
                Self::Transient(err.to_string())
            }
            StorageError::InvalidResource { .. }
            | StorageError::UnknownValue { .. }
            | StorageError::Conflict { .. } => Self::Permanent(err.to_string()),
            StorageError::Internal { .. } => Self::Fatal(err.to_string()),
        }
    }
}

impl From<CoreError> for ReconcileError {
    fn from(err: CoreError) -> Self {
        Self::Permanent(err.to_string())
    }
}
