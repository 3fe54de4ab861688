use thiserror::Error;

/// Core error types for DeepSea data and control operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid value '{name}': {message}")]
    InvalidValue { name: String, message: String },

    #[error("Unknown value name: {0}")]
    UnknownValue(String),

    #[error("Duplicate value name '{name}' in {list}")]
    DuplicateValue { name: String, list: String },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Invalid pump schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid resource data: {message}")]
    InvalidResource { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new InvalidValue error
    pub fn invalid_value(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a new UnknownValue error
    pub fn unknown_value(name: impl Into<String>) -> Self {
        Self::UnknownValue(name.into())
    }

    /// Create a new DuplicateValue error
    pub fn duplicate_value(name: impl Into<String>, list: impl Into<String>) -> Self {
        Self::DuplicateValue {
            name: name.into(),
            list: list.into(),
        }
    }

    pub fn invalid_quantity(message: impl Into<String>) -> Self {
        Self::InvalidQuantity(message.into())
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion(message.into())
    }

    pub fn invalid_schedule(message: impl Into<String>) -> Self {
        Self::InvalidSchedule(message.into())
    }

    /// Create a new InvalidResource error
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    /// Whether the error stems from malformed input data and will not go away on retry.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::UnknownValue(_))
    }
}

/// Result type alias for DeepSea core operations
pub type Result<T> = std::result::Result<T, CoreError>;
