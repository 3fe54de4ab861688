use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use deepsea_core::{CoreError, Device, DeviceSpec, DeviceStatus, Module, OwnerReference};
use deepsea_storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON body of every error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Machine-readable code: invalid | not-found | conflict | exception
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        match self {
            ApiError::BadRequest(msg) => ErrorBody::new("invalid", msg),
            ApiError::NotFound(msg) => ErrorBody::new("not-found", msg),
            ApiError::Conflict(msg) => ErrorBody::new("conflict", msg),
            ApiError::Unavailable(msg) => ErrorBody::new("unavailable", msg),
            ApiError::Internal(msg) => ErrorBody::new("exception", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::to_vec(&self.to_body()).unwrap_or_else(|_| b"{}".to_vec());

        let mut response = Response::new(axum::body::Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } | StorageError::UnknownValue { .. } => {
                Self::NotFound(err.to_string())
            }
            StorageError::InvalidResource { .. } => Self::BadRequest(err.to_string()),
            StorageError::Conflict { .. } => Self::Conflict(err.to_string()),
            StorageError::BackendUnavailable { .. } => Self::Unavailable(err.to_string()),
            StorageError::Internal { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownValue(_) => Self::NotFound(err.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("Malformed JSON: {err}"))
    }
}

// -------------------------
// Request and response bodies
// -------------------------

/// Body of `PUT /api/devices/{name}`.
///
/// `status` is optional: when absent the stored status is preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DevicePayload {
    pub name: String,
    #[serde(default)]
    pub spec: DeviceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    /// Accepted for round-tripping GET output; owner references are managed by
    /// the controllers and ignored on write.
    #[serde(
        default,
        rename = "ownerReferences",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub owner_references: Vec<OwnerReference>,
}

impl From<Device> for DevicePayload {
    fn from(device: Device) -> Self {
        Self {
            name: device.name,
            spec: device.spec,
            status: Some(device.status),
            owner_references: device.owner_references,
        }
    }
}

/// Body of `GET /api`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Overview {
    pub modules: Vec<Module>,
    pub devices: Vec<Device>,
}

/// Body of `GET /healthz`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub modules: usize,
    pub devices: usize,
    pub subscribers: usize,
}

/// Check that the name in a request body matches the path.
pub fn ensure_name_matches(path_name: &str, body_name: &str) -> Result<(), ApiError> {
    if path_name == body_name {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "Body name '{body_name}' does not match path name '{path_name}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepsea_core::ResourceKind;

    #[test]
    fn test_storage_error_mapping() {
        let err: ApiError = StorageError::not_found(ResourceKind::Device, "pump").into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = StorageError::unknown_value("pump", "temperature").into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err: ApiError = StorageError::invalid_resource("bad").into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = StorageError::internal("boom").into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_name_mismatch() {
        assert!(ensure_name_matches("pump", "pump").is_ok());
        let err = ensure_name_matches("pump", "sensor").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_device_payload_status_optional() {
        let payload: DevicePayload =
            serde_json::from_str(r#"{"name":"pump","spec":{"inputs":[]}}"#).unwrap();
        assert!(payload.status.is_none());

        let payload: DevicePayload = serde_json::from_str(
            r#"{"name":"sensor","status":{"outputs":[{"name":"pressure","type":"Float","value":"9.5"}]}}"#,
        )
        .unwrap();
        assert_eq!(payload.status.unwrap().outputs.len(), 1);
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = ApiError::not_found("Device/pump").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "not-found");
        assert_eq!(body.message, "Device/pump");
    }
}
