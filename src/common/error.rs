// Error handling types for the API

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;
use tracing::error;

use super::validation::ValidationResult;
use crate::oauth::FlowError;
use crate::storage::StorageError;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalServer(String),
    StorageError(StorageError),
    ValidationError(String),
    InvalidState(String),
    ReauthorizationRequired(String),
    ProviderError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalServer(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::StorageError(e) => write!(f, "Storage Error: {}", e),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::InvalidState(msg) => write!(f, "Invalid State: {}", msg),
            ApiError::ReauthorizationRequired(msg) => {
                write!(f, "Reauthorization Required: {}", msg)
            }
            ApiError::ProviderError(msg) => write!(f, "Provider Error: {}", msg),
        }
    }
}

/// JSON error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    /// Status code and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::InternalServer(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
            }
            ApiError::StorageError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            ApiError::ValidationError(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::InvalidState(_) => (StatusCode::BAD_REQUEST, "INVALID_STATE"),
            ApiError::ReauthorizationRequired(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "REAUTHORIZATION_REQUIRED")
            }
            ApiError::ProviderError(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
        }
    }

    /// Client-safe message; storage details are only logged
    pub fn public_message(&self) -> String {
        match self {
            ApiError::StorageError(_) => "Storage operation failed".to_string(),
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalServer(msg)
            | ApiError::ValidationError(msg)
            | ApiError::InvalidState(msg)
            | ApiError::ReauthorizationRequired(msg)
            | ApiError::ProviderError(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if let ApiError::StorageError(e) = &self {
            error!(error = %e, "Storage error occurred");
        }

        let (status, code) = self.status_and_code();
        let error_response = ErrorResponse {
            error: self.public_message(),
            code: code.to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(msg) => ApiError::Conflict(msg),
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::StorageError(other),
        }
    }
}

/// Flow errors carry provider diagnostics; only the non-sensitive part reaches the client.
impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            FlowError::InvalidCallback(msg) => ApiError::BadRequest(msg),
            FlowError::UnknownProvider(name) => {
                ApiError::NotFound(format!("unknown provider: {}", name))
            }
            FlowError::InvalidState => ApiError::InvalidState(
                "authorization state is invalid or expired, please reconnect".to_string(),
            ),
            FlowError::AuthorizationDenied(_) => {
                ApiError::BadRequest("authorization was denied by the provider".to_string())
            }
            FlowError::TokenExchangeFailed { .. } => ApiError::ProviderError(
                "could not complete authorization, please reconnect your account".to_string(),
            ),
            FlowError::NoRefreshToken => {
                ApiError::NotFound("no refresh token found, please reconnect".to_string())
            }
            FlowError::RefreshFailed { .. } => ApiError::ReauthorizationRequired(
                "token refresh failed, please reconnect your account".to_string(),
            ),
            FlowError::IdentityFetchFailed(_) => ApiError::ProviderError(
                "could not load the account profile from the provider".to_string(),
            ),
            FlowError::IdentityConflict => ApiError::Conflict(
                "this provider account is already linked to another user".to_string(),
            ),
            FlowError::Internal(msg) => ApiError::InternalServer(msg),
            FlowError::Storage(e) => ApiError::from(e),
        }
    }
}

/// Helper function to convert ValidationResult to ApiError
impl From<ValidationResult> for ApiError {
    fn from(result: ValidationResult) -> Self {
        if result.is_valid {
            ApiError::InternalServer(
                "Validation result was valid but converted to error".to_string(),
            )
        } else {
            let error_messages: Vec<String> = result
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            ApiError::ValidationError(error_messages.join(", "))
        }
    }
}
