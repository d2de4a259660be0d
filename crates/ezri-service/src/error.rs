//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use ezri_store::StoreError;

use crate::stripe::StripeError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Valid credentials but the caller's role is not allowed.
    #[error("{0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input that is not a field validation failure.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request body failed to parse or validate.
    #[error("{message}")]
    Validation {
        /// Summary.
        message: String,
        /// Per-field errors.
        details: Option<serde_json::Value>,
    },

    /// The caller has no profile yet.
    #[error("Profile not found. Initialize your profile first.")]
    ProfileNotFound,

    /// The caller's active trial has ended.
    #[error("Your free trial has expired. Please upgrade to continue.")]
    TrialExpired,

    /// Not enough minutes for the requested session.
    #[error("Insufficient credits: {required} minutes required, {available} available")]
    InsufficientCredits {
        /// Minutes requested.
        required: i64,
        /// Minutes available across both pools.
        available: i64,
        /// Minutes missing.
        shortfall: i64,
    },

    /// Session not found or not owned by the caller.
    #[error("Session not found")]
    SessionNotFound,

    /// A dependency is not configured in this deployment.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

impl ApiError {
    /// Shorthand for a validation failure without field details.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", None),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", None),
            Self::Validation { details, .. } => {
                (StatusCode::BAD_REQUEST, "validation_error", details.clone())
            }
            Self::ProfileNotFound => (StatusCode::BAD_REQUEST, "profile_not_found", None),
            Self::TrialExpired => (StatusCode::BAD_REQUEST, "trial_expired", None),
            Self::InsufficientCredits {
                required,
                available,
                shortfall,
            } => (
                StatusCode::BAD_REQUEST,
                "insufficient_credits",
                Some(serde_json::json!({
                    "required": required,
                    "available": available,
                    "shortfall": shortfall,
                })),
            ),
            Self::SessionNotFound => (StatusCode::NOT_FOUND, "session_not_found", None),
            Self::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", None)
            }
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
            Self::ExternalService(_) => (StatusCode::BAD_GATEWAY, "external_service_error", None),
        };

        let message = match &self {
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                "An internal error occurred".to_string()
            }
            Self::Forbidden(msg) | Self::NotFound(msg) | Self::BadRequest(msg) => msg.clone(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "profile", ..
            } => Self::ProfileNotFound,
            StoreError::NotFound {
                entity: "session", ..
            } => Self::SessionNotFound,
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<StripeError> for ApiError {
    fn from(err: StripeError) -> Self {
        tracing::error!(error = %err, "Stripe request failed");
        Self::ExternalService("Payment provider request failed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_domain_errors() {
        let err: ApiError = StoreError::profile_not_found("x").into();
        assert!(matches!(err, ApiError::ProfileNotFound));

        let err: ApiError = StoreError::NotFound {
            entity: "session",
            id: "y".into(),
        }
        .into();
        assert!(matches!(err, ApiError::SessionNotFound));

        let err: ApiError = StoreError::Database("boom".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[test]
    fn precondition_failures_are_bad_requests() {
        for err in [
            ApiError::ProfileNotFound,
            ApiError::TrialExpired,
            ApiError::InsufficientCredits {
                required: 5,
                available: 0,
                shortfall: 5,
            },
        ] {
            assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(
            ApiError::SessionNotFound.into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
