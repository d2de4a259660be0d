//! Request body extraction with validation.

use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::ApiError;

/// JSON body that is deserialized and then checked with `validator`.
///
/// Malformed JSON, unknown fields on closed structs, and failed field
/// constraints are all reported as `validation_error` (400).
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| ApiError::validation(rejection.body_text()))?;

        value.validate().map_err(|errors| ApiError::Validation {
            message: "Validation failed".into(),
            details: serde_json::to_value(&errors).ok(),
        })?;

        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct Input {
        #[validate(range(min = 1))]
        minutes: i64,
    }

    fn request(body: &str) -> Request {
        Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_body() {
        let ApiJson(input) = ApiJson::<Input>::from_request(request(r#"{"minutes":3}"#), &())
            .await
            .unwrap();
        assert_eq!(input.minutes, 3);
    }

    #[tokio::test]
    async fn rejects_constraint_violation_with_details() {
        let err = ApiJson::<Input>::from_request(request(r#"{"minutes":0}"#), &())
            .await
            .unwrap_err();
        match err {
            ApiError::Validation { details, .. } => {
                assert!(details.unwrap().get("minutes").is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_malformed_json() {
        let err = ApiJson::<Input>::from_request(request("{"), &())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));
    }
}
