//! HTTP error response shape and status-code mapping (spec §7), gated
//! behind the `axum-compat` feature.

#![cfg(feature = "axum-compat")]

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::cqrs::CommandFailure;
use crate::MeridianError;

/// Error code string surfaced to clients, matching spec §7's taxonomy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// 400
    ValidationFailed,
    /// 404
    ProductNotFound,
    /// 409
    DuplicateSku,
    /// 409
    ConcurrentModification,
    /// 410
    ProductDeleted,
    /// 422
    InvalidStateTransition,
    /// 422
    PriceThresholdExceeded,
    /// 400
    InvariantViolation,
    /// 429
    RateLimited,
    /// 503
    ServiceUnavailable,
    /// 500
    InternalError,
}

impl ErrorCode {
    /// HTTP status code for this error, per spec §7.
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::ValidationFailed | Self::InvariantViolation => StatusCode::BAD_REQUEST,
            Self::ProductNotFound => StatusCode::NOT_FOUND,
            Self::DuplicateSku | Self::ConcurrentModification => StatusCode::CONFLICT,
            Self::ProductDeleted => StatusCode::GONE,
            Self::InvalidStateTransition | Self::PriceThresholdExceeded => {
                StatusCode::UNPROCESSABLE_ENTITY
            },
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error body returned to API clients.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Extra structured detail specific to the error kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl CommandFailure {
    /// Map this failure to the error code named in spec §7.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            Self::ProductNotFound { .. } => ErrorCode::ProductNotFound,
            Self::DuplicateSku { .. } => ErrorCode::DuplicateSku,
            Self::ConcurrentModification { .. } => ErrorCode::ConcurrentModification,
            Self::ProductDeleted => ErrorCode::ProductDeleted,
            Self::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::PriceThresholdExceeded { .. } => ErrorCode::PriceThresholdExceeded,
            Self::InvariantViolation { .. } => ErrorCode::InvariantViolation,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    fn detail(&self) -> Option<serde_json::Value> {
        match self {
            Self::ValidationFailed { errors } => Some(serde_json::json!({ "errors": errors })),
            Self::DuplicateSku { sku } => Some(serde_json::json!({ "sku": sku })),
            Self::ConcurrentModification {
                expected_version,
                current_version,
            } => Some(serde_json::json!({
                "expectedVersion": expected_version,
                "currentVersion": current_version,
            })),
            Self::InvalidStateTransition {
                current_status,
                target_status,
            } => Some(serde_json::json!({
                "currentStatus": current_status,
                "targetStatus": target_status,
            })),
            Self::PriceThresholdExceeded {
                current_price_cents,
                requested_price_cents,
                change_fraction,
                threshold_fraction,
            } => Some(serde_json::json!({
                "currentPriceCents": current_price_cents,
                "requestedPriceCents": requested_price_cents,
                "changeFraction": change_fraction,
                "threshold": threshold_fraction,
            })),
            Self::InvariantViolation { invariant } => {
                Some(serde_json::json!({ "invariant": invariant }))
            },
            Self::Internal { correlation_id, .. } => {
                Some(serde_json::json!({ "correlationId": correlation_id }))
            },
            _ => None,
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } | Self::ServiceUnavailable { retry_after_secs, .. } => {
                Some(*retry_after_secs)
            },
            _ => None,
        }
    }
}

impl IntoResponse for CommandFailure {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let status = code.status_code();
        let retry_after = self.retry_after_secs();
        let body = ErrorResponse {
            code,
            message: self.to_string(),
            detail: self.detail(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
        }
        response
    }
}

impl IntoResponse for MeridianError {
    fn into_response(self) -> Response {
        match self {
            Self::Command(failure) => failure.into_response(),
            other => {
                let body = ErrorResponse {
                    code: ErrorCode::InternalError,
                    message: other.to_string(),
                    detail: None,
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            },
        }
    }
}
