//! API error types and helpers.
//!
//! # Purpose
//! Centralizes HTTP error construction so every failure leaves the service
//! with the same `{error, message, ...metadata}` shape. The 429 constructors
//! attach the quota / rate-limit metadata objects callers use for backoff.

use crate::api::types::{ErrorBody, QuotaMeta, RateLimitMeta};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use courier_engine::store::StoreError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn plain(status: StatusCode, error: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorBody {
            error: error.to_string(),
            message: message.to_string(),
            quota: None,
            rate_limit: None,
        },
    }
}

pub fn api_validation_error(message: &str) -> ApiError {
    plain(StatusCode::BAD_REQUEST, "validation_error", message)
}

pub fn api_unauthorized(message: &str) -> ApiError {
    plain(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

pub fn api_forbidden(error: &str, message: &str) -> ApiError {
    plain(StatusCode::FORBIDDEN, error, message)
}

pub fn api_not_found(message: &str) -> ApiError {
    plain(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn api_quota_exceeded(limit: i64, current: i64) -> ApiError {
    ApiError {
        status: StatusCode::TOO_MANY_REQUESTS,
        body: ErrorBody {
            error: "monthly_quota_exceeded".to_string(),
            message: "monthly message quota exceeded".to_string(),
            quota: Some(QuotaMeta { limit, current }),
            rate_limit: None,
        },
    }
}

pub fn api_rate_limited(limit: i64, current: i64) -> ApiError {
    ApiError {
        status: StatusCode::TOO_MANY_REQUESTS,
        body: ErrorBody {
            error: "rate_limit_exceeded".to_string(),
            message: "per-minute rate limit exceeded".to_string(),
            quota: None,
            rate_limit: Some(RateLimitMeta {
                limit,
                current,
                window: "per_minute".to_string(),
            }),
        },
    }
}

pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "storage error");
    plain(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
}

pub fn api_internal_message(message: &str) -> ApiError {
    plain(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
}
