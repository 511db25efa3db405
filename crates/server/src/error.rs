//! Unified error handling with Sentry integration.
//!
//! Route handlers return `Result<T, AppError>`. Server-side failures are
//! captured to Sentry before the response is built, and clients only ever
//! see a generic message for them.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::OrderError;

/// Application-level error type for the order API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Order service operation failed.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Order(OrderError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Order(OrderError::Invalid(_)) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Order(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Order(OrderError::NotFound(uid)) => format!("Order {uid} not found"),
            Self::Order(err @ OrderError::Invalid(_)) => err.to_string(),
            Self::Order(_) => "Internal server error".to_string(),
            Self::BadRequest(msg) => msg.clone(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use orderline_core::{OrderUid, OrderValidationError};

    use super::*;
    use crate::db::RepositoryError;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");

        let err: AppError = OrderError::NotFound(OrderUid::new("order-123")).into();
        assert_eq!(err.to_string(), "Order error: order order-123 not found");
    }

    #[test]
    fn test_bad_request_status_code() {
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_order_error_status_codes() {
        let uid = OrderUid::new("UID1");

        assert_eq!(
            get_status(OrderError::NotFound(uid.clone()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(OrderError::Invalid(OrderValidationError::EmptyUid).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(OrderError::AlreadyExists(uid).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(
                OrderError::Unavailable(RepositoryError::Database(sqlx::Error::PoolTimedOut)).into()
            ),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(OrderError::Timeout(Duration::from_secs(1)).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
