//! API error types
//!
//! Every failure renders as `{"error": "<message>"}`. Internal failures are
//! logged with their detail and returned with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use onboard_billing::BillingError;
use serde::Serialize;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Webhook signature verification failed")]
    WebhookSignature,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::WebhookSignature => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidInput(message) => Self::BadRequest(message),
            BillingError::InvalidPlan(plan) => {
                Self::BadRequest(format!("Invalid target plan: {}", plan))
            }
            BillingError::NotFound(message) => Self::NotFound(message),
            BillingError::Forbidden(message) => Self::Forbidden(message),
            BillingError::WebhookSignatureInvalid => Self::WebhookSignature,
            BillingError::WebhookPayloadInvalid(message) => {
                Self::BadRequest(format!("Invalid webhook payload: {}", message))
            }
            other @ (BillingError::StripeApi(_)
            | BillingError::Store(_)
            | BillingError::Internal(_)) => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "Internal API error");
                INTERNAL_ERROR_MESSAGE.to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
