//! Checkout and subscription routes

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use onboard_billing::{CheckoutParams, CheckoutResponse, DowngradeRequest, SubscriptionRecord};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::routes::required;
use crate::state::AppState;

const MISSING_PARAMETERS: &str = "Missing required parameters";

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutBody {
    pub price_id: Option<String>,
    pub user_id: Option<String>,
    pub plan_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DowngradeBody {
    pub target_plan: Option<String>,
    pub user_id: Option<String>,
    /// Subscription row id
    pub subscription_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DowngradeResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshBody {
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub subscription: Option<SubscriptionRecord>,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

fn parse_json<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn parse_uuid(value: &str, field: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|_| ApiError::BadRequest(format!("Invalid {}", field)))
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a Stripe Checkout session for a subscription
pub async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutBody>, JsonRejection>,
) -> ApiResult<Json<CheckoutResponse>> {
    let body = parse_json(payload)?;
    let (Some(price_id), Some(user_id), Some(plan_name)) = (
        required(body.price_id),
        required(body.user_id),
        required(body.plan_name),
    ) else {
        return Err(ApiError::BadRequest(MISSING_PARAMETERS.to_string()));
    };
    let user_id = parse_uuid(&user_id, "userId")?;

    let user = state
        .users
        .find_user(user_id)
        .await
        .map_err(|e| ApiError::Internal(format!("User lookup failed: {}", e)))?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let response = state
        .billing
        .checkout
        .create_session(CheckoutParams {
            price_id,
            user_id,
            plan_name,
            customer_email: user.email,
        })
        .await
        .map_err(|e| {
            // Every session failure is a generic 500
            ApiError::Internal(format!("Checkout session creation failed: {}", e))
        })?;

    Ok(Json(response))
}

/// Downgrade the user's active subscription
pub async fn downgrade(
    State(state): State<AppState>,
    payload: Result<Json<DowngradeBody>, JsonRejection>,
) -> ApiResult<Json<DowngradeResponse>> {
    let body = parse_json(payload)?;
    let (Some(target_plan), Some(user_id)) = (required(body.target_plan), required(body.user_id))
    else {
        return Err(ApiError::BadRequest(MISSING_PARAMETERS.to_string()));
    };
    let user_id = parse_uuid(&user_id, "userId")?;
    let subscription_id = required(body.subscription_id)
        .map(|id| parse_uuid(&id, "subscriptionId"))
        .transpose()?;

    let result = state
        .billing
        .subscriptions
        .downgrade(DowngradeRequest {
            user_id,
            target_plan,
            subscription_id,
        })
        .await?;

    Ok(Json(DowngradeResponse {
        success: true,
        message: result.message,
    }))
}

/// Re-read the user's active subscription
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshBody>, JsonRejection>,
) -> ApiResult<Json<RefreshResponse>> {
    let body = parse_json(payload)?;
    let user_id = required(body.user_id)
        .ok_or_else(|| ApiError::BadRequest("Missing userId".to_string()))?;
    let user_id = parse_uuid(&user_id, "userId")?;

    let result = state.billing.subscriptions.refresh(user_id).await?;

    Ok(Json(RefreshResponse {
        subscription: result.subscription,
        message: result.message,
        timestamp: OffsetDateTime::now_utc(),
    }))
}
