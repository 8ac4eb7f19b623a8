//! Stripe webhook route

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use onboard_billing::WebhookOutcome;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Receive a Stripe event.
///
/// Signature and payload problems are rejected with 400. A verified event is
/// acknowledged even if applying it failed. The exception is an event another
/// delivery is still processing, which gets 409 so Stripe retries it later.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing stripe-signature header".to_string()))?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;

    match state.billing.webhooks.handle_event(&event).await {
        WebhookOutcome::InFlight => {
            return Err(ApiError::Conflict(
                "Webhook event is already being processed".to_string(),
            ));
        }
        WebhookOutcome::Failed(error) => {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %error,
                "Webhook event acknowledged despite processing failure"
            );
        }
        outcome => {
            tracing::debug!(event_id = %event.id, outcome = ?outcome, "Webhook event handled");
        }
    }

    Ok(Json(WebhookAck { received: true }))
}
