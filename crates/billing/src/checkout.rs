//! Stripe Checkout session creation
//!
//! Nothing is written locally here. The subscription row appears when the
//! `checkout.session.completed` webhook lands.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CheckoutRequest, PaymentGateway};

/// Inputs for a subscription checkout
#[derive(Debug, Clone)]
pub struct CheckoutParams {
    pub price_id: String,
    pub user_id: Uuid,
    pub plan_name: String,
    pub customer_email: Option<String>,
}

/// Response for checkout session creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

/// Checkout service for creating Stripe Checkout sessions
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    success_url: String,
    cancel_url: String,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
        }
    }

    /// Create a hosted checkout session carrying `userId` and `planName` as metadata.
    ///
    /// The price is passed through as given. There is no idempotency key, so
    /// repeated calls create separate sessions.
    pub async fn create_session(&self, params: CheckoutParams) -> BillingResult<CheckoutResponse> {
        if params.price_id.trim().is_empty() || params.plan_name.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "Missing required parameters".to_string(),
            ));
        }

        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), params.user_id.to_string());
        metadata.insert("planName".to_string(), params.plan_name.clone());

        let session = self
            .gateway
            .create_checkout_session(CheckoutRequest {
                price_id: params.price_id.clone(),
                customer_email: params.customer_email,
                success_url: self.success_url.clone(),
                cancel_url: self.cancel_url.clone(),
                metadata,
            })
            .await?;

        let url = session.url.ok_or_else(|| {
            BillingError::Internal("Checkout session created without a URL".to_string())
        })?;

        tracing::info!(
            user_id = %params.user_id,
            price_id = %params.price_id,
            plan_name = %params.plan_name,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(CheckoutResponse {
            session_id: session.id,
            url,
        })
    }
}
