//! Payment processor seam
//!
//! The handful of Stripe calls the billing flows make, behind a trait so the
//! flows can run against [`crate::client::StripeClient`] in production and a
//! recording mock in tests.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::BillingResult;

/// Parameters for a hosted subscription checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub price_id: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: HashMap<String, String>,
}

/// A created hosted checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRef {
    pub id: String,
    pub url: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CheckoutSessionRef>;

    /// Flag a subscription to cancel at the end of its current period
    async fn cancel_at_period_end(&self, stripe_subscription_id: &str) -> BillingResult<()>;

    /// Create a subscription for an existing customer and return its ID
    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        metadata: HashMap<String, String>,
    ) -> BillingResult<String>;
}
