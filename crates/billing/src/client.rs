//! Stripe client

use std::collections::HashMap;

use async_trait::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateSubscription, CreateSubscriptionItems, CustomerId, Subscription, SubscriptionId,
    UpdateSubscription,
};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CheckoutRequest, CheckoutSessionRef, PaymentGateway};

/// Stripe credentials and checkout redirect targets
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Thin wrapper over the async-stripe client
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            inner: stripe::Client::new(config.secret_key.clone()),
        }
    }
}

fn parse_subscription_id(id: &str) -> BillingResult<SubscriptionId> {
    id.parse::<SubscriptionId>()
        .map_err(|e| BillingError::InvalidInput(format!("Invalid subscription ID: {}", e)))
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CheckoutSessionRef> {
        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(&request.success_url);
        params.cancel_url = Some(&request.cancel_url);
        params.customer_email = request.customer_email.as_deref();
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(request.price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(request.metadata.clone());

        let session = CheckoutSession::create(&self.inner, params)
            .await
            .map_err(|e| {
                tracing::error!(
                    price_id = %request.price_id,
                    error = %e,
                    "Stripe Checkout Session creation failed"
                );
                BillingError::from(e)
            })?;

        Ok(CheckoutSessionRef {
            id: session.id.to_string(),
            url: session.url,
        })
    }

    async fn cancel_at_period_end(&self, stripe_subscription_id: &str) -> BillingResult<()> {
        let sub_id = parse_subscription_id(stripe_subscription_id)?;

        let params = UpdateSubscription {
            cancel_at_period_end: Some(true),
            ..Default::default()
        };
        let subscription = Subscription::update(&self.inner, &sub_id, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            "Scheduled Stripe subscription cancellation at period end"
        );
        Ok(())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        metadata: HashMap<String, String>,
    ) -> BillingResult<String> {
        let customer_id = customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid customer ID: {}", e)))?;

        let mut params = CreateSubscription::new(customer_id);
        params.items = Some(vec![CreateSubscriptionItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(metadata);

        let subscription = Subscription::create(&self.inner, params).await?;

        tracing::info!(
            subscription_id = %subscription.id,
            price_id = %price_id,
            "Created Stripe subscription"
        );
        Ok(subscription.id.to_string())
    }
}
