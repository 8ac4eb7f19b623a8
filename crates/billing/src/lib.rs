// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError wraps sqlx errors through StoreError
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Onboard Billing Module
//!
//! Keeps the local subscription table in step with Stripe.
//!
//! ## Features
//!
//! - **Checkout**: Hosted Stripe Checkout sessions tagged with the user and plan
//! - **Webhooks**: Signature verification, an idempotency ledger, and dispatch
//!   of `checkout.session.completed` and `customer.subscription.*` events
//! - **Downgrades**: Cancel at period end, then move to free or a cheaper plan
//! - **Refresh**: Read back the active subscription after a webhook may have landed

use std::sync::Arc;

pub mod checkout;
pub mod client;
pub mod error;
pub mod gateway;
pub mod models;
pub mod store;
pub mod subscriptions;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod webhooks;

#[cfg(test)]
mod webhooks_tests;

// Checkout
pub use checkout::{CheckoutParams, CheckoutResponse, CheckoutService};

// Client
pub use client::{StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{CheckoutRequest, CheckoutSessionRef, PaymentGateway};

// Models
pub use models::{
    NewSubscription, RowUpdate, SubscriptionRecord, SubscriptionStatus, SubscriptionUpdate,
    WebhookProcessingResult,
};

// Store
pub use store::{ClaimOutcome, PgSubscriptionStore, StoreError, StoreResult, SubscriptionStore};

// Subscriptions
pub use subscriptions::{
    DowngradeRequest, DowngradeResult, RefreshResult, SubscriptionService, NO_ACTIVE_SUBSCRIPTION,
};

// Webhooks
pub use webhooks::{WebhookEvent, WebhookEventKind, WebhookHandler, WebhookOutcome};

use onboard_shared::PlanCatalog;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a billing service backed by the Stripe API
    pub fn new(
        config: StripeConfig,
        store: Arc<dyn SubscriptionStore>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeClient::new(&config));
        Self::with_gateway(config, gateway, store, catalog)
    }

    /// Create a billing service over an explicit payment gateway
    pub fn with_gateway(
        config: StripeConfig,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn SubscriptionStore>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            checkout: CheckoutService::new(
                gateway.clone(),
                config.success_url,
                config.cancel_url,
            ),
            subscriptions: SubscriptionService::new(store.clone(), gateway, catalog.clone()),
            webhooks: WebhookHandler::new(store, catalog, config.webhook_secret),
        }
    }
}
