//! Recording payment gateway for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{CheckoutRequest, CheckoutSessionRef, PaymentGateway};

/// A call made against [`MockGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    CreateCheckoutSession(CheckoutRequest),
    CancelAtPeriodEnd(String),
    CreateSubscription {
        customer_id: String,
        price_id: String,
        metadata: HashMap<String, String>,
    },
}

/// Gateway that records calls and can be told to fail individual operations
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    sequence: AtomicU64,
    fail_checkout: AtomicBool,
    fail_cancel: AtomicBool,
    fail_create_subscription: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_checkout(&self, fail: bool) {
        self.fail_checkout.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    pub fn fail_create_subscription(&self, fail: bool) {
        self.fail_create_subscription.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn created_subscriptions(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::CreateSubscription { .. }))
            .count()
    }

    fn record(&self, call: GatewayCall) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_mock_{}", prefix, self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<CheckoutSessionRef> {
        self.record(GatewayCall::CreateCheckoutSession(request));
        if self.fail_checkout.load(Ordering::SeqCst) {
            return Err(BillingError::StripeApi("checkout unavailable".to_string()));
        }
        let id = self.next_id("cs");
        Ok(CheckoutSessionRef {
            url: Some(format!("https://checkout.stripe.test/pay/{}", id)),
            id,
        })
    }

    async fn cancel_at_period_end(&self, stripe_subscription_id: &str) -> BillingResult<()> {
        self.record(GatewayCall::CancelAtPeriodEnd(stripe_subscription_id.to_string()));
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(BillingError::StripeApi("cancel failed".to_string()));
        }
        Ok(())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        metadata: HashMap<String, String>,
    ) -> BillingResult<String> {
        self.record(GatewayCall::CreateSubscription {
            customer_id: customer_id.to_string(),
            price_id: price_id.to_string(),
            metadata,
        });
        if self.fail_create_subscription.load(Ordering::SeqCst) {
            return Err(BillingError::StripeApi("subscription create failed".to_string()));
        }
        Ok(self.next_id("sub"))
    }
}
