//! Stripe webhook handling
//!
//! Verifies the `stripe-signature` header, parses the three event types the
//! service reacts to, and applies them to the subscription store. Every
//! event is claimed in the `stripe_webhook_events` ledger before dispatch so
//! redeliveries of a processed event are acknowledged without re-running, and
//! redeliveries of an event still in flight are turned away to be retried.

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{NewSubscription, SubscriptionStatus, SubscriptionUpdate, WebhookProcessingResult};
use crate::store::{ClaimOutcome, StoreError, SubscriptionStore};
use onboard_shared::PlanCatalog;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

/// Verify a `t=<ts>,v1=<hex>[,v1=<hex>...]` signature header against the raw body.
///
/// The HMAC key is the webhook secret exactly as Stripe issues it.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if signatures.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    if now.abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    let matched = signatures
        .iter()
        .any(|sig| bool::from(sig.as_slice().ct_eq(expected.as_slice())));
    if !matched {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

// Only the fields this service reads. Unknown fields are ignored so newer
// Stripe API versions keep parsing.

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    created: i64,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    id: String,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    items: Option<RawList<RawSubscriptionItem>>,
}

#[derive(Debug, Deserialize)]
struct RawList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawSubscriptionItem {
    #[serde(default)]
    price: Option<RawPrice>,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    id: String,
}

/// `checkout.session.completed` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCompleted {
    pub session_id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// `customer.subscription.updated` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdated {
    pub id: String,
    pub customer: Option<String>,
    pub status: String,
    /// Price of the first subscription item
    pub price_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEventKind {
    CheckoutCompleted(CheckoutCompleted),
    SubscriptionUpdated(SubscriptionUpdated),
    SubscriptionDeleted { id: String },
    Ignored(String),
}

/// A verified, parsed webhook event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
    pub created: i64,
    pub kind: WebhookEventKind,
}

impl WebhookEvent {
    /// Parse an event body
    pub fn parse(payload: &[u8]) -> BillingResult<Self> {
        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))?;

        let kind = match raw.type_.as_str() {
            CHECKOUT_SESSION_COMPLETED => {
                let session: RawCheckoutSession = from_object(raw.data.object)?;
                WebhookEventKind::CheckoutCompleted(CheckoutCompleted {
                    session_id: session.id,
                    customer: session.customer,
                    subscription: session.subscription,
                    metadata: session.metadata.unwrap_or_default(),
                })
            }
            SUBSCRIPTION_UPDATED => {
                let sub: RawSubscription = from_object(raw.data.object)?;
                let price_id = sub
                    .items
                    .and_then(|items| items.data.into_iter().next())
                    .and_then(|item| item.price)
                    .map(|price| price.id);
                let status = sub.status.ok_or_else(|| {
                    BillingError::WebhookPayloadInvalid("subscription has no status".to_string())
                })?;
                WebhookEventKind::SubscriptionUpdated(SubscriptionUpdated {
                    id: sub.id,
                    customer: sub.customer,
                    status,
                    price_id,
                })
            }
            SUBSCRIPTION_DELETED => {
                let sub: RawSubscription = from_object(raw.data.object)?;
                WebhookEventKind::SubscriptionDeleted { id: sub.id }
            }
            other => WebhookEventKind::Ignored(other.to_string()),
        };

        Ok(Self {
            id: raw.id,
            event_type: raw.type_,
            created: raw.created,
            kind,
        })
    }
}

fn from_object<T: serde::de::DeserializeOwned>(object: serde_json::Value) -> BillingResult<T> {
    serde_json::from_value(object).map_err(|e| BillingError::WebhookPayloadInvalid(e.to_string()))
}

/// What happened to a delivered event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Applied to the store
    Applied { rows_affected: u64 },
    /// Understood but not actionable
    Dropped(&'static str),
    /// Event type this service does not handle
    Ignored,
    /// Already processed successfully
    Duplicate,
    /// Another delivery of the same event holds the claim
    InFlight,
    /// Store write failed; recorded in the ledger and not surfaced
    Failed(String),
}

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
    webhook_secret: String,
}

impl WebhookHandler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        catalog: Arc<PlanCatalog>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            catalog,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Verify the signature header and parse the event
    pub fn verify_event(&self, payload: &[u8], signature: &str) -> BillingResult<WebhookEvent> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, &self.webhook_secret, now)?;

        let event = WebhookEvent::parse(payload)?;
        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Webhook signature verified"
        );
        Ok(event)
    }

    /// Handle a verified event.
    ///
    /// Never fails: store errors are logged and written to the ledger so the
    /// receiver can still acknowledge the delivery. An event claimed by another
    /// delivery comes back as [`WebhookOutcome::InFlight`] without running.
    pub async fn handle_event(&self, event: &WebhookEvent) -> WebhookOutcome {
        match self
            .store
            .claim_webhook_event(&event.id, &event.event_type)
            .await
        {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyProcessed) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Duplicate webhook event, skipping"
                );
                return WebhookOutcome::Duplicate;
            }
            Ok(ClaimOutcome::InFlight) => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Webhook event is already being processed"
                );
                return WebhookOutcome::InFlight;
            }
            Err(e) => {
                // The upserts are keyed by subscription id, so processing without a claim is safe
                tracing::error!(
                    event_id = %event.id,
                    error = %e,
                    "Failed to claim webhook event, processing without ledger"
                );
            }
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Processing Stripe webhook event"
        );

        let outcome = match self.dispatch(&event.kind).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Failed to apply webhook event"
                );
                WebhookOutcome::Failed(e.to_string())
            }
        };

        let (result, error_message) = match &outcome {
            WebhookOutcome::Failed(message) => {
                (WebhookProcessingResult::Error, Some(message.as_str()))
            }
            _ => (WebhookProcessingResult::Success, None),
        };
        if let Err(e) = self
            .store
            .finish_webhook_event(&event.id, result, error_message)
            .await
        {
            tracing::error!(
                event_id = %event.id,
                processing_result = %result.as_str(),
                error = %e,
                "Failed to record webhook processing result"
            );
        }

        outcome
    }

    async fn dispatch(&self, kind: &WebhookEventKind) -> Result<WebhookOutcome, StoreError> {
        match kind {
            WebhookEventKind::CheckoutCompleted(session) => {
                self.handle_checkout_completed(session).await
            }
            WebhookEventKind::SubscriptionUpdated(sub) => {
                self.handle_subscription_updated(sub).await
            }
            WebhookEventKind::SubscriptionDeleted { id } => {
                self.handle_subscription_deleted(id).await
            }
            WebhookEventKind::Ignored(event_type) => {
                tracing::debug!(event_type = %event_type, "Unhandled webhook event type");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn handle_checkout_completed(
        &self,
        session: &CheckoutCompleted,
    ) -> Result<WebhookOutcome, StoreError> {
        let (Some(user_id), Some(plan_name)) = (
            session.metadata.get("userId"),
            session.metadata.get("planName"),
        ) else {
            tracing::info!(
                session_id = %session.session_id,
                "Checkout session has no userId/planName metadata, dropping"
            );
            return Ok(WebhookOutcome::Dropped("missing metadata"));
        };

        let Some(subscription_id) = &session.subscription else {
            tracing::info!(
                session_id = %session.session_id,
                "Checkout session has no subscription, dropping"
            );
            return Ok(WebhookOutcome::Dropped("missing subscription"));
        };

        let Ok(user_id) = Uuid::parse_str(user_id) else {
            tracing::warn!(
                session_id = %session.session_id,
                user_id = %user_id,
                "Checkout session userId is not a UUID, dropping"
            );
            return Ok(WebhookOutcome::Dropped("invalid userId"));
        };

        let record = self
            .store
            .activate_from_checkout(NewSubscription {
                user_id,
                stripe_customer_id: session.customer.clone(),
                stripe_subscription_id: subscription_id.clone(),
                plan_name: plan_name.clone(),
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %record.stripe_subscription_id,
            plan_name = %record.plan_name,
            "Subscription activated from checkout"
        );
        Ok(WebhookOutcome::Applied { rows_affected: 1 })
    }

    async fn handle_subscription_updated(
        &self,
        sub: &SubscriptionUpdated,
    ) -> Result<WebhookOutcome, StoreError> {
        let plan_name = sub
            .price_id
            .as_deref()
            .and_then(|price| self.catalog.plan_name_for_price(price))
            .map(str::to_string);

        let rows_affected = self
            .store
            .update_by_stripe_id(
                &sub.id,
                SubscriptionUpdate {
                    status: SubscriptionStatus::from(sub.status.as_str()),
                    plan_name,
                },
            )
            .await?;

        if rows_affected == 0 {
            tracing::debug!(subscription_id = %sub.id, "No local row for updated subscription");
        } else {
            tracing::info!(
                subscription_id = %sub.id,
                status = %sub.status,
                "Subscription updated"
            );
        }
        Ok(WebhookOutcome::Applied { rows_affected })
    }

    async fn handle_subscription_deleted(&self, id: &str) -> Result<WebhookOutcome, StoreError> {
        let rows_affected = self
            .store
            .update_by_stripe_id(
                id,
                SubscriptionUpdate {
                    status: SubscriptionStatus::Canceled,
                    plan_name: None,
                },
            )
            .await?;

        tracing::info!(subscription_id = %id, rows_affected, "Subscription canceled");
        Ok(WebhookOutcome::Applied { rows_affected })
    }
}
