//! User-initiated subscription changes
//!
//! Downgrade and refresh act on the subscription store directly rather than
//! waiting for a webhook.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::gateway::PaymentGateway;
use crate::models::{RowUpdate, SubscriptionRecord, SubscriptionStatus};
use crate::store::SubscriptionStore;
use onboard_shared::{PlanCatalog, PlanTarget, FREE_PLAN_NAME};

pub const NO_ACTIVE_SUBSCRIPTION: &str = "No active subscription found";

/// Request to move a user onto a lower plan
#[derive(Debug, Clone)]
pub struct DowngradeRequest {
    pub user_id: Uuid,
    /// Plan key, `free` or a catalog key
    pub target_plan: String,
    /// Row to act on; defaults to the user's active row
    pub subscription_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct DowngradeResult {
    pub subscription: SubscriptionRecord,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub subscription: Option<SubscriptionRecord>,
    pub message: String,
}

/// Subscription service for downgrades and state refresh
pub struct SubscriptionService {
    store: Arc<dyn SubscriptionStore>,
    gateway: Arc<dyn PaymentGateway>,
    catalog: Arc<PlanCatalog>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            store,
            gateway,
            catalog,
        }
    }

    /// Downgrade the user's active subscription.
    ///
    /// The current Stripe subscription is set to cancel at period end. A free
    /// target cancels the local row; a paid target creates a replacement
    /// Stripe subscription and points the row at it.
    pub async fn downgrade(&self, request: DowngradeRequest) -> BillingResult<DowngradeResult> {
        let target = self
            .catalog
            .resolve_target(&request.target_plan)
            .ok_or_else(|| BillingError::InvalidPlan(request.target_plan.clone()))?;

        let current = self
            .current_subscription(request.user_id, request.subscription_id)
            .await?;

        // Checked before cancelling so a rejected request leaves Stripe untouched
        let customer_id = match target {
            PlanTarget::Paid(_) => Some(current.stripe_customer_id.clone().ok_or_else(|| {
                BillingError::InvalidInput(
                    "Subscription has no Stripe customer to bill".to_string(),
                )
            })?),
            PlanTarget::Free => None,
        };

        self.gateway
            .cancel_at_period_end(&current.stripe_subscription_id)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    user_id = %request.user_id,
                    subscription_id = %current.stripe_subscription_id,
                    error = %e,
                    "Failed to schedule Stripe cancellation for downgrade"
                );
            })?;

        let updated = match (target, customer_id) {
            (PlanTarget::Paid(entry), Some(customer_id)) => {
                let mut metadata = HashMap::new();
                metadata.insert("userId".to_string(), request.user_id.to_string());
                metadata.insert("planName".to_string(), entry.display_name.clone());

                let new_subscription_id = self
                    .gateway
                    .create_subscription(&customer_id, &entry.price_id, metadata)
                    .await
                    .inspect_err(|e| {
                        tracing::error!(
                            user_id = %request.user_id,
                            row_id = %current.id,
                            canceled_subscription_id = %current.stripe_subscription_id,
                            target_plan = %entry.display_name,
                            error = %e,
                            "RECONCILIATION NEEDED: subscription set to cancel at period end \
                             but replacement subscription could not be created"
                        );
                    })?;

                self.store
                    .update_by_id(
                        current.id,
                        RowUpdate {
                            plan_name: Some(entry.display_name.clone()),
                            stripe_subscription_id: Some(new_subscription_id.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            user_id = %request.user_id,
                            row_id = %current.id,
                            new_subscription_id = %new_subscription_id,
                            error = %e,
                            "RECONCILIATION NEEDED: replacement subscription created \
                             but local row could not be updated"
                        );
                        BillingError::from(e)
                    })?
            }
            _ => {
                self.store
                    .update_by_id(
                        current.id,
                        RowUpdate {
                            status: Some(SubscriptionStatus::Canceled),
                            plan_name: Some(FREE_PLAN_NAME.to_string()),
                            ..Default::default()
                        },
                    )
                    .await?
            }
        };

        let subscription = updated.ok_or_else(|| {
            BillingError::NotFound("Subscription not found".to_string())
        })?;

        tracing::info!(
            user_id = %request.user_id,
            from_plan = %current.plan_name,
            to_plan = %target.display_name(),
            "Subscription downgraded"
        );

        Ok(DowngradeResult {
            message: format!("Successfully downgraded to {} plan", target.display_name()),
            subscription,
        })
    }

    /// Most recently updated active subscription for the user
    pub async fn refresh(&self, user_id: Uuid) -> BillingResult<RefreshResult> {
        let subscription = self.store.find_active_for_user(user_id).await?;
        let message = match &subscription {
            Some(_) => "Subscription refreshed".to_string(),
            None => NO_ACTIVE_SUBSCRIPTION.to_string(),
        };
        Ok(RefreshResult {
            subscription,
            message,
        })
    }

    async fn current_subscription(
        &self,
        user_id: Uuid,
        row_id: Option<Uuid>,
    ) -> BillingResult<SubscriptionRecord> {
        let Some(row_id) = row_id else {
            return self
                .store
                .find_active_for_user(user_id)
                .await?
                .ok_or_else(|| BillingError::NotFound(NO_ACTIVE_SUBSCRIPTION.to_string()));
        };

        let row = self
            .store
            .find_by_id(row_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Subscription not found".to_string()))?;

        if row.user_id != user_id {
            tracing::warn!(
                user_id = %user_id,
                row_id = %row_id,
                "Downgrade requested for another user's subscription"
            );
            return Err(BillingError::Forbidden(
                "Subscription does not belong to user".to_string(),
            ));
        }
        if !row.status.is_active() {
            return Err(BillingError::NotFound(NO_ACTIVE_SUBSCRIPTION.to_string()));
        }

        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewSubscription;
    use crate::store::MemorySubscriptionStore;
    use crate::testing::{GatewayCall, MockGateway};

    struct Fixture {
        service: SubscriptionService,
        store: Arc<MemorySubscriptionStore>,
        gateway: Arc<MockGateway>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemorySubscriptionStore::new());
        let gateway = Arc::new(MockGateway::new());
        let catalog = Arc::new(
            PlanCatalog::parse("startup:price_startup:Startup,growth:price_growth:Growth").unwrap(),
        );
        Fixture {
            service: SubscriptionService::new(store.clone(), gateway.clone(), catalog),
            store,
            gateway,
        }
    }

    async fn seed(store: &MemorySubscriptionStore, user_id: Uuid, customer: Option<&str>) -> SubscriptionRecord {
        store
            .activate_from_checkout(NewSubscription {
                user_id,
                stripe_customer_id: customer.map(str::to_string),
                stripe_subscription_id: "sub_growth".to_string(),
                plan_name: "Growth".to_string(),
            })
            .await
            .unwrap()
    }

    fn request(user_id: Uuid, target: &str) -> DowngradeRequest {
        DowngradeRequest {
            user_id,
            target_plan: target.to_string(),
            subscription_id: None,
        }
    }

    #[tokio::test]
    async fn downgrade_to_free_cancels_without_creating() {
        let f = fixture();
        let user = Uuid::new_v4();
        let row = seed(&f.store, user, Some("cus_1")).await;

        let result = f.service.downgrade(request(user, "free")).await.unwrap();

        assert_eq!(result.subscription.id, row.id);
        assert_eq!(result.subscription.status, SubscriptionStatus::Canceled);
        assert_eq!(result.subscription.plan_name, FREE_PLAN_NAME);
        assert_eq!(
            f.gateway.calls(),
            vec![GatewayCall::CancelAtPeriodEnd("sub_growth".to_string())]
        );
        assert_eq!(f.gateway.created_subscriptions(), 0);
    }

    #[tokio::test]
    async fn downgrade_to_paid_swaps_subscription_id() {
        let f = fixture();
        let user = Uuid::new_v4();
        let row = seed(&f.store, user, Some("cus_1")).await;

        let result = f.service.downgrade(request(user, "startup")).await.unwrap();

        assert_eq!(result.subscription.id, row.id);
        assert_eq!(result.subscription.status, SubscriptionStatus::Active);
        assert_eq!(result.subscription.plan_name, "Startup");
        assert_ne!(result.subscription.stripe_subscription_id, "sub_growth");

        let calls = f.gateway.calls();
        assert_eq!(calls[0], GatewayCall::CancelAtPeriodEnd("sub_growth".to_string()));
        let GatewayCall::CreateSubscription { customer_id, price_id, metadata } = &calls[1] else {
            panic!("expected subscription create, got {:?}", calls[1]);
        };
        assert_eq!(customer_id, "cus_1");
        assert_eq!(price_id, "price_startup");
        assert_eq!(metadata.get("userId"), Some(&user.to_string()));
        assert_eq!(metadata.get("planName").map(String::as_str), Some("Startup"));
    }

    #[tokio::test]
    async fn unknown_target_plan_is_rejected() {
        let f = fixture();
        let user = Uuid::new_v4();
        seed(&f.store, user, Some("cus_1")).await;

        let err = f.service.downgrade(request(user, "platinum")).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidPlan(_)));
        assert!(f.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_active_subscription_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .downgrade(request(Uuid::new_v4(), "free"))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
    }

    #[tokio::test]
    async fn foreign_subscription_row_is_forbidden() {
        let f = fixture();
        let owner = Uuid::new_v4();
        let row = seed(&f.store, owner, Some("cus_1")).await;

        let mut req = request(Uuid::new_v4(), "free");
        req.subscription_id = Some(row.id);
        let err = f.service.downgrade(req).await.unwrap_err();

        assert!(matches!(err, BillingError::Forbidden(_)));
        assert!(f.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn paid_downgrade_without_customer_is_rejected_before_cancel() {
        let f = fixture();
        let user = Uuid::new_v4();
        seed(&f.store, user, None).await;

        let err = f.service.downgrade(request(user, "startup")).await.unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
        assert!(f.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_failure_changes_nothing() {
        let f = fixture();
        let user = Uuid::new_v4();
        let row = seed(&f.store, user, Some("cus_1")).await;
        f.gateway.fail_cancel(true);

        let err = f.service.downgrade(request(user, "free")).await.unwrap_err();
        assert!(matches!(err, BillingError::StripeApi(_)));
        let unchanged = f.store.find_by_id(row.id).await.unwrap().unwrap();
        assert_eq!(unchanged, row);
    }

    #[tokio::test]
    async fn create_failure_after_cancel_leaves_row_unchanged() {
        let f = fixture();
        let user = Uuid::new_v4();
        let row = seed(&f.store, user, Some("cus_1")).await;
        f.gateway.fail_create_subscription(true);

        let err = f.service.downgrade(request(user, "startup")).await.unwrap_err();
        assert!(matches!(err, BillingError::StripeApi(_)));

        let unchanged = f.store.find_by_id(row.id).await.unwrap().unwrap();
        assert_eq!(unchanged.stripe_subscription_id, "sub_growth");
        assert_eq!(unchanged.plan_name, "Growth");
        assert!(f
            .gateway
            .calls()
            .contains(&GatewayCall::CancelAtPeriodEnd("sub_growth".to_string())));
    }

    #[tokio::test]
    async fn refresh_reports_missing_subscription_without_error() {
        let f = fixture();
        let result = f.service.refresh(Uuid::new_v4()).await.unwrap();
        assert!(result.subscription.is_none());
        assert_eq!(result.message, NO_ACTIVE_SUBSCRIPTION);
    }

    #[tokio::test]
    async fn refresh_returns_active_row() {
        let f = fixture();
        let user = Uuid::new_v4();
        let row = seed(&f.store, user, Some("cus_1")).await;

        let result = f.service.refresh(user).await.unwrap();
        assert_eq!(result.subscription.map(|s| s.id), Some(row.id));
    }
}
