//! Unit tests for webhook verification and dispatch

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hmac::{Hmac, Mac};
    use serde_json::json;
    use sha2::Sha256;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::error::BillingError;
    use crate::models::{SubscriptionStatus, WebhookProcessingResult};
    use crate::store::{MemorySubscriptionStore, SubscriptionStore};
    use crate::webhooks::*;
    use onboard_shared::PlanCatalog;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &[u8], timestamp: i64, secret: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn header_for(payload: &[u8]) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        format!("t={},v1={}", now, sign(payload, now, SECRET))
    }

    fn catalog() -> Arc<PlanCatalog> {
        Arc::new(
            PlanCatalog::parse("startup:price_startup:Startup,growth:price_growth:Growth").unwrap(),
        )
    }

    fn handler() -> (WebhookHandler, Arc<MemorySubscriptionStore>) {
        let store = Arc::new(MemorySubscriptionStore::new());
        let handler = WebhookHandler::new(store.clone(), catalog(), SECRET);
        (handler, store)
    }

    fn checkout_event(event_id: &str, user_id: Uuid, subscription: &str, plan: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": {
                "id": "cs_test_1",
                "object": "checkout.session",
                "customer": "cus_123",
                "subscription": subscription,
                "metadata": { "userId": user_id.to_string(), "planName": plan }
            }}
        }))
        .unwrap()
    }

    fn subscription_event(event_id: &str, kind: &str, sub_id: &str, status: &str, price: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": event_id,
            "type": kind,
            "created": 1_700_000_100,
            "data": { "object": {
                "id": sub_id,
                "object": "subscription",
                "customer": "cus_123",
                "status": status,
                "items": { "object": "list", "data": [ { "price": { "id": price } } ] }
            }}
        }))
        .unwrap()
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = format!("t={},v1={}", now, sign(payload, now, SECRET));
        assert!(verify_signature(payload, &header, SECRET, now + 10).is_ok());
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let payload = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = format!(
            "t={},v1={},v1={}",
            now,
            "00".repeat(32),
            sign(payload, now, SECRET)
        );
        assert!(verify_signature(payload, &header, SECRET, now).is_ok());
    }

    #[test]
    fn keys_hmac_with_full_secret() {
        let payload = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let stripped = SECRET.trim_start_matches("whsec_");
        let header = format!("t={},v1={}", now, sign(payload, now, stripped));
        assert!(matches!(
            verify_signature(payload, &header, SECRET, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn rejects_tampered_body() {
        let now = 1_700_000_000;
        let header = format!("t={},v1={}", now, sign(b"original", now, SECRET));
        assert!(verify_signature(b"tampered", &header, SECRET, now).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = b"{}";
        let signed_at = 1_700_000_000;
        let header = format!("t={},v1={}", signed_at, sign(payload, signed_at, SECRET));
        let now = signed_at + SIGNATURE_TOLERANCE_SECS + 1;
        assert!(verify_signature(payload, &header, SECRET, now).is_err());
    }

    #[test]
    fn rejects_extreme_timestamp() {
        let payload = b"{}";
        let now = 1_700_000_000;
        for signed_at in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1={}", signed_at, sign(payload, signed_at, SECRET));
            assert!(matches!(
                verify_signature(payload, &header, SECRET, now),
                Err(BillingError::WebhookSignatureInvalid)
            ));
        }
    }

    #[test]
    fn rejects_malformed_header() {
        let now = 1_700_000_000;
        assert!(verify_signature(b"{}", "garbage", SECRET, now).is_err());
        assert!(verify_signature(b"{}", "t=1700000000", SECRET, now).is_err());
        assert!(verify_signature(b"{}", "v1=abcd", SECRET, now).is_err());
    }

    #[test]
    fn parses_subscription_update_with_first_price() {
        let payload = subscription_event(
            "evt_2",
            "customer.subscription.updated",
            "sub_1",
            "past_due",
            "price_growth",
        );
        let event = WebhookEvent::parse(&payload).unwrap();
        assert_eq!(event.id, "evt_2");
        assert_eq!(
            event.kind,
            WebhookEventKind::SubscriptionUpdated(SubscriptionUpdated {
                id: "sub_1".to_string(),
                customer: Some("cus_123".to_string()),
                status: "past_due".to_string(),
                price_id: Some("price_growth".to_string()),
            })
        );
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let payload = serde_json::to_vec(&json!({
            "id": "evt_3",
            "type": "invoice.paid",
            "data": { "object": { "id": "in_1" } }
        }))
        .unwrap();
        let event = WebhookEvent::parse(&payload).unwrap();
        assert_eq!(event.kind, WebhookEventKind::Ignored("invoice.paid".to_string()));
    }

    #[test]
    fn verify_event_rejects_unparseable_body() {
        let (handler, _) = handler();
        let payload = b"not json";
        let err = handler.verify_event(payload, &header_for(payload)).unwrap_err();
        assert!(matches!(err, BillingError::WebhookPayloadInvalid(_)));
    }

    #[tokio::test]
    async fn checkout_completed_activates_subscription() {
        let (handler, store) = handler();
        let user = Uuid::new_v4();
        let payload = checkout_event("evt_10", user, "sub_new", "Startup");

        let event = handler.verify_event(&payload, &header_for(&payload)).unwrap();
        let outcome = handler.handle_event(&event).await;

        assert_eq!(outcome, WebhookOutcome::Applied { rows_affected: 1 });
        let active = store.find_active_for_user(user).await.unwrap().unwrap();
        assert_eq!(active.stripe_subscription_id, "sub_new");
        assert_eq!(active.stripe_customer_id.as_deref(), Some("cus_123"));
        assert_eq!(active.plan_name, "Startup");
        let (result, _, event_type) = store.webhook_event("evt_10").await.unwrap();
        assert_eq!(result, WebhookProcessingResult::Success);
        assert_eq!(event_type, "checkout.session.completed");
    }

    #[tokio::test]
    async fn second_checkout_leaves_one_active_row() {
        let (handler, store) = handler();
        let user = Uuid::new_v4();

        for (event_id, sid, plan) in [("evt_a", "sub_a", "Startup"), ("evt_b", "sub_b", "Growth")] {
            let event = WebhookEvent::parse(&checkout_event(event_id, user, sid, plan)).unwrap();
            handler.handle_event(&event).await;
        }

        assert_eq!(store.active_count_for_user(user).await, 1);
        let active = store.find_active_for_user(user).await.unwrap().unwrap();
        assert_eq!(active.stripe_subscription_id, "sub_b");
        let old = store
            .records()
            .await
            .into_iter()
            .find(|r| r.stripe_subscription_id == "sub_a")
            .unwrap();
        assert_eq!(old.status, SubscriptionStatus::Inactive);
    }

    #[tokio::test]
    async fn checkout_without_metadata_is_dropped() {
        let (handler, store) = handler();
        let payload = serde_json::to_vec(&json!({
            "id": "evt_11",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_1", "subscription": "sub_x", "customer": "cus_1" } }
        }))
        .unwrap();

        let event = WebhookEvent::parse(&payload).unwrap();
        let outcome = handler.handle_event(&event).await;

        assert_eq!(outcome, WebhookOutcome::Dropped("missing metadata"));
        assert!(store.records().await.is_empty());
    }

    #[tokio::test]
    async fn replayed_event_is_not_reapplied() {
        let (handler, store) = handler();
        let user = Uuid::new_v4();
        let event = WebhookEvent::parse(&checkout_event("evt_12", user, "sub_a", "Startup")).unwrap();

        assert_eq!(
            handler.handle_event(&event).await,
            WebhookOutcome::Applied { rows_affected: 1 }
        );
        assert_eq!(handler.handle_event(&event).await, WebhookOutcome::Duplicate);
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn event_claimed_elsewhere_is_not_acknowledged_as_done() {
        let (handler, store) = handler();
        let user = Uuid::new_v4();
        let event = WebhookEvent::parse(&checkout_event("evt_14", user, "sub_a", "Startup")).unwrap();

        store
            .claim_webhook_event("evt_14", "checkout.session.completed")
            .await
            .unwrap();

        assert_eq!(handler.handle_event(&event).await, WebhookOutcome::InFlight);
        assert!(store.records().await.is_empty());
        let (result, _, _) = store.webhook_event("evt_14").await.unwrap();
        assert_eq!(result, WebhookProcessingResult::Processing);
    }

    #[tokio::test]
    async fn store_failure_is_recorded_and_retryable() {
        let (handler, store) = handler();
        let user = Uuid::new_v4();
        let event = WebhookEvent::parse(&checkout_event("evt_13", user, "sub_a", "Startup")).unwrap();

        store.fail_subscription_writes(true);
        let outcome = handler.handle_event(&event).await;
        assert!(matches!(outcome, WebhookOutcome::Failed(_)));
        let (result, error, _) = store.webhook_event("evt_13").await.unwrap();
        assert_eq!(result, WebhookProcessingResult::Error);
        assert!(error.is_some());

        store.fail_subscription_writes(false);
        assert_eq!(
            handler.handle_event(&event).await,
            WebhookOutcome::Applied { rows_affected: 1 }
        );
        assert_eq!(store.active_count_for_user(user).await, 1);
    }

    #[tokio::test]
    async fn subscription_updated_writes_status_and_catalog_plan() {
        let (handler, store) = handler();
        let user = Uuid::new_v4();
        let checkout = WebhookEvent::parse(&checkout_event("evt_20", user, "sub_a", "Startup")).unwrap();
        handler.handle_event(&checkout).await;

        let update = WebhookEvent::parse(&subscription_event(
            "evt_21",
            "customer.subscription.updated",
            "sub_a",
            "past_due",
            "price_growth",
        ))
        .unwrap();
        assert_eq!(
            handler.handle_event(&update).await,
            WebhookOutcome::Applied { rows_affected: 1 }
        );

        let row = store.records().await.remove(0);
        assert_eq!(row.status, SubscriptionStatus::Other("past_due".to_string()));
        assert_eq!(row.plan_name, "Growth");
    }

    #[tokio::test]
    async fn subscription_updated_with_unknown_price_keeps_plan() {
        let (handler, store) = handler();
        let user = Uuid::new_v4();
        let checkout = WebhookEvent::parse(&checkout_event("evt_30", user, "sub_a", "Startup")).unwrap();
        handler.handle_event(&checkout).await;

        let update = WebhookEvent::parse(&subscription_event(
            "evt_31",
            "customer.subscription.updated",
            "sub_a",
            "active",
            "price_legacy",
        ))
        .unwrap();
        handler.handle_event(&update).await;

        let row = store.records().await.remove(0);
        assert_eq!(row.status, SubscriptionStatus::Active);
        assert_eq!(row.plan_name, "Startup");
    }

    #[tokio::test]
    async fn update_for_unknown_subscription_is_a_noop() {
        let (handler, store) = handler();
        let update = WebhookEvent::parse(&subscription_event(
            "evt_40",
            "customer.subscription.updated",
            "sub_missing",
            "active",
            "price_startup",
        ))
        .unwrap();

        assert_eq!(
            handler.handle_event(&update).await,
            WebhookOutcome::Applied { rows_affected: 0 }
        );
        assert!(store.records().await.is_empty());
    }

    #[tokio::test]
    async fn subscription_deleted_marks_canceled() {
        let (handler, store) = handler();
        let user = Uuid::new_v4();
        let checkout = WebhookEvent::parse(&checkout_event("evt_50", user, "sub_a", "Startup")).unwrap();
        handler.handle_event(&checkout).await;

        let deleted = WebhookEvent::parse(&subscription_event(
            "evt_51",
            "customer.subscription.deleted",
            "sub_a",
            "canceled",
            "price_startup",
        ))
        .unwrap();
        handler.handle_event(&deleted).await;

        let row = store.records().await.remove(0);
        assert_eq!(row.status, SubscriptionStatus::Canceled);
        assert!(store.find_active_for_user(user).await.unwrap().is_none());
    }
}
