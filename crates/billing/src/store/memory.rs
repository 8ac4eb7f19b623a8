//! In-memory subscription store
//!
//! Mirrors the Postgres semantics, including the one-active-row-per-user
//! constraint, under a single lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ClaimOutcome, StoreError, StoreResult, SubscriptionStore, WEBHOOK_PROCESSING_TIMEOUT,
};
use crate::models::{
    NewSubscription, RowUpdate, SubscriptionRecord, SubscriptionStatus, SubscriptionUpdate,
    WebhookProcessingResult,
};

#[derive(Debug, Clone)]
struct WebhookEventEntry {
    event_type: String,
    result: WebhookProcessingResult,
    error_message: Option<String>,
    updated_at: OffsetDateTime,
}

#[derive(Default)]
struct State {
    rows: Vec<SubscriptionRecord>,
    webhook_events: HashMap<String, WebhookEventEntry>,
}

impl State {
    /// Reject a write that would give `user_id` a second active row
    fn check_single_active(&self, user_id: Uuid, except: Uuid) -> StoreResult<()> {
        let clash = self
            .rows
            .iter()
            .any(|r| r.user_id == user_id && r.id != except && r.status.is_active());
        if clash {
            return Err(StoreError::Conflict(format!(
                "user {} already has an active subscription",
                user_id
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySubscriptionStore {
    state: Mutex<State>,
    fail_subscription_writes: AtomicBool,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row
    pub async fn records(&self) -> Vec<SubscriptionRecord> {
        self.state.lock().await.rows.clone()
    }

    pub async fn active_count_for_user(&self, user_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .rows
            .iter()
            .filter(|r| r.user_id == user_id && r.status.is_active())
            .count()
    }

    /// Ledger state of a webhook event: result, error message and event type
    pub async fn webhook_event(
        &self,
        event_id: &str,
    ) -> Option<(WebhookProcessingResult, Option<String>, String)> {
        self.state
            .lock()
            .await
            .webhook_events
            .get(event_id)
            .map(|e| (e.result, e.error_message.clone(), e.event_type.clone()))
    }

    /// Make subsequent subscription writes fail with [`StoreError::Unavailable`]
    pub fn fail_subscription_writes(&self, fail: bool) {
        self.fail_subscription_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_subscription_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "subscription writes disabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn activate_from_checkout(
        &self,
        new: NewSubscription,
    ) -> StoreResult<SubscriptionRecord> {
        self.check_writable()?;
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock().await;

        for row in state.rows.iter_mut().filter(|r| {
            r.user_id == new.user_id
                && r.status.is_active()
                && r.stripe_subscription_id != new.stripe_subscription_id
        }) {
            row.status = SubscriptionStatus::Inactive;
            row.updated_at = now;
        }

        let existing = state
            .rows
            .iter()
            .position(|r| r.stripe_subscription_id == new.stripe_subscription_id);

        let record = match existing {
            Some(idx) => {
                let row = &mut state.rows[idx];
                row.user_id = new.user_id;
                if new.stripe_customer_id.is_some() {
                    row.stripe_customer_id = new.stripe_customer_id;
                }
                row.plan_name = new.plan_name;
                row.status = SubscriptionStatus::Active;
                row.updated_at = now;
                row.clone()
            }
            None => {
                let row = SubscriptionRecord {
                    id: Uuid::new_v4(),
                    user_id: new.user_id,
                    stripe_customer_id: new.stripe_customer_id,
                    stripe_subscription_id: new.stripe_subscription_id,
                    plan_name: new.plan_name,
                    status: SubscriptionStatus::Active,
                    created_at: now,
                    updated_at: now,
                };
                state.rows.push(row.clone());
                row
            }
        };

        Ok(record)
    }

    async fn update_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> StoreResult<u64> {
        self.check_writable()?;
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock().await;

        if update.status.is_active() {
            let targets: Vec<(Uuid, Uuid)> = state
                .rows
                .iter()
                .filter(|r| r.stripe_subscription_id == stripe_subscription_id)
                .map(|r| (r.user_id, r.id))
                .collect();
            for (user_id, id) in targets {
                state.check_single_active(user_id, id)?;
            }
        }

        let mut affected = 0;
        for row in state
            .rows
            .iter_mut()
            .filter(|r| r.stripe_subscription_id == stripe_subscription_id)
        {
            row.status = update.status.clone();
            if let Some(plan_name) = &update.plan_name {
                row.plan_name = plan_name.clone();
            }
            row.updated_at = now;
            affected += 1;
        }

        Ok(affected)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<SubscriptionRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .rows
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> StoreResult<Option<SubscriptionRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .rows
            .iter()
            .filter(|r| r.user_id == user_id && r.status.is_active())
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        update: RowUpdate,
    ) -> StoreResult<Option<SubscriptionRecord>> {
        self.check_writable()?;
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock().await;

        let Some(user_id) = state.rows.iter().find(|r| r.id == id).map(|r| r.user_id) else {
            return Ok(None);
        };
        if update.status.as_ref().is_some_and(SubscriptionStatus::is_active) {
            state.check_single_active(user_id, id)?;
        }
        if let Some(new_sid) = &update.stripe_subscription_id {
            if state
                .rows
                .iter()
                .any(|r| r.id != id && &r.stripe_subscription_id == new_sid)
            {
                return Err(StoreError::Conflict(format!(
                    "stripe subscription {} already recorded",
                    new_sid
                )));
            }
        }

        let row = state.rows.iter_mut().find(|r| r.id == id);
        Ok(row.map(|row| {
            if let Some(status) = update.status {
                row.status = status;
            }
            if let Some(plan_name) = update.plan_name {
                row.plan_name = plan_name;
            }
            if let Some(sid) = update.stripe_subscription_id {
                row.stripe_subscription_id = sid;
            }
            row.updated_at = now;
            row.clone()
        }))
    }

    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
    ) -> StoreResult<ClaimOutcome> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock().await;

        if let Some(entry) = state.webhook_events.get_mut(event_id) {
            match entry.result {
                WebhookProcessingResult::Success => return Ok(ClaimOutcome::AlreadyProcessed),
                WebhookProcessingResult::Processing
                    if entry.updated_at >= now - WEBHOOK_PROCESSING_TIMEOUT =>
                {
                    return Ok(ClaimOutcome::InFlight);
                }
                _ => {}
            }
            entry.result = WebhookProcessingResult::Processing;
            entry.error_message = None;
            entry.updated_at = now;
            return Ok(ClaimOutcome::Claimed);
        }

        state.webhook_events.insert(
            event_id.to_string(),
            WebhookEventEntry {
                event_type: event_type.to_string(),
                result: WebhookProcessingResult::Processing,
                error_message: None,
                updated_at: now,
            },
        );
        Ok(ClaimOutcome::Claimed)
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        result: WebhookProcessingResult,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.webhook_events.get_mut(event_id) {
            entry.result = result;
            entry.error_message = error_message.map(str::to_string);
            entry.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }
}
