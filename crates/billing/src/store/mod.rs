//! Subscription record store
//!
//! Every billing write goes through [`SubscriptionStore`]. The Postgres
//! implementation backs production; the in-memory one backs tests.

use async_trait::async_trait;
use time::Duration;
use uuid::Uuid;

use crate::models::{
    NewSubscription, RowUpdate, SubscriptionRecord, SubscriptionUpdate, WebhookProcessingResult,
};

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod postgres;

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemorySubscriptionStore;
pub use postgres::PgSubscriptionStore;

/// A webhook event stuck in `processing` this long may be claimed again
pub const WEBHOOK_PROCESSING_TIMEOUT: Duration = Duration::minutes(30);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// A write would leave a user with two active subscriptions
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of trying to claim a webhook event in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns processing of the event
    Claimed,
    /// The event was already applied successfully
    AlreadyProcessed,
    /// Another delivery holds a claim that has not finished or timed out
    InFlight,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Deactivate the user's other active rows and upsert the new one as
    /// `active`, keyed by `stripe_subscription_id`, as a single atomic step.
    async fn activate_from_checkout(&self, new: NewSubscription)
        -> StoreResult<SubscriptionRecord>;

    /// Update rows matching a Stripe subscription ID. Returns rows affected.
    async fn update_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> StoreResult<u64>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<SubscriptionRecord>>;

    /// Most recently updated active row for a user
    async fn find_active_for_user(&self, user_id: Uuid)
        -> StoreResult<Option<SubscriptionRecord>>;

    async fn update_by_id(
        &self,
        id: Uuid,
        update: RowUpdate,
    ) -> StoreResult<Option<SubscriptionRecord>>;

    /// Claim exclusive processing of a webhook event.
    ///
    /// Events that previously failed, or that have been stuck in `processing`
    /// past [`WEBHOOK_PROCESSING_TIMEOUT`], can be claimed again.
    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
    ) -> StoreResult<ClaimOutcome>;

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        result: WebhookProcessingResult,
        error_message: Option<&str>,
    ) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_stay_database_errors() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn pool_timeouts_are_not_conflicts() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(!matches!(err, StoreError::Conflict(_)));
    }
}
