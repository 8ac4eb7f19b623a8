//! Postgres-backed subscription store

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ClaimOutcome, StoreResult, SubscriptionStore, WEBHOOK_PROCESSING_TIMEOUT};
use crate::models::{
    NewSubscription, RowUpdate, SubscriptionRecord, SubscriptionStatus, SubscriptionUpdate,
    WebhookProcessingResult,
};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, stripe_customer_id, stripe_subscription_id, \
                                    plan_name, status, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: String,
    plan_name: String,
    status: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<SubscriptionRow> for SubscriptionRecord {
    fn from(row: SubscriptionRow) -> Self {
        SubscriptionRecord {
            id: row.id,
            user_id: row.user_id,
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            plan_name: row.plan_name,
            status: SubscriptionStatus::from(row.status),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Subscription store over the `subscriptions` and `stripe_webhook_events` tables
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn activate_from_checkout(
        &self,
        new: NewSubscription,
    ) -> StoreResult<SubscriptionRecord> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let deactivated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'inactive', updated_at = $3
            WHERE user_id = $1
              AND status = 'active'
              AND stripe_subscription_id <> $2
            "#,
        )
        .bind(new.user_id)
        .bind(&new.stripe_subscription_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let row: SubscriptionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscriptions
                (id, user_id, stripe_customer_id, stripe_subscription_id, plan_name, status,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'active', $6, $6)
            ON CONFLICT (stripe_subscription_id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id,
                                              subscriptions.stripe_customer_id),
                plan_name = EXCLUDED.plan_name,
                status = 'active',
                updated_at = EXCLUDED.updated_at
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new.user_id)
        .bind(&new.stripe_customer_id)
        .bind(&new.stripe_subscription_id)
        .bind(&new.plan_name)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if deactivated > 0 {
            tracing::info!(
                user_id = %new.user_id,
                deactivated = deactivated,
                "Deactivated previous active subscriptions"
            );
        }

        Ok(row.into())
    }

    async fn update_by_stripe_id(
        &self,
        stripe_subscription_id: &str,
        update: SubscriptionUpdate,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $2,
                plan_name = COALESCE($3, plan_name),
                updated_at = $4
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(update.status.as_str())
        .bind(&update.plan_name)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_active_for_user(
        &self,
        user_id: Uuid,
    ) -> StoreResult<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1 AND status = 'active'
            ORDER BY updated_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        update: RowUpdate,
    ) -> StoreResult<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions
            SET status = COALESCE($2, status),
                plan_name = COALESCE($3, plan_name),
                stripe_subscription_id = COALESCE($4, stripe_subscription_id),
                updated_at = $5
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.status.as_ref().map(SubscriptionStatus::as_str))
        .bind(&update.plan_name)
        .bind(&update.stripe_subscription_id)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
    ) -> StoreResult<ClaimOutcome> {
        let now = OffsetDateTime::now_utc();
        let stale_before = now - WEBHOOK_PROCESSING_TIMEOUT;

        // INSERT...ON CONFLICT...RETURNING hands the claim to exactly one caller
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (id, stripe_event_id, event_type, processing_result, created_at, updated_at)
            VALUES ($1, $2, $3, 'processing', $4, $4)
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                error_message = NULL,
                updated_at = EXCLUDED.updated_at
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.updated_at < $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(event_type)
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(ClaimOutcome::Claimed);
        }

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT processing_result FROM stripe_webhook_events WHERE stripe_event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match existing {
            Some((result,)) if result == WebhookProcessingResult::Success.as_str() => {
                ClaimOutcome::AlreadyProcessed
            }
            // Still processing, or failed between the two queries. The sender retries.
            _ => ClaimOutcome::InFlight,
        })
    }

    async fn finish_webhook_event(
        &self,
        event_id: &str,
        result: WebhookProcessingResult,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $2, error_message = $3, updated_at = $4
            WHERE stripe_event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(result.as_str())
        .bind(error_message)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
