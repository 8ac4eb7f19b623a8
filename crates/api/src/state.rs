//! Application state

use std::sync::Arc;

use onboard_billing::{BillingService, PgSubscriptionStore};
use reqwest::Client;
use sqlx::PgPool;

use crate::auth::{SupabaseUserDirectory, UserDirectory};
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    /// Auth service lookup used by checkout
    pub users: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        let store = Arc::new(PgSubscriptionStore::new(pool));
        let billing = BillingService::new(
            config.stripe.clone(),
            store,
            Arc::new(config.plans.clone()),
        );
        tracing::info!(
            plans = config.plans.entries().len(),
            "Stripe billing service initialized"
        );

        let users = SupabaseUserDirectory::new(
            Client::new(),
            config.supabase_url.clone(),
            config.supabase_service_key.clone(),
        );

        Self::from_parts(billing, Arc::new(users))
    }

    pub fn from_parts(billing: BillingService, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            billing: Arc::new(billing),
            users,
        }
    }
}
