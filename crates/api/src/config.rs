//! Configuration for the API server

use onboard_billing::StripeConfig;
use onboard_shared::{PlanCatalog, PlanCatalogError, PLAN_CATALOG_ENV};

const DEFAULT_SUCCESS_URL: &str = "http://localhost:3000/dashboard?checkout=success";
const DEFAULT_CANCEL_URL: &str = "http://localhost:3000/pricing?checkout=canceled";
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {0}")]
    Invalid(&'static str),

    #[error("invalid PLAN_CATALOG: {0}")]
    PlanCatalog(#[from] PlanCatalogError),
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Supabase project URL, without trailing slash
    pub supabase_url: String,
    pub supabase_service_key: String,
    pub stripe: StripeConfig,
    pub plans: PlanCatalog,
    pub allowed_origins: Vec<String>,
    pub run_migrations: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let database_url = required("DATABASE_URL")?;
        let supabase_url = required("SUPABASE_URL")?.trim_end_matches('/').to_string();
        let supabase_service_key = required("SUPABASE_SERVICE_KEY")?;

        let stripe = StripeConfig {
            secret_key: required("STRIPE_SECRET_KEY")?,
            webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            success_url: get("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|| DEFAULT_SUCCESS_URL.to_string()),
            cancel_url: get("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|| DEFAULT_CANCEL_URL.to_string()),
        };

        let plans = PlanCatalog::load(get(PLAN_CATALOG_ENV).as_deref())?;

        let bind_address =
            get("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let allowed_origins = get("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGINS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let run_migrations = match get("RUN_MIGRATIONS") {
            Some(v) => v
                .trim()
                .parse::<bool>()
                .map_err(|_| ConfigError::Invalid("RUN_MIGRATIONS"))?,
            None => true,
        };

        Ok(Self {
            database_url,
            bind_address,
            supabase_url,
            supabase_service_key,
            stripe,
            plans,
            allowed_origins,
            run_migrations,
        })
    }
}
