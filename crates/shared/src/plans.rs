//! Plan catalog
//!
//! The single mapping between Stripe price IDs and the plan names stored on
//! subscription rows. Both the webhook update path and the downgrade path
//! resolve plans through this type.

use serde::Serialize;

/// Key of the implicit free plan
pub const FREE_PLAN_KEY: &str = "free";

/// Display name written to subscription rows on the free plan
pub const FREE_PLAN_NAME: &str = "Free";

/// Environment variable holding the catalog definition
pub const PLAN_CATALOG_ENV: &str = "PLAN_CATALOG";

/// A paid plan backed by a Stripe price
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    /// Lookup key used by API callers (e.g. `startup`)
    pub key: String,
    /// Human readable name stored in `plan_name`
    pub display_name: String,
    /// Stripe price identifier
    pub price_id: String,
}

/// Result of resolving a requested plan key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTarget<'a> {
    Free,
    Paid(&'a PlanEntry),
}

impl PlanTarget<'_> {
    pub fn display_name(&self) -> &str {
        match self {
            PlanTarget::Free => FREE_PLAN_NAME,
            PlanTarget::Paid(entry) => &entry.display_name,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanCatalogError {
    #[error("malformed plan entry '{0}', expected key:price_id:Display Name")]
    Malformed(String),

    #[error("duplicate plan key '{0}'")]
    DuplicateKey(String),

    #[error("duplicate price id '{0}'")]
    DuplicatePrice(String),

    #[error("plan key 'free' is reserved")]
    ReservedKey,
}

/// Price ID ↔ plan name table
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    entries: Vec<PlanEntry>,
}

impl PlanCatalog {
    /// Parse `key:price_id:Display Name` entries separated by commas.
    pub fn parse(definition: &str) -> Result<Self, PlanCatalogError> {
        let mut catalog = Self::default();

        for raw in definition.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let mut parts = raw.splitn(3, ':').map(str::trim);
            let (Some(key), Some(price_id), Some(display_name)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Err(PlanCatalogError::Malformed(raw.to_string()));
            };

            if key.is_empty() || price_id.is_empty() || display_name.is_empty() {
                return Err(PlanCatalogError::Malformed(raw.to_string()));
            }

            catalog.push(PlanEntry {
                key: key.to_ascii_lowercase(),
                display_name: display_name.to_string(),
                price_id: price_id.to_string(),
            })?;
        }

        Ok(catalog)
    }

    /// Load from the value of `PLAN_CATALOG`. An unset variable yields a free-only catalog.
    pub fn load(definition: Option<&str>) -> Result<Self, PlanCatalogError> {
        match definition {
            Some(definition) => Self::parse(definition),
            None => {
                tracing::warn!("{} not set - only the free plan is available", PLAN_CATALOG_ENV);
                Ok(Self::default())
            }
        }
    }

    fn push(&mut self, entry: PlanEntry) -> Result<(), PlanCatalogError> {
        if entry.key.eq_ignore_ascii_case(FREE_PLAN_KEY) {
            return Err(PlanCatalogError::ReservedKey);
        }
        if self.entries.iter().any(|e| e.key.eq_ignore_ascii_case(&entry.key)) {
            return Err(PlanCatalogError::DuplicateKey(entry.key));
        }
        if self.entries.iter().any(|e| e.price_id == entry.price_id) {
            return Err(PlanCatalogError::DuplicatePrice(entry.price_id));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn plan_name_for_price(&self, price_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.price_id == price_id)
            .map(|e| e.display_name.as_str())
    }

    pub fn entry(&self, key: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.key.eq_ignore_ascii_case(key.trim()))
    }

    /// Resolve a user supplied plan key, including the implicit free plan.
    pub fn resolve_target(&self, key: &str) -> Option<PlanTarget<'_>> {
        if key.trim().eq_ignore_ascii_case(FREE_PLAN_KEY) {
            return Some(PlanTarget::Free);
        }
        self.entry(key).map(PlanTarget::Paid)
    }
}
