//! Onboard shared library
//!
//! Pieces used by both the billing and API crates: the plan catalog and
//! database bootstrapping.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod db;
pub mod plans;

pub use db::{create_pool, run_migrations};
pub use plans::{
    PlanCatalog, PlanCatalogError, PlanEntry, PlanTarget, FREE_PLAN_KEY, FREE_PLAN_NAME,
    PLAN_CATALOG_ENV,
};
