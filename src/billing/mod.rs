//! Billing module: entitlement resolution and message quota
//!
//! This module handles:
//! - Resolving verified purchase records to a subscription tier
//! - Free-tier daily message quota with lazy interval refills
//! - Plan/mode configuration per locale
//! - The subscription manager facade the UI observes

mod entitlement;
pub mod error;
mod manager;
mod plans;
mod quota;
mod types;

pub use entitlement::{resolve_tier, EntitlementSource, StoreClient};
pub use error::{BillingError, PurchaseError, StoreError};
pub use manager::SubscriptionManager;
pub use plans::{load_modes, AllowedModes, ChatMode, Plan, PlanCatalog};
pub use quota::{
    QuotaEngine, INITIALIZED_KEY, LAST_CONSUME_KEY, REFILL_INTERVAL_SECS, REMAINING_KEY,
};
pub use types::{EntitlementRecord, Product, Tier, TransactionResult, Verification};
