//! Subscription entitlement and message-quota engine for the Borealis
//! chat client.
//!
//! Two cooperating components sit behind a thin facade:
//!
//! - the entitlement resolver reduces verified purchase records from the
//!   platform store to a single subscription tier;
//! - the quota engine gates free-tier message sends, crediting one
//!   message per elapsed refill interval and persisting its counters.
//!
//! The UI layer consumes [`billing::SubscriptionManager`] and never talks
//! to the store or the persistence layer directly.

pub mod billing;
pub mod persist;

pub use billing::{
    resolve_tier, BillingError, ChatMode, EntitlementRecord, EntitlementSource, Plan, PlanCatalog,
    Product, PurchaseError, QuotaEngine, SubscriptionManager, Tier, TransactionResult,
    Verification,
};
pub use persist::{KeyValueStore, MemoryStore, SqliteStore};
