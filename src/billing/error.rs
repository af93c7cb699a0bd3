//! Error taxonomy for the billing subsystem
//!
//! Expected conditions are representable states, not errors: a missing
//! entitlement resolves to the free tier, an exhausted quota reads as
//! `can_send_message == false`, an unverified record is silently excluded,
//! and corrupt persisted counters are clamped on load. Only the purchase
//! flow, resource loading, and the persistence layer surface failures.

use thiserror::Error;

/// Failure reported by the durable key-value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store: {0}")]
    Open(String),
    #[error("store query failed: {0}")]
    Query(String),
}

/// Purchase flow failure, surfaced to the caller with no state mutated
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PurchaseError {
    #[error("purchase cancelled by user")]
    Cancelled,
    #[error("purchase is pending approval")]
    Pending,
    #[error("product {0} is not available")]
    ProductUnavailable(String),
    #[error("transaction failed verification")]
    Unverified,
    #[error("store error: {0}")]
    Store(String),
}

/// Top-level billing error
#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Purchase(#[from] PurchaseError),
    #[error("resource {path}: {reason}")]
    Resource { path: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}
