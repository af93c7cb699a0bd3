//! Entitlement resolution against the external purchase store
//!
//! The store itself (product fetch, payment sheet, receipt verification)
//! is a black box behind [`EntitlementSource`]. This module reduces the
//! records it reports to a single tier and keeps that tier current while
//! the process runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::PurchaseError;
use super::types::{EntitlementRecord, Product, Tier, TransactionResult};

/// Reduce a set of purchase records to the single highest-ranked tier.
///
/// Unverified records and unknown product identifiers are silently
/// excluded; an empty or unmatched set resolves to free. Pure and
/// commutative: input order never matters.
pub fn resolve_tier(records: &[EntitlementRecord]) -> Tier {
    records
        .iter()
        .filter(|r| r.is_verified())
        .filter_map(|r| Tier::from_product_id(&r.product_id))
        .max()
        .unwrap_or(Tier::Free)
}

/// Black-box port to the platform purchase store
#[async_trait]
pub trait EntitlementSource: Send + Sync + 'static {
    /// Fetch the purchasable product catalog. May fail; failure is
    /// non-fatal and leaves any cached catalog stale.
    async fn fetch_products(&self, ids: &[String]) -> Result<Vec<Product>, PurchaseError>;

    /// Snapshot of currently held entitlements
    fn current_entitlements(&self) -> BoxStream<'static, EntitlementRecord>;

    /// Push stream of entitlement changes: purchases, renewals,
    /// revocations, restores. Consuming a record acknowledges it.
    fn entitlement_updates(&self) -> BoxStream<'static, EntitlementRecord>;

    /// Run the purchase flow for one product
    async fn purchase(&self, product_id: &str) -> Result<TransactionResult, PurchaseError>;
}

#[async_trait]
impl<T: EntitlementSource> EntitlementSource for Arc<T> {
    async fn fetch_products(&self, ids: &[String]) -> Result<Vec<Product>, PurchaseError> {
        (**self).fetch_products(ids).await
    }

    fn current_entitlements(&self) -> BoxStream<'static, EntitlementRecord> {
        (**self).current_entitlements()
    }

    fn entitlement_updates(&self) -> BoxStream<'static, EntitlementRecord> {
        (**self).entitlement_updates()
    }

    async fn purchase(&self, product_id: &str) -> Result<TransactionResult, PurchaseError> {
        (**self).purchase(product_id).await
    }
}

struct ClientInner<S> {
    source: S,
    products: Mutex<HashMap<String, Product>>,
    tier_tx: watch::Sender<Tier>,
}

impl<S: EntitlementSource> ClientInner<S> {
    async fn refresh_entitlements(&self) -> Tier {
        let records: Vec<EntitlementRecord> = self.source.current_entitlements().collect().await;
        let tier = resolve_tier(&records);
        // send_if_modified keeps spurious wakeups out of the tier listener
        self.tier_tx.send_if_modified(|current| {
            if *current != tier {
                *current = tier;
                true
            } else {
                false
            }
        });
        debug!(tier = %tier, records = records.len(), "Resolved entitlements");
        tier
    }
}

/// Keeps the resolved tier current against an [`EntitlementSource`]
pub struct StoreClient<S: EntitlementSource> {
    inner: Arc<ClientInner<S>>,
    tier_rx: watch::Receiver<Tier>,
    update_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: EntitlementSource> StoreClient<S> {
    pub fn new(source: S) -> Self {
        let (tier_tx, tier_rx) = watch::channel(Tier::Free);
        Self {
            inner: Arc::new(ClientInner {
                source,
                products: Mutex::new(HashMap::new()),
                tier_tx,
            }),
            tier_rx,
            update_task: Mutex::new(None),
        }
    }

    /// Currently resolved tier
    pub fn tier(&self) -> Tier {
        *self.tier_rx.borrow()
    }

    /// Watch channel carrying every resolved tier change
    pub fn subscribe(&self) -> watch::Receiver<Tier> {
        self.tier_rx.clone()
    }

    /// Load and cache the product catalog for all paid tiers.
    ///
    /// Fetch failure logs a warning and keeps the previous catalog.
    pub async fn load_products(&self) {
        let ids: Vec<String> = Tier::ALL
            .iter()
            .filter_map(|t| t.product_id())
            .map(str::to_string)
            .collect();

        match self.inner.source.fetch_products(&ids).await {
            Ok(products) => {
                let mut cache = self.inner.products.lock().unwrap();
                *cache = products.into_iter().map(|p| (p.id.clone(), p)).collect();
                debug!(count = cache.len(), "Loaded product catalog");
            }
            Err(e) => {
                warn!(error = %e, "Failed to load products, keeping stale catalog");
            }
        }
    }

    /// Cached product for a tier, if the catalog has been loaded
    pub fn product(&self, tier: Tier) -> Option<Product> {
        let id = tier.product_id()?;
        self.inner.products.lock().unwrap().get(id).cloned()
    }

    /// Re-resolve the tier from the store's current entitlements
    pub async fn refresh_entitlements(&self) -> Tier {
        self.inner.refresh_entitlements().await
    }

    /// Purchase the product backing a tier.
    ///
    /// On a verified purchase, exactly one entitlement re-resolution runs
    /// before this returns, so callers observe the new tier immediately.
    /// Failure and cancellation leave all state untouched.
    pub async fn purchase(&self, tier: Tier) -> Result<Tier, PurchaseError> {
        let product_id = tier
            .product_id()
            .ok_or_else(|| PurchaseError::ProductUnavailable(tier.to_string()))?;

        match self.inner.source.purchase(product_id).await? {
            TransactionResult::Purchased(record) if record.is_verified() => {
                Ok(self.refresh_entitlements().await)
            }
            TransactionResult::Purchased(_) => Err(PurchaseError::Unverified),
            TransactionResult::UserCancelled => Err(PurchaseError::Cancelled),
            TransactionResult::Pending => Err(PurchaseError::Pending),
        }
    }

    /// Spawn the long-lived task that follows `entitlement_updates()`.
    ///
    /// One task per process lifetime: spawning again replaces (and aborts)
    /// the previous task. Aborted on [`Self::shutdown`] and on drop.
    pub fn spawn_update_task(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut updates = inner.source.entitlement_updates();
            while let Some(record) = updates.next().await {
                debug!(product = %record.product_id, "Entitlement update received");
                inner.refresh_entitlements().await;
            }
        });

        let mut slot = self.update_task.lock().unwrap();
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the update subscription. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(handle) = self.update_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl<S: EntitlementSource> Drop for StoreClient<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
