//! Subscription manager facade consumed by the UI layer
//!
//! Bridges the entitlement resolver and the quota engine: resolver tier
//! changes flow into the engine, and the engine's gate and counters are
//! published on watch channels the UI can observe. All engine mutation is
//! serialized through one async mutex, so concurrent callers queue rather
//! than race.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::entitlement::{EntitlementSource, StoreClient};
use super::error::PurchaseError;
use super::plans::{load_modes, ChatMode, Plan, PlanCatalog};
use super::quota::QuotaEngine;
use super::types::Tier;

/// Shown when no price is known for a tier
const PRICE_PLACEHOLDER: &str = "—";

struct ManagerInner<S: EntitlementSource> {
    store_client: StoreClient<S>,
    engine: Mutex<QuotaEngine>,
    /// Resource directory holding `plans_{locale}.json` and `modes.json`;
    /// None keeps the built-in catalog
    resource_dir: Option<PathBuf>,
    locale: Mutex<String>,
    tier_tx: watch::Sender<Tier>,
    remaining_tx: watch::Sender<u32>,
}

impl<S: EntitlementSource> ManagerInner<S> {
    /// Push a resolved tier into the quota engine and republish observables
    async fn apply_tier(&self, tier: Tier) {
        let catalog = self.current_catalog().await;
        let mut engine = self.engine.lock().await;
        engine.set_catalog(catalog);
        engine.apply_tier(tier);

        let remaining = engine.remaining_messages_today();
        drop(engine);

        // Balance first so tier observers read a consistent pair
        self.remaining_tx.send_replace(remaining);
        self.tier_tx.send_replace(tier);
    }

    async fn current_catalog(&self) -> PlanCatalog {
        let Some(dir) = &self.resource_dir else {
            return PlanCatalog::builtin();
        };

        let locale = self.locale.lock().await.clone();
        match PlanCatalog::load(dir, &locale) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!(locale = locale, error = %e, "Failed to load plans, using builtin");
                PlanCatalog::builtin()
            }
        }
    }
}

/// UI-facing subscription surface
pub struct SubscriptionManager<S: EntitlementSource> {
    inner: Arc<ManagerInner<S>>,
    modes: Vec<ChatMode>,
    tier_rx: watch::Receiver<Tier>,
    remaining_rx: watch::Receiver<u32>,
    listener_task: StdMutex<Option<JoinHandle<()>>>,
}

impl<S: EntitlementSource> SubscriptionManager<S> {
    pub fn new(source: S, engine: QuotaEngine, resource_dir: Option<PathBuf>) -> Self {
        let remaining = engine.remaining_messages_today();
        let (tier_tx, tier_rx) = watch::channel(Tier::Free);
        let (remaining_tx, remaining_rx) = watch::channel(remaining);

        let modes = match &resource_dir {
            Some(dir) => load_modes(dir),
            None => ChatMode::fallback_modes(),
        };

        Self {
            inner: Arc::new(ManagerInner {
                store_client: StoreClient::new(source),
                engine: Mutex::new(engine),
                resource_dir,
                locale: Mutex::new("en".to_string()),
                tier_tx,
                remaining_tx,
            }),
            modes,
            tier_rx,
            remaining_rx,
            listener_task: StdMutex::new(None),
        }
    }

    /// Load products, resolve the initial tier, apply it to the quota
    /// engine, and start following entitlement updates.
    pub async fn start(&self) {
        self.inner.store_client.load_products().await;

        let tier = self.inner.store_client.refresh_entitlements().await;
        self.inner.apply_tier(tier).await;

        self.inner.store_client.spawn_update_task();
        self.spawn_tier_listener();
        info!(tier = %tier, "Subscription manager started");
    }

    /// Stop background tasks. Also runs on drop.
    pub fn shutdown(&self) {
        self.inner.store_client.shutdown();
        if let Some(handle) = self.listener_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    // Forwards resolver tier changes into the quota engine for the
    // process lifetime; aborted on shutdown.
    fn spawn_tier_listener(&self) {
        let inner = Arc::clone(&self.inner);
        let mut tier_rx = self.inner.store_client.subscribe();

        let handle = tokio::spawn(async move {
            while tier_rx.changed().await.is_ok() {
                let tier = *tier_rx.borrow_and_update();
                inner.apply_tier(tier).await;
            }
        });

        let mut slot = self.listener_task.lock().unwrap();
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Observable resolved tier
    pub fn tier(&self) -> Tier {
        *self.tier_rx.borrow()
    }

    /// Watch channel for tier changes
    pub fn subscribe_tier(&self) -> watch::Receiver<Tier> {
        self.tier_rx.clone()
    }

    /// Observable free-tier message balance
    pub fn remaining_messages_today(&self) -> u32 {
        *self.remaining_rx.borrow()
    }

    /// Watch channel for balance changes
    pub fn subscribe_remaining(&self) -> watch::Receiver<u32> {
        self.remaining_rx.clone()
    }

    /// Whether a message can be sent right now (refills first)
    pub async fn can_send_message(&self) -> bool {
        let mut engine = self.inner.engine.lock().await;
        engine.refill_if_needed();
        let can_send = engine.can_send_message();
        let remaining = engine.remaining_messages_today();
        drop(engine);

        self.inner.remaining_tx.send_replace(remaining);
        can_send
    }

    /// Spend one free-tier message; no-op on paid tiers and at zero
    pub async fn consume_message_if_needed(&self) {
        let mut engine = self.inner.engine.lock().await;
        engine.consume_message_if_needed();
        let remaining = engine.remaining_messages_today();
        drop(engine);

        self.inner.remaining_tx.send_replace(remaining);
    }

    /// Daily allowance for the current tier's plan
    pub async fn daily_message_limit(&self) -> u32 {
        self.inner.engine.lock().await.daily_message_limit()
    }

    /// Countdown target for the next free-message credit
    pub async fn next_refill_at(&self) -> DateTime<Utc> {
        self.inner.engine.lock().await.next_refill_at()
    }

    /// Time until the next credit, clamped at zero
    pub async fn next_refill_in(&self) -> Duration {
        self.inner.engine.lock().await.next_refill_in(Utc::now())
    }

    /// Purchase the product backing a tier; the new tier is applied to
    /// the quota engine before this returns.
    pub async fn purchase(&self, tier: Tier) -> Result<Tier, PurchaseError> {
        let resolved = self.inner.store_client.purchase(tier).await?;
        self.inner.apply_tier(resolved).await;
        Ok(resolved)
    }

    /// Localized display price for a tier, placeholder when unknown
    pub fn price(&self, tier: Tier) -> String {
        match self.inner.store_client.product(tier) {
            Some(product) => product.display_price,
            None => PRICE_PLACEHOLDER.to_string(),
        }
    }

    /// Chat modes the current tier's plan permits
    pub async fn allowed_modes(&self) -> Vec<ChatMode> {
        let engine = self.inner.engine.lock().await;
        let allowed = engine.catalog().plan(engine.tier()).allowed_modes.clone();
        drop(engine);

        self.modes
            .iter()
            .filter(|mode| allowed.permits(&mode.id))
            .cloned()
            .collect()
    }

    /// Whether the current plan carries a feature flag
    pub async fn has_feature(&self, feature: &str) -> bool {
        let engine = self.inner.engine.lock().await;
        let plan = engine.catalog().plan(engine.tier());
        plan.features.iter().any(|f| f == feature)
    }

    /// Plan-table convenience: programming mode access
    pub async fn can_use_programming_mode(&self) -> bool {
        self.has_feature("programming_mode").await
    }

    /// Plan-table convenience: vision access
    pub async fn can_use_vision(&self) -> bool {
        self.has_feature("vision").await
    }

    /// Switch the plan locale; plans are replaced wholesale
    pub async fn set_language(&self, locale: &str) {
        {
            let mut current = self.inner.locale.lock().await;
            if *current == locale {
                return;
            }
            *current = locale.to_string();
        }
        debug!(locale = locale, "Language changed, reloading plans");
        self.sync().await;
    }

    /// Re-apply the currently resolved tier (startup or manual refresh)
    pub async fn sync(&self) {
        let tier = self.inner.store_client.tier();
        self.inner.apply_tier(tier).await;
    }

    /// Plans in the active catalog, for the paywall UI
    pub async fn plans(&self) -> Vec<Plan> {
        self.inner
            .engine
            .lock()
            .await
            .catalog()
            .plans()
            .cloned()
            .collect()
    }
}

impl<S: EntitlementSource> Drop for SubscriptionManager<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
