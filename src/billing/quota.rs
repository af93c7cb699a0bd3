//! Free-tier message quota engine
//!
//! Gates and accounts for free-tier message usage; paid tiers bypass the
//! bookkeeping entirely. Refills are lazy: one message is credited per
//! elapsed refill interval whenever the engine is next touched, never on a
//! timer. Counters persist across restarts through the key-value port.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, warn};

use super::plans::PlanCatalog;
use super::types::Tier;
use crate::persist::KeyValueStore;

/// Persisted key: messages left today
pub const REMAINING_KEY: &str = "remainingMessagesToday";
/// Persisted key: last consume timestamp, doubles as the refill checkpoint
pub const LAST_CONSUME_KEY: &str = "lastMessageConsumeDate";
/// Persisted key: free allowance seeded at least once
pub const INITIALIZED_KEY: &str = "freeTierInitialized";

/// One message credited per interval (2 hours)
pub const REFILL_INTERVAL_SECS: i64 = 2 * 60 * 60;

/// Quota engine: owns the persisted counters and the active plan table
pub struct QuotaEngine {
    store: Box<dyn KeyValueStore>,
    catalog: PlanCatalog,
    tier: Tier,
    refill_interval: Duration,
    remaining: u32,
    last_consume_at: DateTime<Utc>,
    initialized: bool,
}

impl QuotaEngine {
    /// Build the engine, restoring persisted state.
    ///
    /// Corrupted or out-of-range persisted values are clamped into
    /// `[0, daily limit]` silently; they never surface as errors.
    pub fn new(store: Box<dyn KeyValueStore>, catalog: PlanCatalog) -> Self {
        Self::with_refill_interval(store, catalog, Duration::seconds(REFILL_INTERVAL_SECS))
    }

    /// Engine with a custom refill interval (shortened in tests)
    pub fn with_refill_interval(
        store: Box<dyn KeyValueStore>,
        catalog: PlanCatalog,
        refill_interval: Duration,
    ) -> Self {
        let free_limit = catalog.daily_message_limit(Tier::Free);

        let remaining = read_i64(&*store, REMAINING_KEY)
            .map(|v| v.clamp(0, free_limit as i64) as u32)
            .unwrap_or(0);

        let last_consume_at = read_i64(&*store, LAST_CONSUME_KEY)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        let initialized = matches!(
            store.get(INITIALIZED_KEY).ok().flatten().as_deref(),
            Some("true")
        );

        Self {
            store,
            catalog,
            tier: Tier::Free,
            refill_interval,
            remaining,
            last_consume_at,
            initialized,
        }
    }

    /// Apply a newly resolved tier: seed the free allowance on first
    /// contact with the free tier, then credit any elapsed intervals.
    ///
    /// Seeding happens at most once per installation; leaving and
    /// re-entering the free tier resumes from whatever was persisted.
    pub fn apply_tier(&mut self, tier: Tier) {
        self.apply_tier_at(tier, Utc::now());
    }

    /// Explicit-clock variant of [`Self::apply_tier`]
    pub fn apply_tier_at(&mut self, tier: Tier, now: DateTime<Utc>) {
        if self.tier != tier {
            debug!(from = %self.tier, to = %tier, "Tier changed");
        }
        self.tier = tier;

        if tier.is_free() && !self.initialized {
            self.remaining = self.daily_message_limit();
            self.last_consume_at = now;
            self.initialized = true;
            self.persist_remaining();
            self.persist_checkpoint();
            self.persist(INITIALIZED_KEY, "true");
            debug!(seeded = self.remaining, "Seeded free-tier allowance");
        }

        self.refill_if_needed_at(now);
    }

    /// Replace the plan table (locale or configuration change)
    pub fn set_catalog(&mut self, catalog: PlanCatalog) {
        self.catalog = catalog;
        // A smaller limit in the new catalog caps the stored balance
        let limit = self.catalog.daily_message_limit(Tier::Free);
        if self.remaining > limit {
            self.remaining = limit;
            self.persist_remaining();
        }
    }

    /// Credit one message per fully elapsed refill interval.
    ///
    /// The checkpoint advances by whole intervals rather than jumping to
    /// `now`, so the sub-interval remainder is preserved and refills stay
    /// on a fixed cadence. Calling twice within the same instant changes
    /// state at most once.
    pub fn refill_if_needed(&mut self) {
        self.refill_if_needed_at(Utc::now());
    }

    /// Explicit-clock variant of [`Self::refill_if_needed`]
    pub fn refill_if_needed_at(&mut self, now: DateTime<Utc>) {
        if !self.tier.is_free() {
            return;
        }

        let elapsed = now.signed_duration_since(self.last_consume_at);
        let interval_secs = self.refill_interval.num_seconds();
        if interval_secs <= 0 {
            return;
        }

        let refill_count = elapsed.num_seconds() / interval_secs;
        if refill_count <= 0 {
            return;
        }

        let limit = self.daily_message_limit();
        self.remaining = self
            .remaining
            .saturating_add(refill_count.min(u32::MAX as i64) as u32)
            .min(limit);
        self.last_consume_at += Duration::seconds(refill_count * interval_secs);

        self.persist_remaining();
        self.persist_checkpoint();
        debug!(
            credited = refill_count,
            remaining = self.remaining,
            "Refilled message allowance"
        );
    }

    /// Spend one message from the free allowance.
    ///
    /// Paid tiers are a no-op. A just-elapsed interval is credited before
    /// the decrement. At zero remaining this is a silent guard, not an
    /// error; callers check [`Self::can_send_message`] first.
    pub fn consume_message_if_needed(&mut self) {
        self.consume_message_if_needed_at(Utc::now());
    }

    /// Explicit-clock variant of [`Self::consume_message_if_needed`]
    pub fn consume_message_if_needed_at(&mut self, now: DateTime<Utc>) {
        if !self.tier.is_free() {
            return;
        }

        self.refill_if_needed_at(now);

        if self.remaining > 0 {
            self.remaining -= 1;
            self.last_consume_at = now;
            self.persist_remaining();
            self.persist_checkpoint();
            debug!(remaining = self.remaining, "Consumed message");
        }
    }

    /// Paid tiers always send; free tier needs balance
    pub fn can_send_message(&self) -> bool {
        !self.tier.is_free() || self.remaining > 0
    }

    /// Messages left today (only meaningful on the free tier)
    pub fn remaining_messages_today(&self) -> u32 {
        self.remaining
    }

    /// Daily allowance from the active plan for the current tier
    pub fn daily_message_limit(&self) -> u32 {
        self.catalog.daily_message_limit(self.tier)
    }

    /// Countdown target for the next credit
    pub fn next_refill_at(&self) -> DateTime<Utc> {
        self.last_consume_at + self.refill_interval
    }

    /// Time until the next credit, clamped at zero
    pub fn next_refill_in(&self, now: DateTime<Utc>) -> Duration {
        (self.next_refill_at() - now).max(Duration::zero())
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    fn persist_remaining(&mut self) {
        let value = self.remaining.to_string();
        self.persist(REMAINING_KEY, &value);
    }

    fn persist_checkpoint(&mut self) {
        let value = self.last_consume_at.timestamp_millis().to_string();
        self.persist(LAST_CONSUME_KEY, &value);
    }

    // A failed write keeps the in-memory counters authoritative; the next
    // successful write catches the store up.
    fn persist(&mut self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            warn!(key = key, error = %e, "Failed to persist quota state");
        }
    }
}

fn read_i64(store: &dyn KeyValueStore, key: &str) -> Option<i64> {
    store.get(key).ok().flatten()?.parse().ok()
}
