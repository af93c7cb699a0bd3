//! Billing data types

use serde::{Deserialize, Serialize};

/// Subscription tier, ordered by privilege
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Standard,
    Extended,
    Unlimited,
}

impl Tier {
    /// All tiers in ascending rank order
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Standard, Tier::Extended, Tier::Unlimited];

    /// Numeric rank; distinct and monotonically increasing in privilege
    pub fn rank(self) -> u8 {
        match self {
            Self::Free => 0,
            Self::Standard => 1,
            Self::Extended => 2,
            Self::Unlimited => 3,
        }
    }

    /// Store product identifier for paid tiers; free has no product
    pub fn product_id(self) -> Option<&'static str> {
        match self {
            Self::Free => None,
            Self::Standard => Some("borealis.standard.monthly"),
            Self::Extended => Some("borealis.extended.monthly"),
            Self::Unlimited => Some("borealis.unlimited.monthly"),
        }
    }

    /// Map a store product identifier back to a tier.
    /// Unknown identifiers return None so new products roll out safely.
    pub fn from_product_id(product_id: &str) -> Option<Self> {
        match product_id {
            "borealis.standard.monthly" => Some(Self::Standard),
            "borealis.extended.monthly" => Some(Self::Extended),
            "borealis.unlimited.monthly" => Some(Self::Unlimited),
            _ => None,
        }
    }

    /// Whether this tier is gated by the daily message quota
    pub fn is_free(self) -> bool {
        self == Self::Free
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Standard => write!(f, "standard"),
            Self::Extended => write!(f, "extended"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

/// Verification outcome attached to a purchase record by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    Verified,
    Unverified,
}

/// One purchase/transaction record reported by the external store.
///
/// Ephemeral: supplied per query, never owned or persisted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementRecord {
    pub product_id: String,
    pub verification: Verification,
}

impl EntitlementRecord {
    pub fn verified(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            verification: Verification::Verified,
        }
    }

    pub fn unverified(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            verification: Verification::Unverified,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verification == Verification::Verified
    }
}

/// Store catalog entry for a purchasable product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub display_name: String,
    /// Localized price string as rendered by the store ("4,99 €")
    pub display_price: String,
}

/// Outcome of a purchase call against the external store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResult {
    /// Purchase went through; the record carries its verification state
    Purchased(EntitlementRecord),
    /// User backed out of the payment sheet
    UserCancelled,
    /// Deferred (e.g. pending family approval); no entitlement yet
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ranks_are_strictly_increasing() {
        let ranks: Vec<u8> = Tier::ALL.iter().map(|t| t.rank()).collect();
        for pair in ranks.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn tier_ordering_follows_rank() {
        assert!(Tier::Free < Tier::Standard);
        assert!(Tier::Standard < Tier::Extended);
        assert!(Tier::Extended < Tier::Unlimited);
    }

    #[test]
    fn product_id_round_trip() {
        for tier in [Tier::Standard, Tier::Extended, Tier::Unlimited] {
            let id = tier.product_id().unwrap();
            assert_eq!(Tier::from_product_id(id), Some(tier));
        }
        assert_eq!(Tier::Free.product_id(), None);
        assert_eq!(Tier::from_product_id("borealis.lifetime"), None);
    }

    #[test]
    fn tier_serde_uses_lowercase() {
        let json = serde_json::to_string(&Tier::Extended).unwrap();
        assert_eq!(json, "\"extended\"");
        let back: Tier = serde_json::from_str("\"unlimited\"").unwrap();
        assert_eq!(back, Tier::Unlimited);
    }
}
