//! Plan and chat-mode configuration
//!
//! Plans are loaded from locale-specific JSON resources (`plans_en.json`,
//! `plans_de.json`, ...) and cached as one canonical tier-to-plan table.
//! All limit and feature lookups go through that table; nothing else in
//! the crate matches plan identifiers by string.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use super::error::BillingError;
use super::types::Tier;

/// Modes a plan grants access to: everything, or an explicit list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedModes {
    All,
    List(Vec<String>),
}

impl Serialize for AllowedModes {
    // Mirror of the deserializer: "all" or an array of mode ids
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::List(ids) => ids.serialize(serializer),
        }
    }
}

impl AllowedModes {
    pub fn permits(&self, mode_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::List(ids) => ids.iter().any(|id| id == mode_id),
        }
    }
}

impl<'de> Deserialize<'de> for AllowedModes {
    // Accepts the JSON string "all" or an array of mode ids
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::One(s) if s.eq_ignore_ascii_case("all") => Ok(Self::All),
            Raw::One(other) => Err(serde::de::Error::custom(format!(
                "allowedModes must be \"all\" or an array, got \"{}\"",
                other
            ))),
            Raw::Many(list) => Ok(Self::List(list)),
        }
    }
}

/// Per-tier configuration: display name, message limit, feature access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Tier,
    pub name: String,
    /// Daily free-message allowance; 0 on a paid tier means unlimited
    pub daily_message_limit: u32,
    pub allowed_modes: AllowedModes,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A chat mode the UI can select (prompt preset)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMode {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub system_prompt: String,
}

impl ChatMode {
    /// Minimal mode set used when the modes resource is missing or corrupt
    pub fn fallback_modes() -> Vec<ChatMode> {
        vec![ChatMode {
            id: "chat".to_string(),
            name: "Chat".to_string(),
            icon: "bubble".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
        }]
    }
}

/// Canonical tier-to-plan table, replaced wholesale on locale change
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: HashMap<Tier, Plan>,
    /// Fail-safe plan for tiers with no configuration: denies quota
    fallback: Plan,
}

impl PlanCatalog {
    /// Load `plans_{locale}.json` from the resource directory.
    ///
    /// A missing or malformed file is surfaced to the caller; startup code
    /// decides whether that is fatal or falls back to `builtin()`.
    pub fn load(dir: &Path, locale: &str) -> Result<Self, BillingError> {
        let path = dir.join(format!("plans_{}.json", locale));
        let data = std::fs::read_to_string(&path).map_err(|e| BillingError::Resource {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let plans: Vec<Plan> =
            serde_json::from_str(&data).map_err(|e| BillingError::Resource {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self::from_plans(plans))
    }

    /// Built-in English catalog, also the fallback when resources are absent
    pub fn builtin() -> Self {
        Self::from_plans(vec![
            Plan {
                id: Tier::Free,
                name: "Free".to_string(),
                daily_message_limit: 10,
                allowed_modes: AllowedModes::List(vec!["chat".to_string()]),
                features: vec!["basic_chat".to_string()],
            },
            Plan {
                id: Tier::Standard,
                name: "Standard".to_string(),
                daily_message_limit: 0,
                allowed_modes: AllowedModes::List(vec![
                    "chat".to_string(),
                    "programming".to_string(),
                ]),
                features: vec!["unlimited_chat".to_string(), "programming_mode".to_string()],
            },
            Plan {
                id: Tier::Extended,
                name: "Extended".to_string(),
                daily_message_limit: 0,
                allowed_modes: AllowedModes::All,
                features: vec![
                    "unlimited_chat".to_string(),
                    "programming_mode".to_string(),
                    "vision".to_string(),
                ],
            },
            Plan {
                id: Tier::Unlimited,
                name: "Unlimited".to_string(),
                daily_message_limit: 0,
                allowed_modes: AllowedModes::All,
                features: vec![
                    "unlimited_chat".to_string(),
                    "programming_mode".to_string(),
                    "vision".to_string(),
                    "image_generation".to_string(),
                ],
            },
        ])
    }

    fn from_plans(plans: Vec<Plan>) -> Self {
        let plans: HashMap<Tier, Plan> = plans.into_iter().map(|p| (p.id, p)).collect();
        Self {
            plans,
            fallback: Plan {
                id: Tier::Free,
                name: "Free".to_string(),
                daily_message_limit: 0,
                allowed_modes: AllowedModes::List(Vec::new()),
                features: Vec::new(),
            },
        }
    }

    /// Plan for a tier. Unconfigured tiers get the zero-limit fallback so a
    /// bad resource file denies access rather than granting it.
    pub fn plan(&self, tier: Tier) -> &Plan {
        self.plans.get(&tier).unwrap_or(&self.fallback)
    }

    pub fn daily_message_limit(&self, tier: Tier) -> u32 {
        self.plan(tier).daily_message_limit
    }

    pub fn plans(&self) -> impl Iterator<Item = &Plan> {
        Tier::ALL.iter().filter_map(|t| self.plans.get(t))
    }
}

/// Load the chat-mode registry from `modes.json`.
///
/// Never fatal: a missing, empty, or corrupt file logs a warning and
/// returns the fallback modes.
pub fn load_modes(dir: &Path) -> Vec<ChatMode> {
    let path = dir.join("modes.json");
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Modes resource missing, using fallback");
            return ChatMode::fallback_modes();
        }
    };

    match serde_json::from_str::<Vec<ChatMode>>(&data) {
        Ok(modes) if !modes.is_empty() => modes,
        Ok(_) => {
            warn!(path = %path.display(), "Modes resource empty, using fallback");
            ChatMode::fallback_modes()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to decode modes, using fallback");
            ChatMode::fallback_modes()
        }
    }
}
