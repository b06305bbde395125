//! Category → risk tier policy.

#![allow(missing_docs)]

use crate::core::config::{RiskConfig, default_tier};
use crate::core::errors::Result;
use crate::core::model::{Category, RiskTier};

/// Named, deterministic mapping from artifact category to risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskPolicy {
    tiers: [RiskTier; 6],
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            tiers: Category::ALL.map(default_tier),
        }
    }
}

impl RiskPolicy {
    /// Built-in defaults with `[risk.policy]` overrides applied.
    pub fn from_config(config: &RiskConfig) -> Result<Self> {
        let mut policy = Self::default();
        for (key, tier) in &config.policy {
            let category = key.parse::<Category>()?;
            policy = policy.with_tier(category, *tier);
        }
        Ok(policy)
    }

    #[must_use]
    pub fn with_tier(mut self, category: Category, tier: RiskTier) -> Self {
        self.tiers[category.precedence()] = tier;
        self
    }

    #[must_use]
    pub fn classify(&self, category: Category) -> RiskTier {
        self.tiers[category.precedence()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_table() {
        let policy = RiskPolicy::default();
        assert_eq!(policy.classify(Category::Browser), RiskTier::High);
        assert_eq!(policy.classify(Category::Recent), RiskTier::High);
        assert_eq!(policy.classify(Category::ImageMetadata), RiskTier::Medium);
        assert_eq!(policy.classify(Category::AppCache), RiskTier::Medium);
        assert_eq!(policy.classify(Category::Thumbnails), RiskTier::Low);
        assert_eq!(policy.classify(Category::Temp), RiskTier::Low);
    }

    #[test]
    fn config_overrides_single_category() {
        let mut config = RiskConfig::default();
        config.policy.insert("temp".to_string(), RiskTier::High);
        let policy = RiskPolicy::from_config(&config).unwrap();
        assert_eq!(policy.classify(Category::Temp), RiskTier::High);
        assert_eq!(policy.classify(Category::Thumbnails), RiskTier::Low);
    }

    #[test]
    fn unknown_category_in_config_fails() {
        let mut config = RiskConfig::default();
        config.policy.insert("pagefile".to_string(), RiskTier::High);
        assert!(RiskPolicy::from_config(&config).is_err());
    }
}
