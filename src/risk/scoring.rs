//! Exposure score: a 0–100 reduction of an inventory's risk tiers.
//!
//! `score = clamp(round(100 - Σ weight(tier) / divisor), 0, 100)`, rounding
//! half away from zero. An empty inventory scores 100.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::config::RiskConfig;
use crate::core::model::{PrivacyItem, RiskTier, TierCounts};

/// Tier weights and divisor. Weights are non-negative so adding items never
/// raises the score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreModel {
    high: f64,
    medium: f64,
    low: f64,
    divisor: f64,
}

impl Default for ScoreModel {
    fn default() -> Self {
        Self {
            high: 10.0,
            medium: 5.0,
            low: 1.0,
            divisor: 5.0,
        }
    }
}

impl ScoreModel {
    /// Build from an already validated `[risk]` section.
    #[must_use]
    pub const fn from_config(config: &RiskConfig) -> Self {
        Self {
            high: config.high_weight,
            medium: config.medium_weight,
            low: config.low_weight,
            divisor: config.divisor,
        }
    }

    #[must_use]
    pub const fn weight(&self, tier: RiskTier) -> f64 {
        match tier {
            RiskTier::High => self.high,
            RiskTier::Medium => self.medium,
            RiskTier::Low => self.low,
        }
    }

    /// Score an inventory. Order-invariant.
    #[must_use]
    pub fn score(&self, items: &[PrivacyItem]) -> u8 {
        self.score_counts(&TierCounts::from_items(items))
    }

    #[must_use]
    pub fn score_tiers<I: IntoIterator<Item = RiskTier>>(&self, tiers: I) -> u8 {
        self.score_counts(&TierCounts::from_tiers(tiers))
    }

    /// Score from tier counts alone (how persisted reports are re-scored).
    #[must_use]
    pub fn score_counts(&self, counts: &TierCounts) -> u8 {
        let sum = counts.high as f64 * self.high
            + counts.medium as f64 * self.medium
            + counts.low as f64 * self.low;
        let raw = (100.0 - sum / self.divisor).round();
        if raw.is_nan() {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let clamped = raw.clamp(0.0, 100.0) as u8;
        clamped
    }
}

/// Qualitative label shown next to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureRating {
    Excellent,
    Compromised,
    CriticalRisk,
}

impl ExposureRating {
    #[must_use]
    pub const fn from_score(score: u8) -> Self {
        if score >= 80 {
            Self::Excellent
        } else if score >= 50 {
            Self::Compromised
        } else {
            Self::CriticalRisk
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Compromised => "Compromised",
            Self::CriticalRisk => "Critical Risk",
        }
    }
}

impl fmt::Display for ExposureRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Category;
    use crate::core::model::fixtures::item;

    #[test]
    fn empty_inventory_scores_100() {
        assert_eq!(ScoreModel::default().score(&[]), 100);
    }

    #[test]
    fn mixed_tiers_score_97() {
        let items = vec![
            item("/a", Category::Browser, 1000, RiskTier::High),
            item("/b", Category::AppCache, 2000, RiskTier::Medium),
            item("/c", Category::Temp, 3000, RiskTier::Low),
        ];
        // 100 - 16/5 = 96.8 → 97
        assert_eq!(ScoreModel::default().score(&items), 97);
    }

    #[test]
    fn half_rounds_away_from_zero() {
        // 100 - 1/2 = 99.5 → 100; 100 - 3/2 = 98.5 → 99
        let model = ScoreModel::from_config(&RiskConfig {
            divisor: 2.0,
            ..RiskConfig::default()
        });
        assert_eq!(model.score_tiers([RiskTier::Low]), 100);
        assert_eq!(model.score_tiers([RiskTier::Low; 3]), 99);
    }

    #[test]
    fn score_clamps_at_zero() {
        let counts = TierCounts {
            high: 1000,
            medium: 0,
            low: 0,
        };
        assert_eq!(ScoreModel::default().score_counts(&counts), 0);
    }

    #[test]
    fn custom_weights_from_config() {
        let config = RiskConfig {
            high_weight: 50.0,
            divisor: 1.0,
            ..RiskConfig::default()
        };
        let model = ScoreModel::from_config(&config);
        assert_eq!(model.score_tiers([RiskTier::High]), 50);
    }

    #[test]
    fn rating_bands() {
        assert_eq!(ExposureRating::from_score(100), ExposureRating::Excellent);
        assert_eq!(ExposureRating::from_score(80), ExposureRating::Excellent);
        assert_eq!(ExposureRating::from_score(79), ExposureRating::Compromised);
        assert_eq!(ExposureRating::from_score(50), ExposureRating::Compromised);
        assert_eq!(ExposureRating::from_score(49), ExposureRating::CriticalRisk);
        assert_eq!(ExposureRating::CriticalRisk.to_string(), "Critical Risk");
    }
}
