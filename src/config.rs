//! Configuration for the matching engine and the cascade.
//!
//! All score thresholds were tuned by hand on real receipts and are kept
//! configurable. Both types deserialize from JSON with every field optional:
//!
//! ```json
//! {
//!   "max_confirmation_candidates": 5,
//!   "matcher": {
//!     "min_match_score": 0.6,
//!     "candidate_cutoff": 0.5,
//!     "brand_cutoff": 0.7,
//!     "fuzzy_cutoff": 0.6,
//!     "keyword_fallback_below": 0.6,
//!     "cache_ttl_secs": null,
//!     "cache_capacity": 1024
//!   }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Thresholds and cache policy for [`crate::MatchingEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// `best_match` only returns a candidate scoring at least this much.
    pub min_match_score: f64,
    /// `find_candidates` drops candidates scoring at or below this.
    pub candidate_cutoff: f64,
    /// A brand score must exceed this to count as a brand match.
    pub brand_cutoff: f64,
    /// Text similarity must exceed this to count as a fuzzy match.
    pub fuzzy_cutoff: f64,
    /// Keyword scoring only runs while the best score is below this.
    pub keyword_fallback_below: f64,
    /// Cached results older than this are dropped by `sweep_expired`.
    /// `None` keeps them until `clear`.
    pub cache_ttl_secs: Option<u64>,
    pub cache_capacity: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_match_score: 0.6,
            candidate_cutoff: 0.5,
            brand_cutoff: 0.7,
            fuzzy_cutoff: 0.6,
            keyword_fallback_below: 0.6,
            cache_ttl_secs: None,
            cache_capacity: 1024,
        }
    }
}

impl MatcherConfig {
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = [
            ("min_match_score", self.min_match_score),
            ("candidate_cutoff", self.candidate_cutoff),
            ("brand_cutoff", self.brand_cutoff),
            ("fuzzy_cutoff", self.fuzzy_cutoff),
            ("keyword_fallback_below", self.keyword_fallback_below),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }

        if self.candidate_cutoff > self.min_match_score {
            return Err(ConfigError::CutoffAboveMinScore {
                cutoff: self.candidate_cutoff,
                min_score: self.min_match_score,
            });
        }

        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroLimit("cache_capacity"));
        }

        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings for [`crate::CascadeOrchestrator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// How many ranked candidates a confirmation request carries.
    pub max_confirmation_candidates: usize,
    pub matcher: MatcherConfig,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_confirmation_candidates: 5,
            matcher: MatcherConfig::default(),
        }
    }
}

impl CascadeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_confirmation_candidates == 0 {
            return Err(ConfigError::ZeroLimit("max_confirmation_candidates"));
        }
        self.matcher.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(MatcherConfig::default().validate().is_ok());
        assert!(CascadeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = CascadeConfig::from_json_str(r#"{"matcher":{"min_match_score":0.7}}"#).unwrap();
        assert_eq!(config.matcher.min_match_score, 0.7);
        assert_eq!(config.matcher.candidate_cutoff, 0.5);
        assert_eq!(config.max_confirmation_candidates, 5);
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let err = MatcherConfig::from_json_str(r#"{"brand_cutoff":1.2}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ThresholdOutOfRange { name: "brand_cutoff", .. }
        ));
    }

    #[test]
    fn test_cutoff_above_min_score_rejected() {
        let config = MatcherConfig {
            candidate_cutoff: 0.8,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CutoffAboveMinScore { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            MatcherConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_cache_ttl() {
        let config = MatcherConfig {
            cache_ttl_secs: Some(30),
            ..Default::default()
        };
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(30)));
    }
}
