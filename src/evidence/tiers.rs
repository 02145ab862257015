//! Evidence tier table

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};

/// Half-open bucket `[min, max)` of a measured quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceTier {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub points: u64,
}

impl EvidenceTier {
    pub fn contains(&self, quantity: f64) -> bool {
        quantity >= self.min && quantity < self.max
    }
}

/// Ordered, non-overlapping tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    tiers: Vec<EvidenceTier>,
}

impl TierTable {
    pub fn new(tiers: Vec<EvidenceTier>) -> EngineResult<Self> {
        if tiers.is_empty() {
            return Err(EngineError::InvalidConfig("evidence tier table is empty".to_string()));
        }
        let mut names = HashSet::new();
        for tier in &tiers {
            if !names.insert(tier.name.as_str()) {
                return Err(EngineError::InvalidConfig(format!("duplicate evidence tier {}", tier.name)));
            }
            if tier.name.is_empty() {
                return Err(EngineError::InvalidConfig("evidence tier with empty name".to_string()));
            }
            if !(tier.min.is_finite() && tier.max.is_finite() && tier.min < tier.max) {
                return Err(EngineError::InvalidConfig(format!(
                    "evidence tier {} has bad bounds [{}, {})",
                    tier.name, tier.min, tier.max
                )));
            }
        }
        for pair in tiers.windows(2) {
            if pair[1].min < pair[0].max {
                return Err(EngineError::InvalidConfig(format!(
                    "evidence tiers {} and {} overlap or are out of order",
                    pair[0].name, pair[1].name
                )));
            }
        }
        Ok(Self { tiers })
    }

    /// Parse `name:min:max:points,...`
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let bad = |entry: &str| EngineError::InvalidConfig(format!("malformed evidence tier entry '{}'", entry));

        let mut tiers = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [name, min, max, points] = parts.as_slice() else {
                return Err(bad(entry));
            };
            tiers.push(EvidenceTier {
                name: name.to_string(),
                min: min.parse().map_err(|_| bad(entry))?,
                max: max.parse().map_err(|_| bad(entry))?,
                points: points.parse().map_err(|_| bad(entry))?,
            });
        }
        Self::new(tiers)
    }

    /// The unique tier containing `estimate`. NaN, negative and out-of-range
    /// estimates match nothing.
    pub fn classify(&self, estimate: f64) -> Option<&EvidenceTier> {
        if !estimate.is_finite() {
            return None;
        }
        self.tiers.iter().find(|t| t.contains(estimate))
    }

    pub fn get(&self, name: &str) -> Option<&EvidenceTier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn tiers(&self) -> &[EvidenceTier] {
        &self.tiers
    }
}

impl Default for TierTable {
    fn default() -> Self {
        let tier = |name: &str, min: f64, max: f64, points| EvidenceTier {
            name: name.to_string(),
            min,
            max,
            points,
        };
        Self {
            tiers: vec![
                tier("1-10", 1.0, 11.0, 25),
                tier("11-50", 11.0, 51.0, 75),
                tier("51-100", 51.0, 101.0, 150),
                tier("101-500", 101.0, 501.0, 300),
                tier("500+", 501.0, 1_000_000.0, 600),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_buckets() {
        let table = TierTable::default();
        assert_eq!(table.classify(45.2).unwrap().name, "11-50");
        assert_eq!(table.classify(1.0).unwrap().name, "1-10");
        assert_eq!(table.classify(10.5).unwrap().name, "1-10");
        assert_eq!(table.classify(11.0).unwrap().name, "11-50");
        assert_eq!(table.classify(750.0).unwrap().name, "500+");
    }

    #[test]
    fn test_malformed_estimates_match_nothing() {
        let table = TierTable::default();
        assert!(table.classify(f64::NAN).is_none());
        assert!(table.classify(f64::INFINITY).is_none());
        assert!(table.classify(-3.0).is_none());
        assert!(table.classify(0.5).is_none());
        assert!(table.classify(2_000_000.0).is_none());
    }

    #[test]
    fn test_overlap_rejected() {
        assert!(TierTable::parse("a:0:10:5,b:5:20:10").is_err());
        assert!(TierTable::parse("a:0:10:5,b:10:20:10").is_ok());
        assert!(TierTable::parse("a:10:0:5").is_err());
        assert!(TierTable::parse("a:0:10").is_err());
        assert!(TierTable::parse("").is_err());
    }
}
