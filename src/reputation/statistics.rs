//! Aggregate counters
//!
//! Totals across all handles. Nothing here is keyed by handle, so the
//! statistics view can be served to anyone holding an ingest key.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total_members: u64,
    pub total_actions: u64,
    pub total_points: u64,
    pub actions_by_category: BTreeMap<String, u64>,
    /// Resolved evidence submissions per tier label
    pub evidence_by_tier: BTreeMap<String, u64>,
    /// Sum of resolved evidence quantities
    pub evidence_quantity: f64,
}

/// What one committed delta adds to the counters
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsDelta {
    pub new_member: bool,
    pub category: String,
    /// Points gained, bonuses included
    pub points: u64,
    pub evidence_tier: Option<String>,
    pub evidence_quantity: Option<f64>,
}

impl Statistics {
    pub fn apply(&mut self, delta: &StatisticsDelta) {
        if delta.new_member {
            self.total_members += 1;
        }
        self.total_actions += 1;
        self.total_points = self.total_points.saturating_add(delta.points);
        *self
            .actions_by_category
            .entry(delta.category.clone())
            .or_default() += 1;
        if let Some(tier) = &delta.evidence_tier {
            *self.evidence_by_tier.entry(tier.clone()).or_default() += 1;
        }
        if let Some(q) = delta.evidence_quantity.filter(|q| q.is_finite() && *q > 0.0) {
            self.evidence_quantity += q;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_counts() {
        let mut stats = Statistics::default();
        stats.apply(&StatisticsDelta {
            new_member: true,
            category: "email_sent".to_string(),
            points: 25,
            evidence_tier: None,
            evidence_quantity: None,
        });
        stats.apply(&StatisticsDelta {
            new_member: false,
            category: "data_shared".to_string(),
            points: 80,
            evidence_tier: Some("10-100".to_string()),
            evidence_quantity: Some(42.5),
        });
        stats.apply(&StatisticsDelta {
            new_member: false,
            category: "data_shared".to_string(),
            points: 0,
            evidence_tier: Some("10-100".to_string()),
            evidence_quantity: Some(f64::NAN),
        });

        assert_eq!(stats.total_members, 1);
        assert_eq!(stats.total_actions, 3);
        assert_eq!(stats.total_points, 105);
        assert_eq!(stats.actions_by_category["data_shared"], 2);
        assert_eq!(stats.evidence_by_tier["10-100"], 2);
        assert_eq!(stats.evidence_quantity, 42.5);
    }
}
