//! Physical reward registrations
//!
//! One registration per handle. Crossing a higher elevated threshold raises
//! the tier in place; serial, hologram and anonymous id never change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::credentials::certificate::{canonical_digest, storage_precision};
use crate::error::{EngineError, EngineResult};
use crate::identity::Handle;

const HOLOGRAM_DOMAIN: &[u8] = b"honor-ledger/hologram/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardTier {
    Bronze,
    Silver,
    Gold,
}

impl RewardTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardTier::Bronze => "bronze",
            RewardTier::Silver => "silver",
            RewardTier::Gold => "gold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bronze" => Some(RewardTier::Bronze),
            "silver" => Some(RewardTier::Silver),
            "gold" => Some(RewardTier::Gold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Eligible,
    Claimed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Eligible => "eligible",
            ClaimStatus::Claimed => "claimed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "eligible" => Some(ClaimStatus::Eligible),
            "claimed" => Some(ClaimStatus::Claimed),
            _ => None,
        }
    }
}

/// The three elevated point thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalRewardPolicy {
    pub bronze_points: u64,
    pub silver_points: u64,
    pub gold_points: u64,
}

impl PhysicalRewardPolicy {
    pub fn new(bronze_points: u64, silver_points: u64, gold_points: u64) -> EngineResult<Self> {
        if !(bronze_points < silver_points && silver_points < gold_points) {
            return Err(EngineError::InvalidConfig(format!(
                "physical reward thresholds must be strictly ascending ({}, {}, {})",
                bronze_points, silver_points, gold_points
            )));
        }
        Ok(Self {
            bronze_points,
            silver_points,
            gold_points,
        })
    }

    /// Highest tier whose threshold `points` has reached
    pub fn tier_for(&self, points: u64) -> Option<RewardTier> {
        if points >= self.gold_points {
            Some(RewardTier::Gold)
        } else if points >= self.silver_points {
            Some(RewardTier::Silver)
        } else if points >= self.bronze_points {
            Some(RewardTier::Bronze)
        } else {
            None
        }
    }
}

impl Default for PhysicalRewardPolicy {
    fn default() -> Self {
        Self {
            bronze_points: 4000,
            silver_points: 6500,
            gold_points: 10000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalReward {
    pub serial: String,
    pub handle: Handle,
    pub anonymous_id: String,
    /// Tier at registration; the hologram is bound to it
    pub initial_tier: RewardTier,
    /// Current tier, only ever raised
    pub tier: RewardTier,
    pub hologram_code: String,
    pub issued_at: DateTime<Utc>,
    pub upgraded_at: Option<DateTime<Utc>>,
    pub claim_status: ClaimStatus,
}

impl PhysicalReward {
    pub fn new(
        serial: String,
        handle: Handle,
        anonymous_id: String,
        tier: RewardTier,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let issued_at = storage_precision(issued_at);
        let hologram_code = Self::compute_hologram(&serial, tier, issued_at);
        Self {
            serial,
            handle,
            anonymous_id,
            initial_tier: tier,
            tier,
            hologram_code,
            issued_at,
            upgraded_at: None,
            claim_status: ClaimStatus::Eligible,
        }
    }

    /// `HOLO-` + first 16 hex chars of the digest over `{serial, tier, issued_at}`
    pub fn compute_hologram(serial: &str, tier: RewardTier, issued_at: DateTime<Utc>) -> String {
        let digest = canonical_digest(
            HOLOGRAM_DOMAIN,
            &[
                serial.as_bytes(),
                tier.as_str().as_bytes(),
                &issued_at.timestamp_micros().to_be_bytes(),
            ],
        );
        format!("HOLO-{}", digest[..16].to_uppercase())
    }

    pub fn is_intact(&self) -> bool {
        let expected = Self::compute_hologram(&self.serial, self.initial_tier, self.issued_at);
        bool::from(expected.as_bytes().ct_eq(self.hologram_code.as_bytes()))
            && self.tier >= self.initial_tier
    }
}

/// Public verification answer. Carries the anonymous id, never the handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhysicalRewardVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<RewardTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hologram_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_status: Option<ClaimStatus>,
}

impl PhysicalRewardVerification {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            tier: None,
            issued_at: None,
            hologram_code: None,
            anonymous_id: None,
            claim_status: None,
        }
    }

    pub fn of(reward: &PhysicalReward) -> Self {
        if !reward.is_intact() {
            return Self::invalid();
        }
        Self {
            valid: true,
            tier: Some(reward.tier),
            issued_at: Some(reward.issued_at),
            hologram_code: Some(reward.hologram_code.clone()),
            anonymous_id: Some(reward.anonymous_id.clone()),
            claim_status: Some(reward.claim_status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Anonymizer;

    fn reward(tier: RewardTier) -> PhysicalReward {
        let anonymizer = Anonymizer::new(b"pepper-pepper-pepper", b"salt-salt-salt-salt").unwrap();
        let handle = anonymizer.anonymize("11".to_string());
        let alias = anonymizer.reward_alias(&handle);
        PhysicalReward::new("SN-00112233445566778899AABB".to_string(), handle, alias, tier, Utc::now())
    }

    #[test]
    fn test_policy_tiers() {
        let policy = PhysicalRewardPolicy::default();
        assert_eq!(policy.tier_for(3999), None);
        assert_eq!(policy.tier_for(4000), Some(RewardTier::Bronze));
        assert_eq!(policy.tier_for(6500), Some(RewardTier::Silver));
        assert_eq!(policy.tier_for(12000), Some(RewardTier::Gold));
        assert!(PhysicalRewardPolicy::new(10, 10, 20).is_err());
    }

    #[test]
    fn test_upgrade_keeps_hologram_valid() {
        let mut r = reward(RewardTier::Bronze);
        let hologram = r.hologram_code.clone();
        r.tier = RewardTier::Gold;
        assert!(r.is_intact());
        assert_eq!(r.hologram_code, hologram);
    }

    #[test]
    fn test_tampering_detected() {
        let mut r = reward(RewardTier::Silver);
        r.tier = RewardTier::Bronze;
        assert!(!r.is_intact());

        let mut r = reward(RewardTier::Silver);
        r.serial = "SN-FFFFFFFFFFFFFFFFFFFFFFFF".to_string();
        assert!(!PhysicalRewardVerification::of(&r).valid);
    }

    #[test]
    fn test_verification_has_no_handle() {
        let r = reward(RewardTier::Gold);
        let json = serde_json::to_string(&PhysicalRewardVerification::of(&r)).unwrap();
        assert!(!json.contains(r.handle.as_str()));
        assert!(json.contains(&r.anonymous_id));
    }
}
