//! Credential Issuer
//!
//! Mints certificates on rank crossings and keeps one physical reward
//! registration per handle. Both mint paths are at-most-once: the store
//! reports an existing `(handle, rank)` certificate or an existing handle
//! registration, and the issuer returns that instead of minting again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::credentials::{
    Certificate, CertificateVerification, ClaimStatus, PhysicalReward, PhysicalRewardPolicy,
    PhysicalRewardVerification, RewardTier, SerialNamespace, SerialSource,
};
use crate::error::{EngineError, EngineResult};
use crate::identity::{Anonymizer, Handle};
use crate::store::{CertificateInsert, LedgerStore, RewardInsert};

/// Result of a mint request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    Issued(Certificate),
    /// This `(handle, rank)` transition was already certified
    AlreadyIssued(Certificate),
}

impl MintOutcome {
    pub fn certificate(&self) -> &Certificate {
        match self {
            MintOutcome::Issued(cert) | MintOutcome::AlreadyIssued(cert) => cert,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, MintOutcome::Issued(_))
    }
}

/// Result of a physical reward check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Points are below the first elevated threshold
    NotEligible,
    Registered(PhysicalReward),
    Upgraded { from: RewardTier, reward: PhysicalReward },
    /// Existing registration already at this tier or higher
    Unchanged(PhysicalReward),
}

impl RegistrationOutcome {
    pub fn reward(&self) -> Option<&PhysicalReward> {
        match self {
            RegistrationOutcome::NotEligible => None,
            RegistrationOutcome::Registered(r)
            | RegistrationOutcome::Upgraded { reward: r, .. }
            | RegistrationOutcome::Unchanged(r) => Some(r),
        }
    }
}

pub struct CredentialIssuer {
    store: Arc<dyn LedgerStore>,
    anonymizer: Arc<Anonymizer>,
    serials: Arc<dyn SerialSource>,
    physical: PhysicalRewardPolicy,
    max_attempts: u32,
}

impl CredentialIssuer {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        anonymizer: Arc<Anonymizer>,
        serials: Arc<dyn SerialSource>,
        physical: PhysicalRewardPolicy,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            anonymizer,
            serials,
            physical,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn physical_policy(&self) -> &PhysicalRewardPolicy {
        &self.physical
    }

    /// Whether moving from `before` to `after` points lands in another
    /// physical reward tier
    pub fn reward_tier_changes(&self, before: u64, after: u64) -> bool {
        self.physical.tier_for(before) != self.physical.tier_for(after)
    }

    /// Mint a certificate for `handle` reaching `rank` with `points`.
    ///
    /// Serial collisions are retried up to the configured bound; running out
    /// is an environment failure, not a user-facing error.
    pub async fn mint(
        &self,
        handle: &Handle,
        rank: &str,
        points: u64,
        now: DateTime<Utc>,
    ) -> EngineResult<MintOutcome> {
        for attempt in 1..=self.max_attempts {
            let serial = self.serials.next_serial(SerialNamespace::Certificate);
            let cert = Certificate::new(serial, handle.clone(), rank.to_string(), points, now);

            match self.store.insert_certificate(&cert).await? {
                CertificateInsert::Inserted => {
                    info!(
                        handle = %handle.short(),
                        rank = %rank,
                        points = points,
                        serial = %cert.serial,
                        "Certificate issued"
                    );
                    return Ok(MintOutcome::Issued(cert));
                }
                CertificateInsert::AlreadyIssued(existing) => {
                    debug!(
                        handle = %handle.short(),
                        rank = %rank,
                        serial = %existing.serial,
                        "Certificate already issued for transition, skipping"
                    );
                    return Ok(MintOutcome::AlreadyIssued(existing));
                }
                CertificateInsert::SerialTaken => {
                    warn!(attempt = attempt, "Certificate serial collision, regenerating");
                }
            }
        }

        error!(
            attempts = self.max_attempts,
            "Certificate serial space exhausted"
        );
        Err(EngineError::SerialSpaceExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Create the handle's physical reward registration, or raise its tier in
    /// place. Never mints a second serial for one handle.
    pub async fn register_or_upgrade(
        &self,
        handle: &Handle,
        points: u64,
        now: DateTime<Utc>,
    ) -> EngineResult<RegistrationOutcome> {
        let Some(tier) = self.physical.tier_for(points) else {
            return Ok(RegistrationOutcome::NotEligible);
        };

        if let Some(existing) = self.store.physical_reward_for(handle).await? {
            return self.upgrade(handle, existing, tier, now).await;
        }

        let anonymous_id = self.anonymizer.reward_alias(handle);
        for attempt in 1..=self.max_attempts {
            let serial = self.serials.next_serial(SerialNamespace::PhysicalReward);
            let reward = PhysicalReward::new(serial, handle.clone(), anonymous_id.clone(), tier, now);

            match self.store.insert_physical_reward(&reward).await? {
                RewardInsert::Inserted => {
                    info!(
                        handle = %handle.short(),
                        tier = %tier.as_str(),
                        serial = %reward.serial,
                        "Physical reward registered"
                    );
                    return Ok(RegistrationOutcome::Registered(reward));
                }
                // Lost a race with a concurrent registration for this handle
                RewardInsert::HandleTaken(existing) => {
                    return self.upgrade(handle, existing, tier, now).await;
                }
                RewardInsert::SerialTaken => {
                    warn!(attempt = attempt, "Physical reward serial collision, regenerating");
                }
            }
        }

        error!(
            attempts = self.max_attempts,
            "Physical reward serial space exhausted"
        );
        Err(EngineError::SerialSpaceExhausted {
            attempts: self.max_attempts,
        })
    }

    async fn upgrade(
        &self,
        handle: &Handle,
        existing: PhysicalReward,
        tier: RewardTier,
        now: DateTime<Utc>,
    ) -> EngineResult<RegistrationOutcome> {
        if tier <= existing.tier {
            return Ok(RegistrationOutcome::Unchanged(existing));
        }

        let from = existing.tier;
        let reward = self
            .store
            .raise_physical_tier(handle, tier, now)
            .await?
            .ok_or_else(|| EngineError::Store("physical reward vanished during upgrade".to_string()))?;

        info!(
            handle = %handle.short(),
            from = %from.as_str(),
            to = %reward.tier.as_str(),
            serial = %reward.serial,
            "Physical reward upgraded"
        );
        Ok(RegistrationOutcome::Upgraded { from, reward })
    }

    /// Public certificate check. Unknown or malformed serials and rows that
    /// cannot be decoded are `valid=false`.
    pub async fn verify_certificate(&self, serial: &str) -> EngineResult<CertificateVerification> {
        if !SerialNamespace::Certificate.matches(serial) {
            return Ok(CertificateVerification::invalid());
        }
        let verification = match readable(serial, self.store.find_certificate(serial).await)? {
            Some(cert) => CertificateVerification::of(&cert),
            None => CertificateVerification::invalid(),
        };
        debug!(serial = %serial, valid = verification.valid, "Certificate verified");
        Ok(verification)
    }

    /// Public physical reward check. Never exposes the handle.
    pub async fn verify_physical_reward(
        &self,
        serial: &str,
    ) -> EngineResult<PhysicalRewardVerification> {
        if !SerialNamespace::PhysicalReward.matches(serial) {
            return Ok(PhysicalRewardVerification::invalid());
        }
        let verification = match readable(serial, self.store.find_physical_reward(serial).await)? {
            Some(reward) => PhysicalRewardVerification::of(&reward),
            None => PhysicalRewardVerification::invalid(),
        };
        debug!(serial = %serial, valid = verification.valid, "Physical reward verified");
        Ok(verification)
    }

    /// Mark a registration as handed out and return its public view.
    /// Re-claiming is a no-op. Unknown serials and rows that fail the
    /// integrity check come back `valid=false` and are left untouched.
    pub async fn claim_physical_reward(
        &self,
        serial: &str,
    ) -> EngineResult<PhysicalRewardVerification> {
        if !SerialNamespace::PhysicalReward.matches(serial) {
            return Ok(PhysicalRewardVerification::invalid());
        }
        let Some(reward) = readable(serial, self.store.find_physical_reward(serial).await)? else {
            return Ok(PhysicalRewardVerification::invalid());
        };
        if !reward.is_intact() {
            warn!(serial = %serial, "Refusing to claim physical reward that fails integrity check");
            return Ok(PhysicalRewardVerification::invalid());
        }
        if reward.claim_status == ClaimStatus::Claimed {
            return Ok(PhysicalRewardVerification::of(&reward));
        }

        let claimed = self.store.mark_claimed(serial).await?;
        info!(serial = %serial, "Physical reward claimed");
        Ok(claimed
            .as_ref()
            .map(PhysicalRewardVerification::of)
            .unwrap_or_else(PhysicalRewardVerification::invalid))
    }

    pub async fn certificates_for(&self, handle: &Handle) -> EngineResult<Vec<Certificate>> {
        self.store.certificates_for(handle).await
    }

    pub async fn physical_reward_for(&self, handle: &Handle) -> EngineResult<Option<PhysicalReward>> {
        self.store.physical_reward_for(handle).await
    }
}

/// A stored credential that cannot be decoded reads as absent, so public
/// lookups answer `valid=false` instead of a retryable error.
fn readable<T>(serial: &str, found: EngineResult<Option<T>>) -> EngineResult<Option<T>> {
    match found {
        Err(EngineError::CorruptRecord(detail)) => {
            warn!(serial = %serial, detail = %detail, "Stored credential is corrupt, reporting invalid");
            Ok(None)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::OsSerialSource;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    /// Replays a fixed list of serials, then repeats the last one
    struct ScriptedSerials(Mutex<Vec<String>>);

    impl SerialSource for ScriptedSerials {
        fn next_serial(&self, _namespace: SerialNamespace) -> String {
            let mut serials = self.0.lock().unwrap();
            if serials.len() > 1 {
                serials.remove(0)
            } else {
                serials[0].clone()
            }
        }
    }

    fn anonymizer() -> Arc<Anonymizer> {
        Arc::new(Anonymizer::new(b"pepper-pepper-pepper", b"salt-salt-salt-salt").unwrap())
    }

    fn issuer(store: Arc<MemoryStore>, serials: Arc<dyn SerialSource>) -> CredentialIssuer {
        CredentialIssuer::new(store, anonymizer(), serials, PhysicalRewardPolicy::default(), 5)
    }

    #[tokio::test]
    async fn test_mint_then_verify() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store, Arc::new(OsSerialSource));
        let handle = anonymizer().anonymize("42".to_string());

        let outcome = issuer.mint(&handle, "Captain", 380, Utc::now()).await.unwrap();
        assert!(outcome.is_new());

        let verification = issuer.verify_certificate(&outcome.certificate().serial).await.unwrap();
        assert!(verification.valid);
        assert_eq!(verification.rank.as_deref(), Some("Captain"));
        assert_eq!(verification.points, Some(380));
    }

    #[tokio::test]
    async fn test_redelivered_mint_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone(), Arc::new(OsSerialSource));
        let handle = anonymizer().anonymize("42".to_string());

        let first = issuer.mint(&handle, "Captain", 380, Utc::now()).await.unwrap();
        let second = issuer.mint(&handle, "Captain", 380, Utc::now()).await.unwrap();
        assert!(!second.is_new());
        assert_eq!(first.certificate().serial, second.certificate().serial);
        assert_eq!(issuer.certificates_for(&handle).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_serial_collision_retried_then_exhausted() {
        let taken = "CERT-000000000000000000000000".to_string();
        let fresh = "CERT-111111111111111111111111".to_string();
        let store = Arc::new(MemoryStore::new());
        let a = anonymizer();

        let issuer_a = issuer(store.clone(), Arc::new(ScriptedSerials(Mutex::new(vec![taken.clone()]))));
        issuer_a.mint(&a.anonymize("1".to_string()), "Captain", 370, Utc::now()).await.unwrap();

        // One collision, then a fresh serial
        let issuer_b = issuer(
            store.clone(),
            Arc::new(ScriptedSerials(Mutex::new(vec![taken.clone(), fresh.clone()]))),
        );
        let outcome = issuer_b.mint(&a.anonymize("2".to_string()), "Captain", 370, Utc::now()).await.unwrap();
        assert_eq!(outcome.certificate().serial, fresh);

        // Only collisions
        let issuer_c = issuer(store, Arc::new(ScriptedSerials(Mutex::new(vec![taken]))));
        let err = issuer_c.mint(&a.anonymize("3".to_string()), "Captain", 370, Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::SerialSpaceExhausted { attempts: 5 }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn test_physical_upgrade_in_place() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store.clone(), Arc::new(OsSerialSource));
        let handle = anonymizer().anonymize("7".to_string());

        assert_eq!(
            issuer.register_or_upgrade(&handle, 3999, Utc::now()).await.unwrap(),
            RegistrationOutcome::NotEligible
        );

        let RegistrationOutcome::Registered(first) =
            issuer.register_or_upgrade(&handle, 4100, Utc::now()).await.unwrap()
        else {
            panic!("expected registration");
        };
        assert_eq!(first.tier, RewardTier::Bronze);

        let RegistrationOutcome::Upgraded { from, reward } =
            issuer.register_or_upgrade(&handle, 10_500, Utc::now()).await.unwrap()
        else {
            panic!("expected upgrade");
        };
        assert_eq!(from, RewardTier::Bronze);
        assert_eq!(reward.tier, RewardTier::Gold);
        assert_eq!(reward.serial, first.serial);
        assert_eq!(reward.hologram_code, first.hologram_code);
        assert_eq!(reward.anonymous_id, first.anonymous_id);
        assert_eq!(store.physical_reward_count().await, 1);

        let verification = issuer.verify_physical_reward(&reward.serial).await.unwrap();
        assert!(verification.valid);
        assert_eq!(verification.tier, Some(RewardTier::Gold));
    }

    #[tokio::test]
    async fn test_claim_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store, Arc::new(OsSerialSource));
        let handle = anonymizer().anonymize("8".to_string());
        let outcome = issuer.register_or_upgrade(&handle, 6600, Utc::now()).await.unwrap();
        let serial = outcome.reward().unwrap().serial.clone();

        let claimed = issuer.claim_physical_reward(&serial).await.unwrap();
        assert!(claimed.valid);
        assert_eq!(claimed.claim_status, Some(ClaimStatus::Claimed));
        let again = issuer.claim_physical_reward(&serial).await.unwrap();
        assert_eq!(again.claim_status, Some(ClaimStatus::Claimed));

        assert!(!issuer.claim_physical_reward("SN-nope").await.unwrap().valid);
    }

    #[test]
    fn test_corrupt_rows_read_as_absent() {
        let corrupt: EngineResult<Option<u8>> = Err(EngineError::CorruptRecord("tier".to_string()));
        assert_eq!(readable("SN-x", corrupt).unwrap(), None);

        let down: EngineResult<Option<u8>> = Err(EngineError::Store("down".to_string()));
        assert!(readable("SN-x", down).unwrap_err().is_retryable());
    }

    #[test]
    fn test_reward_tier_changes() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store, Arc::new(OsSerialSource));
        assert!(!issuer.reward_tier_changes(100, 3999));
        assert!(issuer.reward_tier_changes(3999, 4000));
        assert!(!issuer.reward_tier_changes(4000, 6499));
        assert!(issuer.reward_tier_changes(6499, 12_000));
    }

    #[tokio::test]
    async fn test_verify_unknown_serial_is_invalid() {
        let store = Arc::new(MemoryStore::new());
        let issuer = issuer(store, Arc::new(OsSerialSource));
        assert!(!issuer.verify_certificate("CERT-000000000000000000000000").await.unwrap().valid);
        assert!(!issuer.verify_certificate("garbage").await.unwrap().valid);
        assert!(!issuer.verify_physical_reward("").await.unwrap().valid);
    }
}
