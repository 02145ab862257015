//! Engine - orchestrates one action end to end
//!
//! external action -> anonymize -> ledger delta (+ achievements) -> on a rank
//! crossing, a certificate -> on a rank crossing or a physical tier change,
//! the physical reward registration. Returned events only carry handles and
//! public credential fields; the raw external id is dropped inside
//! [`Engine::handle_for`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::achievements::AchievementCatalog;
use crate::config::HonorConfig;
use crate::credentials::{
    Certificate, CertificateVerification, CredentialIssuer, MintOutcome, OsSerialSource,
    PhysicalReward, PhysicalRewardVerification, RegistrationOutcome, RewardTier, SerialSource,
};
use crate::error::{EngineError, EngineResult};
use crate::evidence::{EvidenceClassifier, EvidenceSubmission, ExtractionResult, Resolution};
use crate::identity::{Anonymizer, Handle};
use crate::reputation::{
    DeltaOutcome, DeltaReason, GrantOutcome, LeaderboardEntry, Profile, RankCrossed,
    ReputationLedger, Statistics, MAX_CATEGORY_LEN,
};
use crate::store::LedgerStore;

/// Inbound action from the messaging layer
#[derive(Debug, Clone, Deserialize)]
pub struct ActionCompleted {
    pub external_id: String,
    pub category: String,
    #[serde(default)]
    pub raw_amount: Option<u64>,
}

/// Outbound notification payloads
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    RankCrossed {
        handle: Handle,
        rank_before: String,
        rank_after: String,
        points: u64,
    },
    AchievementUnlocked {
        handle: Handle,
        achievement_id: String,
        category: String,
        bonus_points: u64,
    },
    CertificateIssued {
        handle: Handle,
        serial: String,
        rank: String,
        points: u64,
        issued_at: DateTime<Utc>,
    },
    PhysicalRewardRegistered {
        handle: Handle,
        serial: String,
        tier: RewardTier,
        anonymous_id: String,
        hologram_code: String,
        upgraded: bool,
    },
}

/// Credential work owed for a committed delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCredentials {
    pub handle: Handle,
    /// Point total the credentials are issued against
    pub points: u64,
    /// Present when a certificate is owed as well
    pub rank_crossed: Option<RankCrossed>,
}

/// Everything one committed delta produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionReport {
    pub outcome: DeltaOutcome,
    pub events: Vec<EngineEvent>,
    /// Set when the delta committed but credential issuance failed. Feed it
    /// back through [`Engine::settle_credentials`] to finish.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_credentials: Option<PendingCredentials>,
}

pub struct Engine {
    anonymizer: Arc<Anonymizer>,
    ledger: ReputationLedger,
    issuer: CredentialIssuer,
    classifier: EvidenceClassifier,
    category_points: BTreeMap<String, u64>,
    evidence_category: String,
}

impl Engine {
    pub fn new(config: &HonorConfig, store: Arc<dyn LedgerStore>) -> EngineResult<Self> {
        Self::with_serials(config, store, Arc::new(OsSerialSource))
    }

    pub fn with_serials(
        config: &HonorConfig,
        store: Arc<dyn LedgerStore>,
        serials: Arc<dyn SerialSource>,
    ) -> EngineResult<Self> {
        let anonymizer = Arc::new(config.anonymizer()?);
        let catalog = Arc::new(AchievementCatalog::default());

        Ok(Self {
            ledger: ReputationLedger::new(store.clone(), config.ledger_policy(), catalog),
            issuer: CredentialIssuer::new(
                store,
                anonymizer.clone(),
                serials,
                config.credentials.physical.clone(),
                config.credentials.serial_max_attempts,
            ),
            classifier: EvidenceClassifier::new(config.classifier_settings()),
            anonymizer,
            category_points: config.ledger.category_points.clone(),
            evidence_category: config.evidence.category.clone(),
        })
    }

    pub fn ledger(&self) -> &ReputationLedger {
        &self.ledger
    }

    pub fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }

    pub fn classifier(&self) -> &EvidenceClassifier {
        &self.classifier
    }

    /// Derive the handle. The external id is wiped here.
    pub fn handle_for(&self, external_id: String) -> Handle {
        self.anonymizer.anonymize(external_id)
    }

    pub async fn record_action(&self, action: ActionCompleted) -> EngineResult<ActionReport> {
        self.record_action_at(action, Utc::now()).await
    }

    pub async fn record_action_at(
        &self,
        action: ActionCompleted,
        now: DateTime<Utc>,
    ) -> EngineResult<ActionReport> {
        let ActionCompleted {
            external_id,
            category,
            raw_amount,
        } = action;
        if category.is_empty() || category.len() > MAX_CATEGORY_LEN {
            return Err(EngineError::InvalidCategory(category));
        }
        let handle = self.handle_for(external_id);

        let amount = match raw_amount {
            Some(amount) => amount,
            None => *self
                .category_points
                .get(&category)
                .ok_or_else(|| EngineError::UnknownCategory(category.clone()))?,
        };

        let outcome = self
            .ledger
            .apply_delta_at(&handle, &category, amount, DeltaReason::Action, now)
            .await?;
        Ok(self.finish(outcome, now).await)
    }

    /// Open an evidence submission for the owner of `external_id`
    pub async fn submit_evidence<F, E>(
        &self,
        external_id: String,
        extraction: F,
    ) -> EngineResult<EvidenceSubmission>
    where
        F: Future<Output = Result<ExtractionResult, E>>,
        E: std::fmt::Display,
    {
        let handle = self.handle_for(external_id);
        self.classifier
            .submit(handle, &self.evidence_category, extraction)
            .await
    }

    pub async fn confirm_evidence(&self, external_id: String, id: Uuid) -> EngineResult<ActionReport> {
        let handle = self.handle_for(external_id);
        let resolution = self.classifier.confirm(&handle, id)?;
        self.apply_resolution(resolution).await
    }

    pub fn reject_evidence(&self, external_id: String, id: Uuid) -> EngineResult<EvidenceSubmission> {
        let handle = self.handle_for(external_id);
        self.classifier.reject(&handle, id)
    }

    pub async fn choose_evidence(
        &self,
        external_id: String,
        id: Uuid,
        tier: &str,
    ) -> EngineResult<ActionReport> {
        let handle = self.handle_for(external_id);
        let resolution = self.classifier.choose(&handle, id, tier)?;
        self.apply_resolution(resolution).await
    }

    /// Re-run credential minting for a (possibly redelivered) crossing.
    /// Already issued transitions are skipped.
    pub async fn on_rank_crossed(&self, crossed: &RankCrossed) -> EngineResult<Vec<EngineEvent>> {
        self.settle_credentials(&PendingCredentials {
            handle: crossed.handle.clone(),
            points: crossed.points,
            rank_crossed: Some(crossed.clone()),
        })
        .await
    }

    /// Finish credential work handed back in
    /// [`ActionReport::pending_credentials`]. Safe to repeat.
    pub async fn settle_credentials(&self, pending: &PendingCredentials) -> EngineResult<Vec<EngineEvent>> {
        self.issue_for(pending, Utc::now()).await
    }

    pub async fn grant_manual_achievement(
        &self,
        external_id: String,
        achievement_id: &str,
    ) -> EngineResult<(GrantOutcome, Vec<EngineEvent>)> {
        let handle = self.handle_for(external_id);
        let outcome = self.ledger.grant_manual_achievement(&handle, achievement_id).await?;

        let mut events: Vec<EngineEvent> = outcome
            .unlocked
            .iter()
            .map(|a| EngineEvent::AchievementUnlocked {
                handle: handle.clone(),
                achievement_id: a.id.clone(),
                category: a.category.clone(),
                bonus_points: a.bonus_points,
            })
            .collect();
        if let Some(crossed) = &outcome.rank_crossed {
            events.push(rank_event(crossed));
        }
        if let Some(pending) =
            self.credentials_owed(&handle, outcome.points_before, outcome.new_total, &outcome.rank_crossed)
        {
            events.extend(self.issue_for(&pending, Utc::now()).await?);
        }
        Ok((outcome, events))
    }

    pub async fn purge_activity(&self, external_id: String) -> EngineResult<bool> {
        let handle = self.handle_for(external_id);
        self.ledger.purge_activity(&handle).await
    }

    pub async fn profile(&self, external_id: String) -> EngineResult<Option<Profile>> {
        let handle = self.handle_for(external_id);
        self.ledger.profile(&handle).await
    }

    pub async fn certificates_for(&self, external_id: String) -> EngineResult<Vec<Certificate>> {
        let handle = self.handle_for(external_id);
        self.issuer.certificates_for(&handle).await
    }

    pub async fn physical_reward_for(&self, external_id: String) -> EngineResult<Option<PhysicalReward>> {
        let handle = self.handle_for(external_id);
        self.issuer.physical_reward_for(&handle).await
    }

    pub async fn leaderboard(&self, limit: usize) -> EngineResult<Vec<LeaderboardEntry>> {
        self.ledger.leaderboard(limit).await
    }

    pub async fn verify_certificate(&self, serial: &str) -> EngineResult<CertificateVerification> {
        self.issuer.verify_certificate(serial).await
    }

    pub async fn verify_physical_reward(&self, serial: &str) -> EngineResult<PhysicalRewardVerification> {
        self.issuer.verify_physical_reward(serial).await
    }

    /// Operator hand-out of a physical reward. Answers with the public view
    /// only.
    pub async fn claim_physical_reward(&self, serial: &str) -> EngineResult<PhysicalRewardVerification> {
        self.issuer.claim_physical_reward(serial).await
    }

    pub async fn statistics(&self) -> EngineResult<Statistics> {
        self.ledger.statistics().await
    }

    async fn apply_resolution(&self, resolution: Resolution) -> EngineResult<ActionReport> {
        let now = Utc::now();
        let reason = DeltaReason::Evidence {
            tier: resolution.tier.clone(),
            quantity: resolution.quantity,
        };
        let outcome = match self
            .ledger
            .apply_delta_at(&resolution.handle, &resolution.category, resolution.points, reason, now)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    submission = %resolution.submission_id,
                    error = %e,
                    "Ledger refused evidence delta, reopening submission"
                );
                self.classifier.reopen(&resolution);
                return Err(e);
            }
        };
        Ok(self.finish(outcome, now).await)
    }

    /// Build events for a committed delta. Never fails: the points are
    /// already committed, so an issuance failure is reported for redelivery.
    async fn finish(&self, outcome: DeltaOutcome, now: DateTime<Utc>) -> ActionReport {
        let mut events: Vec<EngineEvent> = outcome
            .unlocked
            .iter()
            .map(|a| EngineEvent::AchievementUnlocked {
                handle: outcome.handle.clone(),
                achievement_id: a.id.clone(),
                category: a.category.clone(),
                bonus_points: a.bonus_points,
            })
            .collect();

        if let Some(crossed) = &outcome.rank_crossed {
            events.push(rank_event(crossed));
        }

        let mut pending_credentials = None;
        if let Some(pending) = self.credentials_owed(
            &outcome.handle,
            outcome.points_before,
            outcome.new_total,
            &outcome.rank_crossed,
        ) {
            match self.issue_for(&pending, now).await {
                Ok(issued) => events.extend(issued),
                Err(e) => {
                    // Operational alert; the work is handed back for redelivery
                    error!(
                        handle = %pending.handle.short(),
                        points = pending.points,
                        kind = ?e.kind(),
                        error = %e,
                        "Credential issuance failed after ledger commit"
                    );
                    pending_credentials = Some(pending);
                }
            }
        }

        ActionReport {
            outcome,
            events,
            pending_credentials,
        }
    }

    /// Credentials are owed on a rank crossing or when the points moved
    /// into another physical reward tier, even inside one rank.
    fn credentials_owed(
        &self,
        handle: &Handle,
        points_before: u64,
        points_after: u64,
        rank_crossed: &Option<RankCrossed>,
    ) -> Option<PendingCredentials> {
        let owed = rank_crossed.is_some()
            || self.issuer.reward_tier_changes(points_before, points_after);
        owed.then(|| PendingCredentials {
            handle: handle.clone(),
            points: points_after,
            rank_crossed: rank_crossed.clone(),
        })
    }

    /// One certificate for the final rank of a crossing, then the physical
    /// reward check for the points at that moment
    async fn issue_for(
        &self,
        pending: &PendingCredentials,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<EngineEvent>> {
        let mut events = Vec::new();

        if let Some(crossed) = &pending.rank_crossed {
            if let MintOutcome::Issued(cert) = self
                .issuer
                .mint(&crossed.handle, &crossed.rank_after, crossed.points, now)
                .await?
            {
                events.push(EngineEvent::CertificateIssued {
                    handle: cert.handle.clone(),
                    serial: cert.serial,
                    rank: cert.rank,
                    points: cert.points,
                    issued_at: cert.issued_at,
                });
            }
        }

        let (reward, upgraded) = match self
            .issuer
            .register_or_upgrade(&pending.handle, pending.points, now)
            .await?
        {
            RegistrationOutcome::Registered(reward) => (Some(reward), false),
            RegistrationOutcome::Upgraded { reward, .. } => (Some(reward), true),
            RegistrationOutcome::Unchanged(_) | RegistrationOutcome::NotEligible => (None, false),
        };
        if let Some(reward) = reward {
            events.push(EngineEvent::PhysicalRewardRegistered {
                handle: reward.handle,
                serial: reward.serial,
                tier: reward.tier,
                anonymous_id: reward.anonymous_id,
                hologram_code: reward.hologram_code,
                upgraded,
            });
        }

        Ok(events)
    }
}

fn rank_event(crossed: &RankCrossed) -> EngineEvent {
    EngineEvent::RankCrossed {
        handle: crossed.handle.clone(),
        rank_before: crossed.rank_before.clone(),
        rank_after: crossed.rank_after.clone(),
        points: crossed.points,
    }
}
