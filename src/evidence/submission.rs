//! Evidence submission lifecycle
//!
//! ```text
//! Received ─► Extracted ──[conf >= T, tier match]──► AwaitingConfirmation ─► Resolved(auto)
//!    │            │                                        │ reject
//!    │            └──[conf < T or no tier]──┐              ▼
//!    └─► ExtractionFailed ──────────────────┴──────► AwaitingManualChoice ─► Resolved(manual)
//! ```
//!
//! No transition awards points by itself; a [`Resolution`] is what the
//! engine hands to the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::evidence::TierTable;
use crate::identity::Handle;

/// Output of the external extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub quantity_estimate: Option<f64>,
    /// 0 to 100
    pub confidence: f64,
    #[serde(default)]
    pub raw_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "method", rename_all = "snake_case")]
pub enum SubmissionState {
    Received,
    Extracted,
    ExtractionFailed,
    AwaitingConfirmation,
    AwaitingManualChoice,
    Resolved(ResolutionMethod),
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Received => "received",
            SubmissionState::Extracted => "extracted",
            SubmissionState::ExtractionFailed => "extraction_failed",
            SubmissionState::AwaitingConfirmation => "awaiting_confirmation",
            SubmissionState::AwaitingManualChoice => "awaiting_manual_choice",
            SubmissionState::Resolved(_) => "resolved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Resolved(_))
    }
}

/// Final decision for a submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub submission_id: Uuid,
    pub handle: Handle,
    pub category: String,
    pub method: ResolutionMethod,
    pub tier: String,
    pub points: u64,
    /// Quantity credited toward cumulative evidence totals
    pub quantity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceSubmission {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub handle: Handle,
    pub category: String,
    pub state: SubmissionState,
    /// Every state the submission has been in, oldest first
    pub history: Vec<SubmissionState>,
    pub quantity_estimate: Option<f64>,
    pub confidence: Option<f64>,
    /// Tier proposed to the owner for confirmation
    pub suggested_tier: Option<String>,
    pub final_tier: Option<String>,
    pub final_points: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl EvidenceSubmission {
    pub fn receive(handle: Handle, category: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle,
            category,
            state: SubmissionState::Received,
            history: vec![SubmissionState::Received],
            quantity_estimate: None,
            confidence: None,
            suggested_tier: None,
            final_tier: None,
            final_points: None,
            created_at: now,
            resolved_at: None,
        }
    }

    fn enter(&mut self, state: SubmissionState) {
        self.state = state;
        self.history.push(state);
    }

    fn require(&self, state: SubmissionState, action: &'static str) -> EngineResult<()> {
        if self.state != state {
            return Err(EngineError::InvalidTransition {
                from: self.state.as_str(),
                action,
            });
        }
        Ok(())
    }

    /// Feed the extractor's answer. `None` means extraction failed, timed out
    /// or is switched off. Never errors for low confidence or a bad estimate;
    /// those route to the manual choice.
    pub fn record_extraction(
        &mut self,
        extraction: Option<ExtractionResult>,
        threshold: f64,
        tiers: &TierTable,
    ) -> EngineResult<()> {
        self.require(SubmissionState::Received, "extract")?;

        let Some(extraction) = extraction else {
            self.enter(SubmissionState::ExtractionFailed);
            self.enter(SubmissionState::AwaitingManualChoice);
            return Ok(());
        };

        self.enter(SubmissionState::Extracted);
        self.quantity_estimate = extraction.quantity_estimate.filter(|q| q.is_finite());
        self.confidence = Some(extraction.confidence).filter(|c| c.is_finite());

        let confident = self
            .confidence
            .map(|c| (0.0..=100.0).contains(&c) && c >= threshold)
            .unwrap_or(false);
        let suggested = self
            .quantity_estimate
            .and_then(|q| tiers.classify(q))
            .map(|t| t.name.clone());

        match (confident, suggested) {
            (true, Some(tier)) => {
                self.suggested_tier = Some(tier);
                self.enter(SubmissionState::AwaitingConfirmation);
            }
            _ => self.enter(SubmissionState::AwaitingManualChoice),
        }
        Ok(())
    }

    /// Owner accepts the suggested tier
    pub fn confirm(&mut self, tiers: &TierTable, now: DateTime<Utc>) -> EngineResult<Resolution> {
        self.require(SubmissionState::AwaitingConfirmation, "confirm")?;
        let name = self.suggested_tier.clone().unwrap_or_default();
        let tier = tiers
            .get(&name)
            .ok_or_else(|| EngineError::UnknownTier(name.clone()))?;

        let resolution = self.resolution(ResolutionMethod::Auto, tier.name.clone(), tier.points, self.quantity_estimate);
        self.finish(&resolution, now);
        Ok(resolution)
    }

    /// Owner rejects the suggested tier and will pick one manually
    pub fn reject(&mut self) -> EngineResult<()> {
        self.require(SubmissionState::AwaitingConfirmation, "reject")?;
        self.enter(SubmissionState::AwaitingManualChoice);
        Ok(())
    }

    /// Owner picks a tier by hand. The chosen tier's points are final even if
    /// a different tier was suggested. The estimate is credited only when it
    /// lies inside the chosen tier, otherwise the tier's lower bound.
    pub fn choose(
        &mut self,
        tier_name: &str,
        tiers: &TierTable,
        now: DateTime<Utc>,
    ) -> EngineResult<Resolution> {
        self.require(SubmissionState::AwaitingManualChoice, "choose")?;
        let tier = tiers
            .get(tier_name)
            .ok_or_else(|| EngineError::UnknownTier(tier_name.to_string()))?;

        let quantity = match self.quantity_estimate {
            Some(q) if tier.contains(q) => q,
            _ => tier.min,
        };
        let resolution = self.resolution(ResolutionMethod::Manual, tier.name.clone(), tier.points, Some(quantity));
        self.finish(&resolution, now);
        Ok(resolution)
    }

    /// Undo a resolution whose ledger delta could not be committed
    pub(super) fn reopen(&mut self) {
        if let SubmissionState::Resolved(method) = self.state {
            self.final_tier = None;
            self.final_points = None;
            self.resolved_at = None;
            self.history.pop();
            self.state = match method {
                ResolutionMethod::Auto => SubmissionState::AwaitingConfirmation,
                ResolutionMethod::Manual => SubmissionState::AwaitingManualChoice,
            };
        }
    }

    fn resolution(&self, method: ResolutionMethod, tier: String, points: u64, quantity: Option<f64>) -> Resolution {
        Resolution {
            submission_id: self.id,
            handle: self.handle.clone(),
            category: self.category.clone(),
            method,
            tier,
            points,
            quantity,
        }
    }

    fn finish(&mut self, resolution: &Resolution, now: DateTime<Utc>) {
        self.final_tier = Some(resolution.tier.clone());
        self.final_points = Some(resolution.points);
        self.resolved_at = Some(now);
        self.enter(SubmissionState::Resolved(resolution.method));
    }
}
