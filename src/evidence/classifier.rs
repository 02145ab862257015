//! Evidence Tier Classifier
//!
//! Holds in-flight submissions and drives their state machine. The automatic
//! path and the confidence threshold are fixed at construction.

use chrono::Utc;
use dashmap::DashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::evidence::{EvidenceSubmission, ExtractionResult, Resolution, TierTable};
use crate::identity::Handle;

/// Construction-time classifier settings
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// When false the extractor is never consulted and every submission goes
    /// straight to the manual choice
    pub auto_extraction: bool,
    pub confidence_threshold: f64,
    pub extraction_budget: Duration,
    pub tiers: TierTable,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            auto_extraction: true,
            confidence_threshold: 60.0,
            extraction_budget: Duration::from_secs(30),
            tiers: TierTable::default(),
        }
    }
}

pub struct EvidenceClassifier {
    settings: ClassifierSettings,
    submissions: DashMap<Uuid, EvidenceSubmission>,
}

impl EvidenceClassifier {
    pub fn new(settings: ClassifierSettings) -> Self {
        Self {
            settings,
            submissions: DashMap::new(),
        }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.settings.tiers
    }

    /// Open a submission and run `extraction` within the time budget. A
    /// failed or timed out extraction is an ordinary branch, not an error.
    pub async fn submit<F, E>(
        &self,
        handle: Handle,
        category: &str,
        extraction: F,
    ) -> EngineResult<EvidenceSubmission>
    where
        F: Future<Output = Result<ExtractionResult, E>>,
        E: std::fmt::Display,
    {
        let mut submission = EvidenceSubmission::receive(handle, category.to_string(), Utc::now());

        let extracted = if self.settings.auto_extraction {
            match tokio::time::timeout(self.settings.extraction_budget, extraction).await {
                Ok(Ok(result)) => Some(result),
                Ok(Err(e)) => {
                    warn!(submission = %submission.id, error = %e, "Evidence extraction failed");
                    None
                }
                Err(_) => {
                    warn!(
                        submission = %submission.id,
                        budget_ms = self.settings.extraction_budget.as_millis() as u64,
                        "Evidence extraction timed out"
                    );
                    None
                }
            }
        } else {
            None
        };

        submission.record_extraction(
            extracted,
            self.settings.confidence_threshold,
            &self.settings.tiers,
        )?;

        info!(
            submission = %submission.id,
            handle = %submission.handle.short(),
            state = %submission.state.as_str(),
            suggested = ?submission.suggested_tier,
            "Evidence submission received"
        );

        self.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    /// Owner's view of a submission. Other handles get `UnknownSubmission`.
    pub fn get(&self, handle: &Handle, id: Uuid) -> EngineResult<EvidenceSubmission> {
        self.with_submission(handle, id, |s| Ok(s.clone()))
    }

    pub fn confirm(&self, handle: &Handle, id: Uuid) -> EngineResult<Resolution> {
        let tiers = &self.settings.tiers;
        self.with_submission(handle, id, |s| s.confirm(tiers, Utc::now()))
    }

    pub fn reject(&self, handle: &Handle, id: Uuid) -> EngineResult<EvidenceSubmission> {
        self.with_submission(handle, id, |s| {
            s.reject()?;
            Ok(s.clone())
        })
    }

    pub fn choose(&self, handle: &Handle, id: Uuid, tier: &str) -> EngineResult<Resolution> {
        let tiers = &self.settings.tiers;
        self.with_submission(handle, id, |s| s.choose(tier, tiers, Utc::now()))
    }

    /// Return a resolved submission to its awaiting state after the ledger
    /// refused the delta, so the owner can retry.
    pub fn reopen(&self, resolution: &Resolution) {
        if let Some(mut s) = self.submissions.get_mut(&resolution.submission_id) {
            s.reopen();
            debug!(submission = %resolution.submission_id, "Evidence submission reopened");
        }
    }

    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    fn with_submission<T>(
        &self,
        handle: &Handle,
        id: Uuid,
        f: impl FnOnce(&mut EvidenceSubmission) -> EngineResult<T>,
    ) -> EngineResult<T> {
        match self.submissions.get_mut(&id) {
            Some(mut s) if &s.handle == handle => f(&mut s),
            _ => Err(EngineError::UnknownSubmission(id.to_string())),
        }
    }
}
