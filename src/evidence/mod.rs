//! Evidence Tier Classifier
//!
//! Turns a noisy externally extracted quantity into a reward tier. Points are
//! only ever awarded for a tier the owner confirmed or chose; extraction alone
//! never commits anything.

mod classifier;
mod submission;
mod tiers;

pub use classifier::{ClassifierSettings, EvidenceClassifier};
pub use submission::{
    EvidenceSubmission, ExtractionResult, Resolution, ResolutionMethod, SubmissionState,
};
pub use tiers::{EvidenceTier, TierTable};
