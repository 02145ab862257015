//! Honor Ledger
//!
//! Anonymized reputation ledger for a community-action platform. Members earn
//! points under an irreversible handle, climb a rank ladder, unlock
//! achievements and receive tamper-evident certificates and physical reward
//! registrations. Evidence uploads are turned into reward tiers only after
//! the owner confirms or picks one.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs          - Crate root with re-exports
//! ├── main.rs         - Server entrypoint
//! ├── config.rs       - Environment configuration
//! ├── error.rs        - Error taxonomy (fatal / retryable / rejected)
//! ├── engine.rs       - Action -> points -> achievements -> credentials flow
//! ├── identity/       - Peppered, salted handle derivation
//! ├── reputation/     - Ranks, records, streaks, combo, cooldowns, ledger, statistics
//! ├── achievements/   - Catalog and pure evaluator
//! ├── credentials/    - Serials, certificates, physical rewards, issuer
//! ├── evidence/       - Tier table, submission state machine, classifier
//! ├── store/          - LedgerStore seam + in-memory store
//! ├── database/       - PostgreSQL store
//! └── api/            - HTTP routes and security middleware
//! ```

pub mod achievements;
pub mod api;
pub mod config;
pub mod credentials;
pub mod database;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod identity;
pub mod reputation;
pub mod store;

// Re-export main types for convenience
pub use config::HonorConfig;
pub use engine::{ActionCompleted, ActionReport, Engine, EngineEvent, PendingCredentials};
pub use error::{EngineError, EngineResult, ErrorKind};

pub use achievements::{AchievementCatalog, AchievementDefinition, UnlockedAchievement};
pub use credentials::{
    Certificate, CertificateVerification, ClaimStatus, CredentialIssuer, PhysicalReward,
    PhysicalRewardPolicy, PhysicalRewardVerification, RewardTier,
};
pub use database::DatabasePool;
pub use evidence::{
    EvidenceClassifier, EvidenceSubmission, ExtractionResult, SubmissionState, TierTable,
};
pub use identity::{Anonymizer, Handle};
pub use reputation::{Rank, RankTable, ReputationLedger, ReputationRecord, Statistics};
pub use store::{LedgerStore, MemoryStore};
