//! Tamper-evident credentials
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  RankCrossed  ┌──────────────────┐      ┌──────────────┐
//! │ Ledger       │──────────────►│ CredentialIssuer │─────►│ LedgerStore  │
//! └──────────────┘               │  mint            │      │ certificates │
//!                                │  register_or_    │      │ physical_    │
//!                                │   upgrade        │      │  rewards     │
//!                                └──────────────────┘      └──────────────┘
//!                                         ▲
//!                     verify_certificate  │  verify_physical_reward
//!                     (public, read-only) │
//! ```
//!
//! ## Integrity model
//!
//! Certificate `verification_hash` and the physical reward hologram are
//! SHA-256 digests over fields stored next to them. Verification detects
//! accidental or partial corruption of a row. It does NOT resist forgery: any
//! party with write access to the store can insert a self-consistent record.
//! Binding credentials to an offline signing key would close that gap and is
//! left as an explicit threat-model decision.

mod certificate;
mod issuer;
mod physical;
mod serial;

pub use certificate::{Certificate, CertificateVerification};
pub use issuer::{CredentialIssuer, MintOutcome, RegistrationOutcome};
pub use physical::{
    ClaimStatus, PhysicalReward, PhysicalRewardPolicy, PhysicalRewardVerification, RewardTier,
};
pub use serial::{OsSerialSource, SerialNamespace, SerialSource, SERIAL_BYTES};
