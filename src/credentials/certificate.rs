//! Rank certificates

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::identity::Handle;

const CERTIFICATE_DOMAIN: &[u8] = b"honor-ledger/certificate/v1";

/// Length-prefixed SHA-256 over `fields`, so no two field lists share an encoding
pub(super) fn canonical_digest(domain: &[u8], fields: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for field in fields {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    hex::encode(hasher.finalize())
}

/// Timestamps are stored at microsecond precision; truncate before hashing so
/// the digest survives a round trip through the database.
pub(super) fn storage_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// Publicly verifiable record of one rank crossing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub serial: String,
    pub handle: Handle,
    pub rank: String,
    pub points: u64,
    pub issued_at: DateTime<Utc>,
    pub verification_hash: String,
}

impl Certificate {
    pub fn new(serial: String, handle: Handle, rank: String, points: u64, issued_at: DateTime<Utc>) -> Self {
        let issued_at = storage_precision(issued_at);
        let verification_hash = Self::compute_hash(&serial, &rank, points, issued_at);
        Self {
            serial,
            handle,
            rank,
            points,
            issued_at,
            verification_hash,
        }
    }

    /// Digest over `{serial, rank, points, issued_at}`
    pub fn compute_hash(serial: &str, rank: &str, points: u64, issued_at: DateTime<Utc>) -> String {
        canonical_digest(
            CERTIFICATE_DOMAIN,
            &[
                serial.as_bytes(),
                rank.as_bytes(),
                &points.to_be_bytes(),
                &issued_at.timestamp_micros().to_be_bytes(),
            ],
        )
    }

    /// Recompute the hash from the stored fields and compare
    pub fn is_intact(&self) -> bool {
        let expected = Self::compute_hash(&self.serial, &self.rank, self.points, self.issued_at);
        bool::from(expected.as_bytes().ct_eq(self.verification_hash.as_bytes()))
    }
}

/// Public verification answer. Never carries the handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl CertificateVerification {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            rank: None,
            points: None,
            issued_at: None,
        }
    }

    pub fn of(cert: &Certificate) -> Self {
        if !cert.is_intact() {
            return Self::invalid();
        }
        Self {
            valid: true,
            rank: Some(cert.rank.clone()),
            points: Some(cert.points),
            issued_at: Some(cert.issued_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Anonymizer;

    fn cert() -> Certificate {
        let anonymizer = Anonymizer::new(b"pepper-pepper-pepper", b"salt-salt-salt-salt").unwrap();
        Certificate::new(
            "CERT-00112233445566778899AABB".to_string(),
            anonymizer.anonymize("5".to_string()),
            "Captain".to_string(),
            371,
            Utc::now(),
        )
    }

    #[test]
    fn test_fresh_certificate_is_intact() {
        let cert = cert();
        assert!(cert.is_intact());
        assert!(CertificateVerification::of(&cert).valid);
    }

    #[test]
    fn test_any_field_mutation_detected() {
        let original = cert();

        let mut c = original.clone();
        c.rank = "Marshal".to_string();
        assert!(!c.is_intact());

        let mut c = original.clone();
        c.points += 1;
        assert!(!c.is_intact());

        let mut c = original.clone();
        c.issued_at = c.issued_at - chrono::Duration::seconds(1);
        assert!(!c.is_intact());

        let mut c = original.clone();
        c.serial = "CERT-FFFFFFFFFFFFFFFFFFFFFFFF".to_string();
        assert!(!c.is_intact());
        assert_eq!(CertificateVerification::of(&c), CertificateVerification::invalid());
    }

    #[test]
    fn test_stored_hash_must_match_in_full() {
        let original = cert();

        let mut c = original.clone();
        c.verification_hash.truncate(63);
        assert!(!c.is_intact());

        let mut c = original.clone();
        c.verification_hash.push('0');
        assert!(!c.is_intact());

        let mut c = original;
        c.verification_hash = c.verification_hash.to_uppercase();
        assert!(!c.is_intact());
    }

    #[test]
    fn test_canonical_digest_is_unambiguous() {
        let a = canonical_digest(b"d", &[b"ab", b"c"]);
        let b = canonical_digest(b"d", &[b"a", b"bc"]);
        assert_ne!(a, b);
    }
}
