//! Keyed one-way handle derivation
//!
//! `handle = HMAC-SHA256(key = pepper, msg = external_id || salt)`, hex encoded.
//! Recovering the id from a handle needs both secrets plus an exhaustive search
//! over the id space.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{EngineError, EngineResult};

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted length for pepper and salt, in bytes
pub const MIN_SECRET_LEN: usize = 16;

/// Hex length of a handle (256-bit digest)
pub const HANDLE_HEX_LEN: usize = 64;

const REWARD_ALIAS_DOMAIN: &[u8] = b"honor-ledger/reward-alias/v1";

/// Irreversible internal identifier derived from an external identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Rebuild a handle read back from storage. Rejects anything that is not a
    /// lowercase 64-char hex digest.
    pub fn from_stored(value: &str) -> Option<Self> {
        let well_formed = value.len() == HANDLE_HEX_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Handle(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct Anonymizer {
    keyed: HmacSha256,
    alias_keyed: HmacSha256,
    salt: Zeroizing<Vec<u8>>,
}

impl Anonymizer {
    /// Build the anonymizer. Fails closed when either secret is missing or too
    /// short; there is no default.
    pub fn new(pepper: &[u8], salt: &[u8]) -> EngineResult<Self> {
        if pepper.is_empty() {
            return Err(EngineError::MissingSecret("pepper"));
        }
        if salt.is_empty() {
            return Err(EngineError::MissingSecret("salt"));
        }
        if pepper.len() < MIN_SECRET_LEN || salt.len() < MIN_SECRET_LEN {
            return Err(EngineError::InvalidConfig(format!(
                "pepper and salt must each be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }

        let keyed = HmacSha256::new_from_slice(pepper)
            .map_err(|e| EngineError::InvalidConfig(format!("pepper rejected: {}", e)))?;

        let mut alias_key = Zeroizing::new(Vec::with_capacity(pepper.len() + REWARD_ALIAS_DOMAIN.len()));
        alias_key.extend_from_slice(REWARD_ALIAS_DOMAIN);
        alias_key.extend_from_slice(pepper);
        let alias_keyed = HmacSha256::new_from_slice(&alias_key)
            .map_err(|e| EngineError::InvalidConfig(format!("alias key rejected: {}", e)))?;

        Ok(Self {
            keyed,
            alias_keyed,
            salt: Zeroizing::new(salt.to_vec()),
        })
    }

    /// Derive the handle for an external id. Takes the id by value and wipes it
    /// before returning.
    pub fn anonymize(&self, mut external_id: String) -> Handle {
        let mut mac = self.keyed.clone();
        mac.update(external_id.as_bytes());
        mac.update(&self.salt);
        external_id.zeroize();

        Handle(hex::encode(mac.finalize().into_bytes()))
    }

    /// Second-stage id for the physical reward registry. Derived from the
    /// handle under a separate key, so the registry's public id cannot be
    /// matched against handles without the pepper.
    pub fn reward_alias(&self, handle: &Handle) -> String {
        let mut mac = self.alias_keyed.clone();
        mac.update(handle.as_str().as_bytes());
        let digest = mac.finalize().into_bytes();
        format!("HERO-{}", hex::encode_upper(&digest[..12]))
    }
}

impl fmt::Debug for Anonymizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anonymizer").finish_non_exhaustive()
    }
}
