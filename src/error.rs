//! Engine error taxonomy
//!
//! Every error carries a [`ErrorKind`] so callers can tell an environment
//! failure (stop or page someone) from a retryable conflict or a rejected
//! request. Expected branches such as low-confidence extraction or a
//! duplicate mint are not errors and never show up here.

use thiserror::Error;

/// Coarse classification used by the HTTP layer and by operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misconfiguration or exhausted environment resources. Not user facing.
    Fatal,
    /// Transient contention or storage trouble; the caller may retry.
    Retryable,
    /// The request itself is invalid for the current state.
    Rejected,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("required secret {0} is missing or empty")]
    MissingSecret(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serial space exhausted after {attempts} attempts")]
    SerialSpaceExhausted { attempts: u32 },

    #[error("ledger update conflicted {attempts} times")]
    Conflict { attempts: u32 },

    #[error("store failure: {0}")]
    Store(String),

    #[error("stored row is corrupt: {0}")]
    CorruptRecord(String),

    #[error("invalid evidence transition: {from} -> {action}")]
    InvalidTransition { from: &'static str, action: &'static str },

    #[error("unknown evidence submission {0}")]
    UnknownSubmission(String),

    #[error("unknown tier {0}")]
    UnknownTier(String),

    #[error("unknown category {0} and no amount supplied")]
    UnknownCategory(String),

    #[error("unknown achievement {0}")]
    UnknownAchievement(String),

    #[error("invalid category {0:?}: must be 1 to {max} bytes", max = crate::reputation::MAX_CATEGORY_LEN)]
    InvalidCategory(String),

    #[error("{category} is cooling down, retry in {retry_after_secs}s")]
    CooldownActive {
        category: String,
        retry_after_secs: u64,
    },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MissingSecret(_)
            | EngineError::InvalidConfig(_)
            | EngineError::SerialSpaceExhausted { .. }
            | EngineError::CorruptRecord(_) => ErrorKind::Fatal,
            EngineError::Conflict { .. } | EngineError::Store(_) => ErrorKind::Retryable,
            EngineError::InvalidTransition { .. }
            | EngineError::UnknownSubmission(_)
            | EngineError::UnknownTier(_)
            | EngineError::UnknownCategory(_)
            | EngineError::UnknownAchievement(_)
            | EngineError::InvalidCategory(_)
            | EngineError::CooldownActive { .. } => ErrorKind::Rejected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Store(e.to_string())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(EngineError::MissingSecret("HONOR_HASH_PEPPER").kind(), ErrorKind::Fatal);
        assert_eq!(
            EngineError::SerialSpaceExhausted { attempts: 5 }.kind(),
            ErrorKind::Fatal
        );
        assert!(EngineError::Conflict { attempts: 8 }.is_retryable());
        assert_eq!(EngineError::UnknownTier("9000+".to_string()).kind(), ErrorKind::Rejected);
    }

    #[test]
    fn test_corrupt_row_is_not_retryable() {
        let err = EngineError::CorruptRecord("tier 'platinum'".to_string());
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(!err.is_retryable());
        assert_eq!(
            EngineError::InvalidCategory(String::new()).kind(),
            ErrorKind::Rejected
        );
    }
}
