//! Identity anonymization
//!
//! External identities enter the engine exactly once, at [`Anonymizer::anonymize`],
//! and leave as an irreversible [`Handle`]. Nothing downstream ever sees the
//! raw id.

mod anonymizer;

pub use anonymizer::{Anonymizer, Handle, HANDLE_HEX_LEN, MIN_SECRET_LEN};
