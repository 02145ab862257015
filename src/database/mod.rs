//! PostgreSQL Database Module
//!
//! Durable [`LedgerStore`](crate::store::LedgerStore) backed by the `honor`
//! schema: reputation records, achievement unlocks, certificates, physical
//! reward registrations and aggregate statistics.

pub mod credentials;
pub mod pool;
pub mod records;
pub mod statistics;

pub use credentials::CredentialRepository;
pub use pool::DatabasePool;
pub use records::RecordRepository;
pub use statistics::StatisticsRepository;
