use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::time::Duration;
use tracing::info;
use zeroize::Zeroizing;

use crate::credentials::PhysicalRewardPolicy;
use crate::error::EngineError;
use crate::evidence::{ClassifierSettings, TierTable};
use crate::identity::{Anonymizer, MIN_SECRET_LEN};
use crate::reputation::{LedgerPolicy, Milestone, RankTable, MAX_CATEGORY_LEN};

/// Configuration for the honor ledger service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HonorConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// API access configuration
    pub security: SecurityConfig,
    /// Anonymizer secrets
    pub identity: IdentityConfig,
    /// Points, ranks, streaks and combos
    pub ledger: LedgerConfig,
    /// Certificates and physical rewards
    pub credentials: CredentialConfig,
    /// Evidence classification
    pub evidence: EvidenceConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Keys accepted in `x-api-key` for ingest routes. Never serialized.
    #[serde(skip)]
    pub api_keys: Vec<String>,
    /// Rate limit per minute per IP on public routes
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Take the client address from `x-forwarded-for`/`x-real-ip`. Only
    /// safe behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("api_keys", &self.api_keys.len())
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("max_request_size", &self.max_request_size)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .finish()
    }
}

/// Pepper and salt for handle derivation. Required, no defaults.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(skip)]
    pub pepper: Zeroizing<Vec<u8>>,
    #[serde(skip)]
    pub salt: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("pepper", &"<redacted>")
            .field("salt", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub ranks: RankTable,
    pub streak_milestones: Vec<Milestone>,
    pub combo_milestones: Vec<Milestone>,
    /// Points for actions that arrive without an explicit amount
    pub category_points: BTreeMap<String, u64>,
    /// Optimistic commit attempts per delta
    pub max_retries: u32,
    /// Seconds between two paid actions of one category; unlisted
    /// categories are not throttled
    pub cooldowns: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub physical: PhysicalRewardPolicy,
    /// Serial generation attempts before giving up
    pub serial_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// Consult the extractor at all; off means manual choice only
    pub enabled: bool,
    /// Minimum extractor confidence (0-100) for a suggested tier
    pub confidence_threshold: f64,
    /// Extraction time budget in seconds
    pub extraction_budget_secs: u64,
    pub tiers: TierTable,
    /// Ledger category credited for resolved evidence
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses in-memory store)
    pub postgres_enabled: bool,
    /// Pool size
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug)
    pub level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let policy = LedgerPolicy::default();
        let category_points = [
            ("email_sent", 20),
            ("tweet_shared", 12),
            ("media_submitted", 35),
            ("video_testimonial", 150),
            ("daily_login", 5),
            ("protest_attendance", 10),
            ("protest_cleanup", 40),
            ("protest_media_shared", 18),
            ("protest_event_created", 30),
        ]
        .into_iter()
        .map(|(category, points)| (category.to_string(), points))
        .collect();

        Self {
            ranks: policy.ranks,
            streak_milestones: policy.streak_milestones,
            combo_milestones: policy.combo_milestones,
            category_points,
            max_retries: policy.max_retries,
            cooldowns: policy.cooldowns,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/honor_ledger".to_string(),
            postgres_enabled: false,
            max_connections: 10,
        }
    }
}

impl Default for HonorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8780,
            },
            security: SecurityConfig {
                api_keys: Vec::new(), // MUST be configured
                rate_limit_per_minute: 60,
                max_request_size: 64 * 1024,
                trust_proxy_headers: false,
            },
            identity: IdentityConfig::default(), // MUST be configured
            ledger: LedgerConfig::default(),
            credentials: CredentialConfig {
                physical: PhysicalRewardPolicy::default(),
                serial_max_attempts: 5,
            },
            evidence: EvidenceConfig {
                enabled: true,
                confidence_threshold: 60.0,
                extraction_budget_secs: 30,
                tiers: TierTable::default(),
                category: "data_shared".to_string(),
            },
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl HonorConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Server configuration
        if let Some(host) = lookup("HONOR_HOST") {
            config.server.host = host;
        }

        if let Some(port) = lookup("HONOR_PORT") {
            config.server.port = port.parse().context("Invalid HONOR_PORT value")?;
        }

        // Security configuration
        if let Some(keys) = lookup("HONOR_API_KEYS") {
            config.security.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(rate_limit) = lookup("HONOR_RATE_LIMIT_PER_MINUTE") {
            config.security.rate_limit_per_minute = rate_limit
                .parse()
                .context("Invalid HONOR_RATE_LIMIT_PER_MINUTE value")?;
        }

        if let Some(trust) = lookup("HONOR_TRUST_PROXY_HEADERS") {
            config.security.trust_proxy_headers = trust
                .parse()
                .context("Invalid HONOR_TRUST_PROXY_HEADERS value")?;
        }

        // Identity secrets - SECURITY CRITICAL, no fallback
        config.identity.pepper = Zeroizing::new(required_secret(&lookup, "HONOR_HASH_PEPPER")?);
        config.identity.salt = Zeroizing::new(required_secret(&lookup, "HONOR_HASH_SALT")?);

        // Ledger configuration
        if let Some(raw) = lookup("HONOR_RANK_THRESHOLDS") {
            config.ledger.ranks =
                RankTable::parse(&raw).context("Invalid HONOR_RANK_THRESHOLDS value")?;
        }

        if let Some(raw) = lookup("HONOR_STREAK_MILESTONES") {
            config.ledger.streak_milestones =
                parse_milestones(&raw).context("Invalid HONOR_STREAK_MILESTONES value")?;
        }

        if let Some(raw) = lookup("HONOR_COMBO_MILESTONES") {
            config.ledger.combo_milestones =
                parse_milestones(&raw).context("Invalid HONOR_COMBO_MILESTONES value")?;
        }

        if let Some(raw) = lookup("HONOR_CATEGORY_POINTS") {
            config.ledger.category_points =
                parse_category_map(&raw).context("Invalid HONOR_CATEGORY_POINTS value")?;
        }

        if let Some(raw) = lookup("HONOR_ACTION_COOLDOWNS") {
            config.ledger.cooldowns =
                parse_category_map(&raw).context("Invalid HONOR_ACTION_COOLDOWNS value")?;
        }

        if let Some(retries) = lookup("HONOR_LEDGER_MAX_RETRIES") {
            config.ledger.max_retries = retries
                .parse()
                .context("Invalid HONOR_LEDGER_MAX_RETRIES value")?;
        }

        // Credential configuration
        if let Some(raw) = lookup("HONOR_PHYSICAL_THRESHOLDS") {
            let levels: Vec<u64> = raw
                .split(',')
                .map(|v| v.trim().parse::<u64>())
                .collect::<std::result::Result<_, _>>()
                .context("Invalid HONOR_PHYSICAL_THRESHOLDS value")?;
            let [bronze, silver, gold] = levels.as_slice() else {
                anyhow::bail!("HONOR_PHYSICAL_THRESHOLDS needs exactly three values");
            };
            config.credentials.physical = PhysicalRewardPolicy::new(*bronze, *silver, *gold)
                .context("Invalid HONOR_PHYSICAL_THRESHOLDS value")?;
        }

        if let Some(attempts) = lookup("HONOR_SERIAL_MAX_ATTEMPTS") {
            config.credentials.serial_max_attempts = attempts
                .parse()
                .context("Invalid HONOR_SERIAL_MAX_ATTEMPTS value")?;
        }

        // Evidence configuration
        if let Some(enabled) = lookup("HONOR_EVIDENCE_ENABLED") {
            config.evidence.enabled = enabled
                .parse()
                .context("Invalid HONOR_EVIDENCE_ENABLED value")?;
        }

        if let Some(threshold) = lookup("HONOR_EVIDENCE_CONFIDENCE_THRESHOLD") {
            config.evidence.confidence_threshold = threshold
                .parse()
                .context("Invalid HONOR_EVIDENCE_CONFIDENCE_THRESHOLD value")?;
        }

        if let Some(budget) = lookup("HONOR_EVIDENCE_BUDGET_SECS") {
            config.evidence.extraction_budget_secs = budget
                .parse()
                .context("Invalid HONOR_EVIDENCE_BUDGET_SECS value")?;
        }

        if let Some(raw) = lookup("HONOR_EVIDENCE_TIERS") {
            config.evidence.tiers =
                TierTable::parse(&raw).context("Invalid HONOR_EVIDENCE_TIERS value")?;
        }

        // Database configuration
        if let Some(url) = lookup("HONOR_POSTGRES_URL") {
            config.database.postgres_url = url;
        }

        if let Some(enabled) = lookup("HONOR_POSTGRES_ENABLED") {
            config.database.postgres_enabled = enabled
                .parse()
                .context("Invalid HONOR_POSTGRES_ENABLED value")?;
        }

        if let Some(max) = lookup("HONOR_POSTGRES_MAX_CONNECTIONS") {
            config.database.max_connections = max
                .parse()
                .context("Invalid HONOR_POSTGRES_MAX_CONNECTIONS value")?;
        }

        // Logging configuration
        if let Some(level) = lookup("HONOR_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for security and consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        // Secrets fail closed
        check_secret("HONOR_HASH_PEPPER", &self.identity.pepper)?;
        check_secret("HONOR_HASH_SALT", &self.identity.salt)?;

        if self.security.api_keys.is_empty() {
            return Err(anyhow::anyhow!("At least one API key is required (HONOR_API_KEYS)"));
        }

        for key in &self.security.api_keys {
            if key.len() < 32 {
                return Err(anyhow::anyhow!(
                    "API key {} is too short (minimum 32 characters for security)",
                    mask_secret(key)
                ));
            }
        }

        if self.ledger.max_retries == 0 {
            return Err(anyhow::anyhow!("Ledger max retries must be non-zero"));
        }

        if self.credentials.serial_max_attempts == 0 {
            return Err(anyhow::anyhow!("Serial max attempts must be non-zero"));
        }

        if !(0.0..=100.0).contains(&self.evidence.confidence_threshold) {
            return Err(anyhow::anyhow!(
                "Evidence confidence threshold must be within 0-100, got {}",
                self.evidence.confidence_threshold
            ));
        }

        if self.evidence.extraction_budget_secs == 0 {
            return Err(anyhow::anyhow!("Evidence extraction budget must be non-zero"));
        }

        if self.evidence.category.is_empty() {
            return Err(anyhow::anyhow!("Evidence category cannot be empty"));
        }

        // Every name below lands in a VARCHAR(64) column
        let names = std::iter::once(self.evidence.category.as_str())
            .chain(self.ledger.category_points.keys().map(String::as_str))
            .chain(self.ledger.cooldowns.keys().map(String::as_str))
            .chain(self.ledger.ranks.ranks().iter().map(|r| r.label.as_str()))
            .chain(self.evidence.tiers.tiers().iter().map(|t| t.name.as_str()));
        for name in names {
            if name.len() > MAX_CATEGORY_LEN {
                return Err(anyhow::anyhow!(
                    "Name '{}...' exceeds {} bytes",
                    name.chars().take(16).collect::<String>(),
                    MAX_CATEGORY_LEN
                ));
            }
        }

        Ok(())
    }

    /// Fill in secrets and one API key directly. Used by tests and embedders
    /// that do not read the environment.
    pub fn with_secrets(mut self, pepper: &[u8], salt: &[u8], api_key: &str) -> Self {
        self.identity.pepper = Zeroizing::new(pepper.to_vec());
        self.identity.salt = Zeroizing::new(salt.to_vec());
        self.security.api_keys = vec![api_key.to_string()];
        self
    }

    pub fn anonymizer(&self) -> std::result::Result<Anonymizer, EngineError> {
        Anonymizer::new(&self.identity.pepper, &self.identity.salt)
    }

    pub fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            ranks: self.ledger.ranks.clone(),
            streak_milestones: self.ledger.streak_milestones.clone(),
            combo_milestones: self.ledger.combo_milestones.clone(),
            max_retries: self.ledger.max_retries,
            cooldowns: self.ledger.cooldowns.clone(),
        }
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            auto_extraction: self.evidence.enabled,
            confidence_threshold: self.evidence.confidence_threshold,
            extraction_budget: Duration::from_secs(self.evidence.extraction_budget_secs),
            tiers: self.evidence.tiers.clone(),
        }
    }

    /// Log the effective, non-secret settings
    pub fn log_summary(&self) {
        info!(
            host = %self.server.host,
            port = self.server.port,
            ranks = self.ledger.ranks.ranks().len(),
            categories = self.ledger.category_points.len(),
            evidence_enabled = self.evidence.enabled,
            confidence_threshold = self.evidence.confidence_threshold,
            cooldowns = self.ledger.cooldowns.len(),
            trust_proxy_headers = self.security.trust_proxy_headers,
            postgres_enabled = self.database.postgres_enabled,
            postgres_url = %mask_secret(&self.database.postgres_url),
            api_keys = self.security.api_keys.len(),
            "Configuration loaded"
        );
    }
}

fn required_secret<F>(lookup: &F, name: &'static str) -> Result<Vec<u8>>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or(EngineError::MissingSecret(name))?;
    let bytes = hex::decode(value.trim()).with_context(|| format!("{} must be hex encoded", name))?;
    check_secret(name, &bytes)?;
    Ok(bytes)
}

fn check_secret(name: &'static str, value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(EngineError::MissingSecret(name).into());
    }
    if value.len() < MIN_SECRET_LEN {
        return Err(anyhow::anyhow!(
            "{} is too short (minimum {} bytes)",
            name,
            MIN_SECRET_LEN
        ));
    }
    Ok(())
}

/// Parse `threshold:bonus,...`
fn parse_milestones(raw: &str) -> Result<Vec<Milestone>> {
    let mut milestones = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (threshold, bonus) = entry
            .split_once(':')
            .with_context(|| format!("milestone entry '{}' is not threshold:bonus", entry))?;
        milestones.push(Milestone {
            threshold: threshold.trim().parse().context("Invalid milestone threshold")?,
            bonus_points: bonus.trim().parse().context("Invalid milestone bonus")?,
        });
    }
    if milestones.windows(2).any(|w| w[0].threshold >= w[1].threshold) {
        anyhow::bail!("milestone thresholds must be strictly ascending");
    }
    Ok(milestones)
}

/// Parse `category:value,...` (points or cooldown seconds)
fn parse_category_map(raw: &str) -> Result<BTreeMap<String, u64>> {
    let mut values = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (category, value) = entry
            .split_once(':')
            .with_context(|| format!("category entry '{}' is not category:value", entry))?;
        let category = category.trim();
        if category.is_empty() {
            anyhow::bail!("empty category name");
        }
        values.insert(
            category.to_string(),
            value.trim().parse().context("Invalid category value")?,
        );
    }
    Ok(values)
}

/// Mask a secret or credential-bearing value for logging
pub fn mask_secret(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 6..].iter().collect();
        format!("{}***{}", head, tail)
    } else if chars.len() > 4 {
        let head: String = chars[..2].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}***{}", head, tail)
    } else {
        "***".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const PEPPER: &str = "00112233445566778899aabbccddeeff";
    const SALT: &str = "ffeeddccbbaa99887766554433221100";
    const KEY: &str = "k3y-0123456789abcdef0123456789abcdef";

    fn load(vars: &[(&str, &str)]) -> Result<HonorConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HonorConfig::from_lookup(|k| vars.get(k).cloned())
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("HONOR_HASH_PEPPER", PEPPER),
            ("HONOR_HASH_SALT", SALT),
            ("HONOR_API_KEYS", KEY),
        ]
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("my_authenticator_123"), "my***23");
        assert_eq!(mask_secret("postgresql://user:pw@host/db"), "postgr***ost/db");
        assert_eq!(mask_secret("abc"), "***");
    }

    #[test]
    fn test_defaults_with_secrets() {
        let config = load(&base()).unwrap();
        assert_eq!(config.evidence.confidence_threshold, 60.0);
        assert_eq!(config.ledger.category_points.get("email_sent"), Some(&20));
        assert_eq!(config.credentials.physical.gold_points, 10000);
        assert!(config.anonymizer().is_ok());
    }

    #[test]
    fn test_missing_pepper_fails_closed() {
        let err = load(&[("HONOR_HASH_SALT", SALT), ("HONOR_API_KEYS", KEY)]).unwrap_err();
        assert!(err.to_string().contains("HONOR_HASH_PEPPER"));

        let err = load(&[
            ("HONOR_HASH_PEPPER", ""),
            ("HONOR_HASH_SALT", SALT),
            ("HONOR_API_KEYS", KEY),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("HONOR_HASH_PEPPER"));
    }

    #[test]
    fn test_short_or_non_hex_secret_rejected() {
        let mut vars = base();
        vars[1] = ("HONOR_HASH_SALT", "abcd");
        assert!(load(&vars).is_err());

        let mut vars = base();
        vars[0] = ("HONOR_HASH_PEPPER", "not hex at all, definitely not");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_malformed_rank_table_is_fatal() {
        let mut vars = base();
        vars.push(("HONOR_RANK_THRESHOLDS", "0:Recruit,50:Sergeant,40:Captain"));
        assert!(load(&vars).is_err());

        let mut vars = base();
        vars.push(("HONOR_RANK_THRESHOLDS", "0:Recruit,100:Veteran"));
        let config = load(&vars).unwrap();
        assert_eq!(config.ledger.ranks.rank(150).label, "Veteran");
    }

    #[test]
    fn test_threshold_range_checked() {
        let mut vars = base();
        vars.push(("HONOR_EVIDENCE_CONFIDENCE_THRESHOLD", "140"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut vars = base();
        vars.push(("HONOR_STREAK_MILESTONES", "3:10,7:50"));
        vars.push(("HONOR_PHYSICAL_THRESHOLDS", "100,200,300"));
        vars.push(("HONOR_EVIDENCE_ENABLED", "false"));
        let config = load(&vars).unwrap();
        assert_eq!(config.ledger.streak_milestones.len(), 2);
        assert_eq!(config.credentials.physical.bronze_points, 100);
        assert!(!config.classifier_settings().auto_extraction);

        let mut vars = base();
        vars.push(("HONOR_PHYSICAL_THRESHOLDS", "100,200"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_overlong_names_rejected() {
        let long = "c".repeat(MAX_CATEGORY_LEN + 1);

        let entry = format!("{}:5", long);
        let mut vars: Vec<(&str, &str)> = base();
        vars.push(("HONOR_CATEGORY_POINTS", &entry));
        assert!(load(&vars).is_err());

        let ranks = format!("0:Recruit,100:{}", "L".repeat(MAX_CATEGORY_LEN + 1));
        let mut vars: Vec<(&str, &str)> = base();
        vars.push(("HONOR_RANK_THRESHOLDS", &ranks));
        assert!(load(&vars).is_err());

        let mut config = load(&base()).unwrap();
        config.evidence.category = long;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cooldowns_and_proxy_trust() {
        let config = load(&base()).unwrap();
        assert!(config.ledger_policy().cooldowns.is_empty());
        assert!(!config.security.trust_proxy_headers);

        let mut vars = base();
        vars.push(("HONOR_ACTION_COOLDOWNS", "media_submitted:600, video_testimonial:3600"));
        vars.push(("HONOR_TRUST_PROXY_HEADERS", "true"));
        let config = load(&vars).unwrap();
        assert_eq!(config.ledger_policy().cooldowns.get("media_submitted"), Some(&600));
        assert!(config.security.trust_proxy_headers);

        let mut vars = base();
        vars.push(("HONOR_ACTION_COOLDOWNS", "media_submitted:soon"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_secrets_not_in_debug_output() {
        let config = load(&base()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains(KEY));
        assert!(debug.contains("<redacted>"));
    }
}
