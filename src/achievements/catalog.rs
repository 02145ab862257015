//! Achievement definitions

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{EngineError, EngineResult};

/// Predicate that decides when an achievement unlocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnlockRule {
    PointsAtLeast { points: u64 },
    CategoryCount { category: String, count: u64 },
    /// Longest streak in any category
    StreakAtLeast { days: u32 },
    /// Distinct categories acted on today
    ComboAtLeast { distinct: u32 },
    EvidenceTotalAtLeast { quantity: f64 },
    /// Never qualifies automatically; granted by an operator
    Manual,
}

/// Visibility capability of a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    AlwaysVisible,
    /// Hidden from listings until the owner unlocks it
    RevealOnUnlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: String,
    pub category: String,
    pub rule: UnlockRule,
    pub bonus_points: u64,
    pub visibility: Visibility,
}

impl AchievementDefinition {
    fn new(id: &str, category: &str, rule: UnlockRule, bonus_points: u64) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            rule,
            bonus_points,
            visibility: Visibility::AlwaysVisible,
        }
    }

    fn hidden(mut self) -> Self {
        self.visibility = Visibility::RevealOnUnlock;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementCatalog {
    definitions: Vec<AchievementDefinition>,
}

impl AchievementCatalog {
    pub fn new(definitions: Vec<AchievementDefinition>) -> EngineResult<Self> {
        let mut seen = HashSet::new();
        for def in &definitions {
            if def.id.is_empty() {
                return Err(EngineError::InvalidConfig("achievement with empty id".to_string()));
            }
            if !seen.insert(def.id.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate achievement id {}",
                    def.id
                )));
            }
        }
        Ok(Self { definitions })
    }

    pub fn get(&self, id: &str) -> Option<&AchievementDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn definitions(&self) -> &[AchievementDefinition] {
        &self.definitions
    }

    /// Definitions the owner of `unlocked` may see
    pub fn visible_catalog<'a, V: 'a>(
        &'a self,
        unlocked: &'a BTreeMap<String, V>,
    ) -> impl Iterator<Item = &'a AchievementDefinition> + 'a {
        self.definitions.iter().filter(move |d| {
            d.visibility == Visibility::AlwaysVisible || unlocked.contains_key(&d.id)
        })
    }
}

impl Default for AchievementCatalog {
    fn default() -> Self {
        use UnlockRule::*;

        let points = |points| PointsAtLeast { points };
        let count = |category: &str, count| CategoryCount {
            category: category.to_string(),
            count,
        };

        let definitions = vec![
            AchievementDefinition::new("first_step", "milestone", points(10), 10),
            AchievementDefinition::new("fifty_club", "milestone", points(50), 25),
            AchievementDefinition::new("century", "milestone", points(100), 50),
            AchievementDefinition::new("quarter_k", "milestone", points(250), 75),
            AchievementDefinition::new("half_k", "milestone", points(500), 100),
            AchievementDefinition::new("one_k", "milestone", points(1000), 200),
            AchievementDefinition::new("fifteen_hundred", "milestone", points(1500), 300),
            AchievementDefinition::new("twitter_starter", "specialist", count("tweet_shared", 10), 30),
            AchievementDefinition::new("twitter_warrior", "specialist", count("tweet_shared", 50), 100),
            AchievementDefinition::new("twitter_master", "specialist", count("tweet_shared", 100), 200),
            AchievementDefinition::new("email_starter", "specialist", count("email_sent", 10), 30),
            AchievementDefinition::new("email_warrior", "specialist", count("email_sent", 50), 100),
            AchievementDefinition::new("email_master", "specialist", count("email_sent", 100), 200),
            AchievementDefinition::new("data_bronze", "specialist", EvidenceTotalAtLeast { quantity: 10.0 }, 50),
            AchievementDefinition::new("data_silver", "specialist", EvidenceTotalAtLeast { quantity: 100.0 }, 150),
            AchievementDefinition::new("data_gold", "specialist", EvidenceTotalAtLeast { quantity: 500.0 }, 300),
            AchievementDefinition::new("data_legend", "specialist", EvidenceTotalAtLeast { quantity: 1000.0 }, 600),
            AchievementDefinition::new("active_week", "activity", StreakAtLeast { days: 7 }, 80),
            AchievementDefinition::new("active_two_weeks", "activity", StreakAtLeast { days: 14 }, 150),
            AchievementDefinition::new("active_month", "activity", StreakAtLeast { days: 30 }, 300),
            AchievementDefinition::new("active_hundred", "activity", StreakAtLeast { days: 100 }, 1000),
            AchievementDefinition::new("combo_master", "combo", ComboAtLeast { distinct: 5 }, 100),
            AchievementDefinition::new("combo_legend", "combo", ComboAtLeast { distinct: 7 }, 200),
            AchievementDefinition::new("organizer", "social", count("protest_event_created", 1), 50),
            AchievementDefinition::new("cleanup_hero", "social", count("protest_cleanup", 5), 150),
            AchievementDefinition::new("lion_heart", "secret", Manual, 500).hidden(),
            AchievementDefinition::new("sun_warrior", "secret", Manual, 1000).hidden(),
        ];

        Self { definitions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = AchievementCatalog::default();
        assert!(AchievementCatalog::new(catalog.definitions().to_vec()).is_ok());
        assert!(catalog.get("century").is_some());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let def = AchievementDefinition::new("x", "milestone", UnlockRule::Manual, 1);
        assert!(AchievementCatalog::new(vec![def.clone(), def]).is_err());
    }

    #[test]
    fn test_hidden_until_unlocked() {
        let catalog = AchievementCatalog::default();
        let mut unlocked: BTreeMap<String, ()> = BTreeMap::new();

        assert!(!catalog.visible_catalog(&unlocked).any(|d| d.id == "lion_heart"));
        unlocked.insert("lion_heart".to_string(), ());
        assert!(catalog.visible_catalog(&unlocked).any(|d| d.id == "lion_heart"));
        assert!(!catalog.visible_catalog(&unlocked).any(|d| d.id == "sun_warrior"));
    }
}
