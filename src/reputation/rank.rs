//! Rank threshold table
//!
//! Rank is always derived from points through [`RankTable::rank`]. It is
//! never stored next to the point total.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// One entry of the threshold table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rank {
    /// Position in the table, 0 for the entry rank
    pub level: usize,
    pub min_points: u64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankTable {
    ranks: Vec<Rank>,
}

impl RankTable {
    /// Build a table from `(min_points, label)` pairs.
    ///
    /// The list must be non-empty, strictly ascending, start at 0 and carry
    /// distinct non-empty labels.
    pub fn new(entries: Vec<(u64, String)>) -> EngineResult<Self> {
        if entries.is_empty() {
            return Err(EngineError::InvalidConfig("rank table is empty".to_string()));
        }
        if entries[0].0 != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "first rank threshold must be 0, got {}",
                entries[0].0
            )));
        }

        let mut ranks: Vec<Rank> = Vec::with_capacity(entries.len());
        for (level, (min_points, label)) in entries.into_iter().enumerate() {
            let label = label.trim().to_string();
            if label.is_empty() {
                return Err(EngineError::InvalidConfig(format!(
                    "rank at {} points has an empty label",
                    min_points
                )));
            }
            if let Some(prev) = ranks.last() {
                if min_points <= prev.min_points {
                    return Err(EngineError::InvalidConfig(format!(
                        "rank thresholds must be strictly ascending ({} after {})",
                        min_points, prev.min_points
                    )));
                }
            }
            if ranks.iter().any(|r| r.label == label) {
                return Err(EngineError::InvalidConfig(format!("duplicate rank label {}", label)));
            }
            ranks.push(Rank { level, min_points, label });
        }

        Ok(Self { ranks })
    }

    /// Parse `min:label,min:label,...`
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let mut entries = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (min, label) = part.split_once(':').ok_or_else(|| {
                EngineError::InvalidConfig(format!("rank entry '{}' is not min:label", part))
            })?;
            let min: u64 = min.trim().parse().map_err(|_| {
                EngineError::InvalidConfig(format!("rank entry '{}' has a non-numeric threshold", part))
            })?;
            entries.push((min, label.to_string()));
        }
        Self::new(entries)
    }

    /// Label of the highest threshold not above `points`
    pub fn rank(&self, points: u64) -> &Rank {
        let idx = self.ranks.partition_point(|r| r.min_points <= points);
        &self.ranks[idx.saturating_sub(1)]
    }

    pub fn by_label(&self, label: &str) -> Option<&Rank> {
        self.ranks.iter().find(|r| r.label == label)
    }

    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    /// Points still needed to reach the next rank, `None` at the top
    pub fn points_to_next(&self, points: u64) -> Option<u64> {
        let current = self.rank(points);
        self.ranks
            .get(current.level + 1)
            .map(|next| next.min_points - points)
    }
}

impl Default for RankTable {
    fn default() -> Self {
        let entries = [
            (0, "Recruit"),
            (50, "Sergeant"),
            (120, "First Lieutenant"),
            (220, "Second Lieutenant"),
            (370, "Captain"),
            (600, "Major"),
            (1000, "Colonel"),
            (1600, "Brigadier"),
            (2500, "Senior Brigadier"),
            (4000, "Major General"),
            (6500, "Lieutenant General"),
            (10000, "Marshal"),
        ];
        Self {
            ranks: entries
                .iter()
                .enumerate()
                .map(|(level, (min_points, label))| Rank {
                    level,
                    min_points: *min_points,
                    label: label.to_string(),
                })
                .collect(),
        }
    }
}
