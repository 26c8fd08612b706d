use serde::{Deserialize, Serialize};

use super::super::domain::Cutoff;

const UNKNOWN_LEVEL: &str = "Unknown";

/// Interpretive level a scale score falls into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub label: String,
    pub description: String,
}

impl Level {
    /// Fallback for scores no cutoff covers.
    pub fn unknown() -> Self {
        Self {
            label: UNKNOWN_LEVEL.to_string(),
            description: UNKNOWN_LEVEL.to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LEVEL
    }
}

impl From<&Cutoff> for Level {
    fn from(cutoff: &Cutoff) -> Self {
        Self {
            label: cutoff.label.clone(),
            description: cutoff.description.clone(),
        }
    }
}

/// First cutoff in declaration order whose inclusive bounds contain `score`.
///
/// Overlapping ranges are resolved by that order, and ranges are never sorted first.
pub fn resolve_level(score: i32, cutoffs: &[Cutoff]) -> Level {
    cutoffs
        .iter()
        .find(|cutoff| cutoff.contains(score))
        .map(Level::from)
        .unwrap_or_else(Level::unknown)
}
