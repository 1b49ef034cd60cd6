use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::utils::percentage::{ratio_percentage, Percentage};

/// Score summary computed by the remote service. Unknown fields are kept so the popup receives
/// the payload as the server sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KarmaSummary {
    /// Kept as sent, the service may report fractional scores.
    pub score: Number,
    pub level: String,
    pub streak: Number,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl KarmaSummary {
    pub fn score_value(&self) -> f64 {
        self.score.as_f64().unwrap_or_default()
    }

    /// Level implied by the score, which may lag behind the server's own label.
    pub fn score_level(&self) -> KarmaLevel {
        KarmaLevel::from_score(self.score_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KarmaLevel {
    Beginner,
    Mindful,
    Focused,
    ZenMaster,
}

impl KarmaLevel {
    const LADDER: [KarmaLevel; 4] = [
        KarmaLevel::Beginner,
        KarmaLevel::Mindful,
        KarmaLevel::Focused,
        KarmaLevel::ZenMaster,
    ];

    pub fn from_score(score: f64) -> Self {
        Self::LADDER
            .into_iter()
            .rev()
            .find(|level| score >= level.threshold() as f64)
            .unwrap_or(KarmaLevel::Beginner)
    }

    /// Score at which this level starts.
    pub fn threshold(self) -> i64 {
        match self {
            KarmaLevel::Beginner => 0,
            KarmaLevel::Mindful => 100,
            KarmaLevel::Focused => 500,
            KarmaLevel::ZenMaster => 1500,
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            KarmaLevel::Beginner => Some(KarmaLevel::Mindful),
            KarmaLevel::Mindful => Some(KarmaLevel::Focused),
            KarmaLevel::Focused => Some(KarmaLevel::ZenMaster),
            KarmaLevel::ZenMaster => None,
        }
    }

    /// How far `score` got from this level's threshold to the next one.
    pub fn progress(self, score: f64) -> Percentage {
        match self.next() {
            Some(next) => ratio_percentage(
                score - self.threshold() as f64,
                (next.threshold() - self.threshold()) as f64,
            ),
            None => Percentage::FULL,
        }
    }
}

impl Display for KarmaLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KarmaLevel::Beginner => write!(f, "Beginner"),
            KarmaLevel::Mindful => write!(f, "Mindful"),
            KarmaLevel::Focused => write!(f, "Focused"),
            KarmaLevel::ZenMaster => write!(f, "Zen Master"),
        }
    }
}
