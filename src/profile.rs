//! Investor risk profiles and the per-profile tables that steer the optimizer.
//!
//! Two independent mechanisms read from here: the fitness evaluator scales its
//! risk objectives with [`PenaltyScaling`], and the front selection policy scores
//! candidates with [`SelectionWeights`]. They live side by side in one
//! [`ProfileTable`] so the numbers cannot drift apart across modules, but they are
//! never combined.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub enum RiskProfile {
    #[serde(rename = "conservador", alias = "conservative")]
    Conservative,
    #[serde(rename = "moderado", alias = "moderate")]
    Moderate,
    #[serde(rename = "arrojado", alias = "aggressive")]
    Aggressive,
    /// Profile-agnostic bucket used by the tuning store.
    #[serde(rename = "neutro", alias = "neutral")]
    Neutral,
}

impl RiskProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Conservative => "conservador",
            RiskProfile::Moderate => "moderado",
            RiskProfile::Aggressive => "arrojado",
            RiskProfile::Neutral => "neutro",
        }
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown risk profile: `{0}`")]
pub struct UnknownRiskProfile(pub String);

impl FromStr for RiskProfile {
    type Err = UnknownRiskProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conservador" | "conservative" => Ok(RiskProfile::Conservative),
            "moderado" | "moderate" => Ok(RiskProfile::Moderate),
            "arrojado" | "aggressive" => Ok(RiskProfile::Aggressive),
            "neutro" | "neutral" => Ok(RiskProfile::Neutral),
            other => Err(UnknownRiskProfile(other.to_string())),
        }
    }
}

/// Multipliers applied to the variance and CVaR objectives before ranking.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PenaltyScaling {
    pub variance: f64,
    pub cvar: f64,
}

impl PenaltyScaling {
    pub const UNSCALED: PenaltyScaling = PenaltyScaling {
        variance: 1.0,
        cvar: 1.0,
    };
}

/// Score weights over the normalized [return, variance, CVaR] columns of a front.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SelectionWeights {
    pub expected_return: f64,
    pub variance: f64,
    pub cvar: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProfileEntry {
    pub penalty: PenaltyScaling,
    pub selection: SelectionWeights,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProfileTable {
    pub conservative: ProfileEntry,
    pub moderate: ProfileEntry,
    pub aggressive: ProfileEntry,
    pub neutral: ProfileEntry,
}

impl Default for ProfileTable {
    fn default() -> Self {
        let moderate = ProfileEntry {
            penalty: PenaltyScaling::UNSCALED,
            selection: SelectionWeights {
                expected_return: 0.4,
                variance: 0.3,
                cvar: 0.3,
            },
        };
        Self {
            conservative: ProfileEntry {
                penalty: PenaltyScaling {
                    variance: 1.5,
                    cvar: 2.0,
                },
                selection: SelectionWeights {
                    expected_return: 0.2,
                    variance: 0.4,
                    cvar: 0.4,
                },
            },
            moderate,
            aggressive: ProfileEntry {
                penalty: PenaltyScaling {
                    variance: 0.8,
                    cvar: 0.8,
                },
                selection: SelectionWeights {
                    expected_return: 0.6,
                    variance: 0.2,
                    cvar: 0.2,
                },
            },
            neutral: moderate,
        }
    }
}

impl ProfileTable {
    pub fn entry(&self, profile: RiskProfile) -> &ProfileEntry {
        match profile {
            RiskProfile::Conservative => &self.conservative,
            RiskProfile::Moderate => &self.moderate,
            RiskProfile::Aggressive => &self.aggressive,
            RiskProfile::Neutral => &self.neutral,
        }
    }

    pub fn penalty(&self, profile: RiskProfile) -> PenaltyScaling {
        self.entry(profile).penalty
    }

    pub fn selection(&self, profile: RiskProfile) -> SelectionWeights {
        self.entry(profile).selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_portuguese_and_english_names() {
        assert_eq!("conservador".parse::<RiskProfile>(), Ok(RiskProfile::Conservative));
        assert_eq!(" Aggressive ".parse::<RiskProfile>(), Ok(RiskProfile::Aggressive));
        assert_eq!("neutro".parse::<RiskProfile>(), Ok(RiskProfile::Neutral));
        assert!("yolo".parse::<RiskProfile>().is_err());
    }

    #[test]
    fn test_serde_uses_canonical_names() {
        let json = serde_json::to_string(&RiskProfile::Moderate).unwrap();
        assert_eq!(json, "\"moderado\"");
        let parsed: RiskProfile = serde_json::from_str("\"aggressive\"").unwrap();
        assert_eq!(parsed, RiskProfile::Aggressive);
    }

    #[test]
    fn test_default_table_keeps_penalties_and_selection_separate() {
        let table = ProfileTable::default();
        assert_eq!(table.penalty(RiskProfile::Conservative).variance, 1.5);
        assert_eq!(table.penalty(RiskProfile::Conservative).cvar, 2.0);
        assert_eq!(table.penalty(RiskProfile::Aggressive).cvar, 0.8);
        assert_eq!(table.penalty(RiskProfile::Moderate), PenaltyScaling::UNSCALED);
        assert_eq!(table.penalty(RiskProfile::Neutral), PenaltyScaling::UNSCALED);
        assert_eq!(table.selection(RiskProfile::Aggressive).expected_return, 0.6);
        assert_eq!(
            table.selection(RiskProfile::Neutral),
            table.selection(RiskProfile::Moderate)
        );
    }
}
