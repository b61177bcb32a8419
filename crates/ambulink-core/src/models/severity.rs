//! Emergency Severity Index tiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Five-level acuity classification. `Esi1` is the most severe.
///
/// The derived ordering follows acuity, so `Esi1 < Esi5` and
/// `min(a, b)` picks the more severe tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "ESI-1")]
    Esi1,
    #[serde(rename = "ESI-2")]
    Esi2,
    #[serde(rename = "ESI-3")]
    Esi3,
    #[serde(rename = "ESI-4")]
    Esi4,
    #[serde(rename = "ESI-5")]
    Esi5,
}

impl Severity {
    /// All tiers, most severe first.
    pub const ALL: [Self; 5] = [Self::Esi1, Self::Esi2, Self::Esi3, Self::Esi4, Self::Esi5];

    /// Numeric ESI level (1 = most severe).
    pub const fn level(self) -> u8 {
        match self {
            Self::Esi1 => 1,
            Self::Esi2 => 2,
            Self::Esi3 => 3,
            Self::Esi4 => 4,
            Self::Esi5 => 5,
        }
    }

    /// ESI-1 and ESI-2 warrant a critical facility alert.
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Esi1 | Self::Esi2)
    }

    /// True when `self` is strictly more severe than `other`.
    pub fn is_more_severe_than(self, other: Self) -> bool {
        self < other
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Esi1 => "ESI-1",
            Self::Esi2 => "ESI-2",
            Self::Esi3 => "ESI-3",
            Self::Esi4 => "ESI-4",
            Self::Esi5 => "ESI-5",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(' ', "-");
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == normalized)
            .ok_or_else(|| format!("unknown severity tier: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_puts_most_severe_first() {
        assert!(Severity::Esi1 < Severity::Esi5);
        assert!(Severity::Esi1.is_more_severe_than(Severity::Esi2));
        assert_eq!(Severity::Esi2.min(Severity::Esi4), Severity::Esi2);
    }

    #[test]
    fn serde_uses_esi_labels() {
        assert_eq!(serde_json::to_string(&Severity::Esi3).unwrap(), "\"ESI-3\"");
        let parsed: Severity = serde_json::from_str("\"ESI-1\"").unwrap();
        assert_eq!(parsed, Severity::Esi1);
    }

    #[test]
    fn from_str_accepts_spaced_labels() {
        assert_eq!("esi 2".parse::<Severity>().unwrap(), Severity::Esi2);
        assert!("ESI-9".parse::<Severity>().is_err());
    }

    #[test]
    fn critical_covers_top_two_tiers() {
        let critical: Vec<_> = Severity::ALL.into_iter().filter(|s| s.is_critical()).collect();
        assert_eq!(critical, vec![Severity::Esi1, Severity::Esi2]);
    }
}
