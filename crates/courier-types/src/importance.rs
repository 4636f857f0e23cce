//! Message importance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity tag attached to a message, influencing how the receiving bus
/// dispatches it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    /// Best-effort; may be dropped under pressure.
    Low,
    /// Ordinary command or event.
    #[default]
    Normal,
    /// Must survive handler failures; queued on receive.
    High,
    /// Must survive process failures; queued on receive.
    Critical,
}

impl Importance {
    /// Whether the receiving bus must queue this message durably before
    /// dispatching handlers, rather than handling it in-line.
    #[must_use]
    pub fn requires_queueing(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Importance {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queueing_threshold() {
        assert!(!Importance::Low.requires_queueing());
        assert!(!Importance::Normal.requires_queueing());
        assert!(Importance::High.requires_queueing());
        assert!(Importance::Critical.requires_queueing());
    }

    #[test]
    fn display_round_trip() {
        for i in [
            Importance::Low,
            Importance::Normal,
            Importance::High,
            Importance::Critical,
        ] {
            assert_eq!(i.to_string().parse::<Importance>().unwrap(), i);
        }
    }
}
