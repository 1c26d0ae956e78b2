//! Danger tiers attached to every command rule

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity tier of a command, ordered from harmless to hazardous
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DangerLevel {
    /// Read-only request
    #[default]
    Safe,
    /// Writes or clears stored data
    Caution,
    /// Moves actuators or resets modules
    Warning,
    /// Touches safety-critical modules or reprograms memory
    Danger,
}

impl DangerLevel {
    /// All tiers in ascending order
    pub const ALL: [DangerLevel; 4] = [
        DangerLevel::Safe,
        DangerLevel::Caution,
        DangerLevel::Warning,
        DangerLevel::Danger,
    ];

    /// Upper-case tag used in rule text (`LVL:WARNING`)
    pub fn as_str(&self) -> &'static str {
        match self {
            DangerLevel::Safe => "SAFE",
            DangerLevel::Caution => "CAUTION",
            DangerLevel::Warning => "WARNING",
            DangerLevel::Danger => "DANGER",
        }
    }

    /// Minimum number of distinct operator acknowledgements before dispatch
    pub fn required_acknowledgements(&self) -> usize {
        match self {
            DangerLevel::Safe => 0,
            DangerLevel::Caution => 1,
            DangerLevel::Warning => 1,
            DangerLevel::Danger => 3,
        }
    }

    /// Whether any operator interaction is required
    pub fn needs_confirmation(&self) -> bool {
        *self > DangerLevel::Safe
    }
}

impl fmt::Display for DangerLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DangerLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Ok(DangerLevel::Safe),
            "CAUTION" => Ok(DangerLevel::Caution),
            "WARNING" => Ok(DangerLevel::Warning),
            "DANGER" => Ok(DangerLevel::Danger),
            other => Err(format!("unknown danger level: {}", other)),
        }
    }
}
