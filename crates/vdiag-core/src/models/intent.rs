//! Structured intent handed over by the query parser

use serde::{Deserialize, Serialize};

use super::VehicleId;

/// What the operator wants done, already resolved to a command identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    /// Vehicle the command targets
    pub vehicle: VehicleId,
    /// Command identifier (`<module>.<action>`)
    pub command: String,
    /// Original free-text query, kept for research requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Intent {
    pub fn new(vehicle: VehicleId, command: impl Into<String>) -> Self {
        Self {
            vehicle,
            command: command.into(),
            query: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Module half of the command identifier
    pub fn module(&self) -> Option<&str> {
        self.command.split_once('.').map(|(module, _)| module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_module() {
        let intent = Intent::new(VehicleId::new("Ford", "Focus", 2015), "HVAC.READ_DTC")
            .with_query("why is the heater blowing cold");
        assert_eq!(intent.module(), Some("HVAC"));
        assert!(intent.query.is_some());

        let bare = Intent::new(VehicleId::new("Ford", "Focus", 2015), "READ");
        assert_eq!(bare.module(), None);
    }
}
