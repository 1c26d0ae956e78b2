//! Static danger policy
//!
//! A command's tier is derived only from what the rule text declares: the
//! request service code, the action name and the module it targets. Request
//! arguments are never consulted, so a crafted payload cannot talk a command
//! down to a lower tier.

use serde::Serialize;
use vdiag_core::DangerLevel;

use crate::types::CommandRule;

/// Modules whose non-read commands are always treated as DANGER
pub const SAFETY_CRITICAL_MODULES: &[&str] = &[
    "ABS", "SRS", "AIRBAG", "EPS", "ESC", "ESP", "BRAKE", "STEER", "TCS", "EBCM",
];

const READ_SERVICES: &[u8] = &[
    0x01, 0x02, 0x03, 0x05, 0x06, 0x07, 0x09, 0x0A, 0x17, 0x18, 0x1A, 0x21, 0x22, 0x19, 0x3E,
];
const WRITE_SERVICES: &[u8] = &[0x04, 0x14, 0x2E, 0x27, 0x10, 0x3B, 0x28, 0x85];
const ACTUATION_SERVICES: &[u8] = &[0x08, 0x2F, 0x31, 0x30, 0x11];
const MEMORY_SERVICES: &[u8] = &[0x34, 0x35, 0x36, 0x37, 0x3D];

const CAUTION_KEYWORDS: &[&str] = &["CLEAR", "RESET", "WRITE", "CODE", "ADAPT"];
const WARNING_KEYWORDS: &[&str] = &["ACTUATE", "CONTROL", "TEST", "MOVE", "BLEED", "CALIBRATE"];
const DANGER_KEYWORDS: &[&str] = &["FLASH", "PROGRAM"];

/// Tier plus the human-readable reason shown before confirmation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Classification {
    pub level: DangerLevel,
    pub reason: String,
}

impl Classification {
    fn new(level: DangerLevel, reason: impl Into<String>) -> Self {
        Self {
            level,
            reason: reason.into(),
        }
    }

    fn raise(&mut self, level: DangerLevel, reason: impl Into<String>) {
        if level > self.level {
            self.level = level;
            self.reason = reason.into();
        }
    }
}

/// Tier implied by a request service code alone
pub fn service_level(service: u8) -> Option<(DangerLevel, &'static str)> {
    if READ_SERVICES.contains(&service) {
        Some((DangerLevel::Safe, "read-only service"))
    } else if WRITE_SERVICES.contains(&service) {
        Some((DangerLevel::Caution, "write, clear or session service"))
    } else if ACTUATION_SERVICES.contains(&service) {
        Some((DangerLevel::Warning, "actuation or reset service"))
    } else if MEMORY_SERVICES.contains(&service) {
        Some((DangerLevel::Danger, "memory transfer or flash service"))
    } else {
        None
    }
}

/// Tier implied by the action name, from its underscore-separated words
pub fn action_level(action: &str) -> Option<(DangerLevel, &'static str)> {
    let upper = action.to_ascii_uppercase();
    let words: Vec<&str> = upper.split('_').collect();
    let has = |keywords: &[&'static str]| keywords.iter().find(|k| words.contains(*k)).copied();

    if let Some(word) = has(DANGER_KEYWORDS) {
        return Some((DangerLevel::Danger, word));
    }
    if let Some(word) = has(WARNING_KEYWORDS) {
        return Some((DangerLevel::Warning, word));
    }
    has(CAUTION_KEYWORDS).map(|word| (DangerLevel::Caution, word))
}

pub fn is_safety_critical(module: &str) -> bool {
    let upper = module.to_ascii_uppercase();
    SAFETY_CRITICAL_MODULES.contains(&upper.as_str())
}

/// Classify a command from its static metadata
///
/// Safety-critical modules escalate every non-SAFE command to DANGER. Plain
/// reads on them stay SAFE: reading trouble codes off an ABS or SRS module
/// changes nothing on the vehicle.
pub fn classify(rule: &CommandRule) -> Classification {
    let mut result = match service_level(rule.service()) {
        Some((level, what)) => {
            Classification::new(level, format!("service 0x{:02X} is a {}", rule.service(), what))
        }
        None => Classification::new(
            DangerLevel::Warning,
            format!("service 0x{:02X} is not a known diagnostic service", rule.service()),
        ),
    };

    if let Some((level, word)) = action_level(rule.action()) {
        result.raise(
            level,
            format!("action '{}' contains the keyword {}", rule.action(), word),
        );
    }

    if result.level > DangerLevel::Safe && is_safety_critical(rule.module()) {
        result.raise(
            DangerLevel::Danger,
            format!(
                "non-read command on safety-critical module {}",
                rule.module()
            ),
        );
    }

    if let Some(declared) = rule.declared_level() {
        result.raise(declared, format!("rule declares tier {}", declared));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pattern;
    use rstest::rstest;

    fn rule(module: &str, action: &str, service: u8, declared: Option<DangerLevel>) -> CommandRule {
        CommandRule::new(
            module,
            action,
            service,
            None,
            vec![],
            Pattern::new(".*").unwrap(),
            declared,
        )
    }

    #[rstest]
    #[case("HVAC", "READ_DTC", 0x03, DangerLevel::Safe)]
    #[case("ECM", "READ_VIN", 0x09, DangerLevel::Safe)]
    #[case("ECM", "CLEAR_DTC", 0x04, DangerLevel::Caution)]
    #[case("BCM", "WRITE_CONFIG", 0x2E, DangerLevel::Caution)]
    #[case("HVAC", "BLEND_DOOR_CONTROL", 0x2F, DangerLevel::Warning)]
    #[case("HVAC", "BLEND_DOOR_CONTROL", 0x22, DangerLevel::Warning)]
    #[case("ECM", "RESET", 0x11, DangerLevel::Warning)]
    #[case("ECM", "FLASH_CALIBRATION", 0x34, DangerLevel::Danger)]
    #[case("ECM", "UNKNOWN", 0x99, DangerLevel::Warning)]
    #[case("ABS", "READ_DTC", 0x19, DangerLevel::Safe)]
    #[case("ABS", "BLEED_BRAKES", 0x31, DangerLevel::Danger)]
    #[case("abs", "CLEAR_DTC", 0x14, DangerLevel::Danger)]
    fn test_classify(
        #[case] module: &str,
        #[case] action: &str,
        #[case] service: u8,
        #[case] expected: DangerLevel,
    ) {
        let classification = classify(&rule(module, action, service, None));
        assert_eq!(classification.level, expected, "{}", classification.reason);
        assert!(!classification.reason.is_empty());
    }

    #[test]
    fn test_declared_level_only_raises() {
        let raised = classify(&rule("ECM", "READ_VIN", 0x09, Some(DangerLevel::Caution)));
        assert_eq!(raised.level, DangerLevel::Caution);
        assert!(raised.reason.contains("declares"));

        let lowered = classify(&rule("ECM", "FLASH", 0x34, Some(DangerLevel::Safe)));
        assert_eq!(lowered.level, DangerLevel::Danger);
    }

    #[test]
    fn test_classify_is_stable() {
        let a = rule("HVAC", "BLEND_DOOR_CONTROL", 0x2F, None);
        let b = rule("HVAC", "BLEND_DOOR_CONTROL", 0x2F, None);
        assert_eq!(classify(&a), classify(&b));
        assert_eq!(classify(&a), *a.classification());
    }

    #[test]
    fn test_reads_on_safety_critical_modules_stay_safe() {
        for module in SAFETY_CRITICAL_MODULES {
            for &service in READ_SERVICES {
                let read = classify(&rule(module, "READ_DATA", service, None));
                assert_eq!(read.level, DangerLevel::Safe, "{} 0x{:02X}", module, service);
            }
            let clear = classify(&rule(module, "CLEAR_DTC", 0x14, None));
            assert_eq!(clear.level, DangerLevel::Danger, "{}", module);
            assert!(clear.reason.contains("safety-critical"));

            // A keyword in the action name still escalates a read service
            let keyed = classify(&rule(module, "RESET_ADAPTATION", 0x22, None));
            assert_eq!(keyed.level, DangerLevel::Danger, "{}", module);
        }
    }

    #[test]
    fn test_keywords_match_whole_words() {
        // "DECODE" must not trip the CODE keyword
        assert_eq!(action_level("READ_DECODED"), None);
        assert_eq!(
            action_level("ACTUATE_FAN").map(|(l, _)| l),
            Some(DangerLevel::Warning)
        );
    }
}
